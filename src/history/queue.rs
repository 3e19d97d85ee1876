// ============================================================================
// HISTORY QUEUE - bounded, bidirectional undo/redo log for one document
// ============================================================================

use std::sync::mpsc::{self, Receiver, Sender};

use slotmap::SlotMap;

use crate::buffer::{PixelAllocator, PixelBuffer, SystemAllocator};
use crate::error::{HistoryError, NotFound, OutOfMemory};
use crate::geometry::Rect;
use crate::host::LayerHost;

use super::action::Action;
use super::diff::DiffEngine;
use super::event::{Direction, Event, LayerChange};
use super::kind::ActionKind;
use super::spare::SpareCache;
use super::LayerId;

slotmap::new_key_type! {
    /// Generation-checked reference to an event in a [`Queue`].
    pub struct EventHandle;
}

/// Oldest events dropped per low-memory condition.
pub const LOW_MEMORY_PRUNE_COUNT: usize = 5;

/// How many events the queue may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthLimit {
    Unbounded,
    /// Undo is switched off: no events and no spare bitmaps are kept.
    Disabled,
    Bounded(usize),
}

impl From<isize> for DepthLimit {
    /// `-1` (any negative) is unbounded, `0` disabled, anything else a bound.
    fn from(depth: isize) -> Self {
        match depth {
            d if d < 0 => DepthLimit::Unbounded,
            0 => DepthLimit::Disabled,
            d => DepthLimit::Bounded(d as usize),
        }
    }
}

impl DepthLimit {
    pub fn as_isize(self) -> isize {
        match self {
            DepthLimit::Unbounded => -1,
            DepthLimit::Disabled => 0,
            DepthLimit::Bounded(n) => n as isize,
        }
    }
}

/// Where a new event goes when the cursor is not at the newest event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InsertMode {
    /// Splice the new event right after the cursor, keeping the redo branch.
    Insert,
    /// Drop every event after the cursor, then append.
    #[default]
    TruncateRedo,
}

/// Sent to subscribers whenever history was shortened to free memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryShortened;

/// Result of a completed undo or redo step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepSummary {
    pub event: EventHandle,
    pub name: String,
    pub changes: Vec<LayerChange>,
}

#[derive(Debug)]
struct EventNode {
    event: Event,
    prev: Option<EventHandle>,
    next: Option<EventHandle>,
}

/// The undo/redo history of one document.
///
/// Events form a doubly-linked list from oldest (head) to newest (tail).
/// The cursor marks the most recently applied event; it is `None` when
/// nothing is applied, i.e. before the head.
pub struct Queue {
    events: SlotMap<EventHandle, EventNode>,
    head: Option<EventHandle>,
    tail: Option<EventHandle>,
    cursor: Option<EventHandle>,
    depth: usize,
    max_depth: DepthLimit,
    spares: SpareCache,
    diff: DiffEngine,
    alloc: Box<dyn PixelAllocator + Send>,
    low_memory_subscribers: Vec<Sender<HistoryShortened>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(DepthLimit::Bounded(50))
    }
}

impl Queue {
    pub fn new(max_depth: DepthLimit) -> Self {
        Self {
            events: SlotMap::with_key(),
            head: None,
            tail: None,
            cursor: None,
            depth: 0,
            max_depth,
            spares: SpareCache::new(),
            diff: DiffEngine::new(),
            alloc: Box::new(SystemAllocator),
            low_memory_subscribers: Vec::new(),
        }
    }

    pub fn with_allocator(mut self, alloc: Box<dyn PixelAllocator + Send>) -> Self {
        self.alloc = alloc;
        self
    }

    pub fn with_diff_engine(mut self, diff: DiffEngine) -> Self {
        self.diff = diff;
        self
    }

    // ---- spare bitmaps ----------------------------------------------------

    /// Seed the committed state of a layer when it is created or loaded.
    /// Ignored while undo is disabled.
    pub fn register_layer(&mut self, layer: LayerId, initial: &PixelBuffer) -> Result<(), HistoryError> {
        if self.max_depth == DepthLimit::Disabled {
            return Ok(());
        }
        let copy = self.with_retry(|q| Ok(initial.try_clone_in(q.alloc.as_mut())?))?;
        self.spares.replace(layer, copy);
        Ok(())
    }

    /// Replace the committed state of a layer outright, returning the old one.
    pub fn change_layer_spare_bitmap(&mut self, layer: LayerId, bitmap: PixelBuffer) -> Option<PixelBuffer> {
        self.spares.replace(layer, bitmap)
    }

    pub fn spare_bitmap(&self, layer: LayerId) -> Option<&PixelBuffer> {
        self.spares.get(layer)
    }

    pub fn spare_memory_bytes(&self) -> usize {
        self.spares.memory_bytes()
    }

    // ---- recording --------------------------------------------------------

    /// Start a new event at the cursor. Returns `None` while undo is disabled.
    pub fn commit(&mut self, name: &str, thumbnail: Option<PixelBuffer>, mode: InsertMode) -> Option<EventHandle> {
        if self.max_depth == DepthLimit::Disabled {
            return None;
        }
        if mode == InsertMode::TruncateRedo {
            self.discard_redo();
        }

        let handle = self.events.insert(EventNode {
            event: Event::new(name, thumbnail),
            prev: None,
            next: None,
        });
        self.link_after(self.cursor, handle);
        self.cursor = Some(handle);
        self.depth += 1;

        self.truncate();
        debug_assert_eq!(self.depth, self.walked_len());
        Some(handle)
    }

    /// Record a pixel edit of `layer` inside `bounding_rect`; `current` is the
    /// layer after the edit.
    pub fn record_content_change(
        &mut self,
        event: EventHandle,
        layer: LayerId,
        bounding_rect: Rect,
        current: &PixelBuffer,
    ) -> Result<(), HistoryError> {
        self.record_change(event, layer, ActionKind::Content, bounding_rect, current)
    }

    /// Record a layer addition or deletion. `bitmap` is the added layer, or
    /// the layer as it was just before deletion.
    pub fn record_structural_change(
        &mut self,
        event: EventHandle,
        layer: LayerId,
        kind: ActionKind,
        bitmap: &PixelBuffer,
    ) -> Result<(), HistoryError> {
        self.record_change(event, layer, kind, Rect::from_pixel_rect(bitmap.bounds()), bitmap)
    }

    /// Record any kind of change of `layer` into `event`.
    ///
    /// On allocation failure the history is shortened and the recording
    /// retried once. If that fails too the change is left unrecorded; the
    /// document itself is never touched.
    pub fn record_change(
        &mut self,
        event: EventHandle,
        layer: LayerId,
        kind: ActionKind,
        bounding_rect: Rect,
        current: &PixelBuffer,
    ) -> Result<(), HistoryError> {
        if !self.events.contains_key(event) {
            return Err(HistoryError::EventNotFound(event));
        }

        let mut action = Action::new(layer, kind, bounding_rect);
        let stored = self.with_retry(|q| {
            let Queue { spares, diff, alloc, .. } = q;
            action.store(current, spares, diff, alloc.as_mut())
        });
        if let Err(e) = stored {
            if matches!(e, HistoryError::OutOfMemory(_)) {
                self.forget_unrecorded(layer, current, &e);
            }
            return Err(e);
        }

        // Low-memory pruning may have taken the event with it.
        let node = self.events.get_mut(event).ok_or(HistoryError::EventNotFound(event))?;
        node.event.add_action(action);
        Ok(())
    }

    /// The layer moved on without the history. A same-sized spare is brought
    /// up to date; any other spare no longer describes the layer and is
    /// dropped, so the layer must be registered again before its next change.
    fn forget_unrecorded(&mut self, layer: LayerId, current: &PixelBuffer, e: &HistoryError) {
        if Action::resync_spare(layer, current, &mut self.spares) {
            log_err!("history: change to layer {} left unrecorded: {}", layer, e);
        } else if self.spares.take(layer).is_some() {
            log_err!("history: change to layer {} left unrecorded, committed copy dropped: {}", layer, e);
        }
    }

    /// Remove `event` if every action in it turned out to change nothing.
    pub fn discard_if_empty(&mut self, event: EventHandle) -> bool {
        let empty = self.events.get(event).is_some_and(|n| n.event.is_empty());
        empty && self.remove(event).is_ok()
    }

    // ---- navigation -------------------------------------------------------

    /// Step the cursor back and return the event to be undone.
    ///
    /// An event made of a single layer addition is never returned: undoing
    /// it is left to the host's layer handling, and the cursor stays put.
    pub fn undo(&mut self) -> Option<EventHandle> {
        let cursor = self.cursor?;
        let node = self.events.get(cursor)?;
        if node.event.is_single_add_layer() {
            return None;
        }
        self.cursor = node.prev;
        Some(cursor)
    }

    /// Step the cursor forward and return the event to be redone.
    pub fn redo(&mut self) -> Option<EventHandle> {
        let next = match self.cursor {
            None => self.head?,
            Some(cursor) => self.events.get(cursor)?.next?,
        };
        self.cursor = Some(next);
        Some(next)
    }

    /// Undo one event and apply it to the document.
    pub fn perform_undo(&mut self, host: &mut dyn LayerHost) -> Result<Option<StepSummary>, HistoryError> {
        let Some(handle) = self.undo() else {
            return Ok(None);
        };
        match self.apply_event(handle, host, Direction::Undo) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                if self.events.contains_key(handle) {
                    self.cursor = Some(handle);
                }
                log_err!("history: undo failed: {}", e);
                Err(e)
            }
        }
    }

    /// Redo one event and apply it to the document.
    pub fn perform_redo(&mut self, host: &mut dyn LayerHost) -> Result<Option<StepSummary>, HistoryError> {
        let Some(handle) = self.redo() else {
            return Ok(None);
        };
        match self.apply_event(handle, host, Direction::Redo) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                // Whatever precedes the event now is where the document still is.
                self.cursor = self.events.get(handle).and_then(|n| n.prev);
                log_err!("history: redo failed: {}", e);
                Err(e)
            }
        }
    }

    fn apply_event(
        &mut self,
        handle: EventHandle,
        host: &mut dyn LayerHost,
        direction: Direction,
    ) -> Result<StepSummary, HistoryError> {
        let changes = self.with_retry(|q| {
            let Queue { events, spares, alloc, .. } = q;
            let node = events.get_mut(handle).ok_or(HistoryError::EventNotFound(handle))?;
            node.event.apply(direction, &mut *host, spares, alloc.as_mut())
        })?;
        let name = self
            .events
            .get(handle)
            .map(|n| n.event.name().to_string())
            .unwrap_or_default();
        Ok(StepSummary { event: handle, name, changes })
    }

    // ---- removal and truncation -------------------------------------------

    /// Unlink `event` from the history. If it was the cursor, the cursor
    /// moves to its predecessor, or its successor when there is none.
    pub fn remove(&mut self, event: EventHandle) -> Result<(), NotFound> {
        if self.unlink(event).is_none() {
            log_warn!("history: remove of unknown event {:?}", event);
            return Err(NotFound(event));
        }
        Ok(())
    }

    /// Drop events until the depth limit holds, always taking the one
    /// furthest from the cursor.
    pub fn truncate(&mut self) {
        match self.max_depth {
            DepthLimit::Unbounded => {}
            DepthLimit::Disabled => {
                self.events.clear();
                self.head = None;
                self.tail = None;
                self.cursor = None;
                self.depth = 0;
                self.spares.release_all();
            }
            DepthLimit::Bounded(max) => {
                while self.depth > max {
                    let Some(victim) = self.furthest_from_cursor() else {
                        break;
                    };
                    self.unlink(victim);
                }
            }
        }
    }

    /// Walk outward from the cursor in both directions at once. The side
    /// that runs out first is the nearer end, so the other end is returned.
    /// Equal distances resolve to the tail.
    fn furthest_from_cursor(&self) -> Option<EventHandle> {
        let Some(cursor) = self.cursor else {
            return self.tail;
        };
        let (mut back, mut forward) = (cursor, cursor);
        loop {
            let prev = self.events.get(back)?.prev;
            let next = self.events.get(forward)?.next;
            match (prev, next) {
                (None, _) => return self.tail,
                (Some(_), None) => return self.head,
                (Some(p), Some(n)) => {
                    back = p;
                    forward = n;
                }
            }
        }
    }

    /// Free memory by dropping up to [`LOW_MEMORY_PRUNE_COUNT`] of the oldest
    /// events before the cursor, then tell subscribers. Returns how many
    /// events were dropped.
    pub fn handle_low_memory(&mut self) -> usize {
        let mut removed = 0;
        while removed < LOW_MEMORY_PRUNE_COUNT {
            match (self.head, self.cursor) {
                (Some(head), Some(cursor)) if head != cursor => {
                    self.unlink(head);
                    removed += 1;
                }
                _ => break,
            }
        }
        log_warn!("history: low memory, dropped {} oldest events", removed);
        self.low_memory_subscribers
            .retain(|tx| tx.send(HistoryShortened).is_ok());
        removed
    }

    /// Subscribe to low-memory notifications.
    pub fn subscribe_low_memory(&mut self) -> Receiver<HistoryShortened> {
        let (tx, rx) = mpsc::channel();
        self.low_memory_subscribers.push(tx);
        rx
    }

    /// Change the depth limit and truncate right away.
    ///
    /// Returns `true` when undo was just re-enabled: the spare bitmaps were
    /// released while disabled, so every live layer must be registered again.
    pub fn set_max_depth(&mut self, depth: isize) -> bool {
        let limit = DepthLimit::from(depth);
        let reenabled = self.max_depth == DepthLimit::Disabled && limit != DepthLimit::Disabled;
        log_info!("history: depth limit {:?} -> {:?}", self.max_depth, limit);
        self.max_depth = limit;
        self.truncate();
        reenabled
    }

    /// Run `op`; on allocation failure shorten the history and run it once more.
    fn with_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut Self) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        match op(self) {
            Err(HistoryError::OutOfMemory(OutOfMemory { requested_bytes })) => {
                log_warn!("history: allocation of {} bytes failed, retrying", requested_bytes);
                self.handle_low_memory();
                op(self)
            }
            other => other,
        }
    }

    // ---- list plumbing ----------------------------------------------------

    fn link_after(&mut self, anchor: Option<EventHandle>, handle: EventHandle) {
        let next = match anchor {
            Some(a) => self.events.get(a).and_then(|n| n.next),
            None => self.head,
        };
        if let Some(node) = self.events.get_mut(handle) {
            node.prev = anchor;
            node.next = next;
        }
        match anchor.and_then(|a| self.events.get_mut(a)) {
            Some(a) => a.next = Some(handle),
            None => self.head = Some(handle),
        }
        match next.and_then(|n| self.events.get_mut(n)) {
            Some(n) => n.prev = Some(handle),
            None => self.tail = Some(handle),
        }
    }

    fn unlink(&mut self, handle: EventHandle) -> Option<Event> {
        let node = self.events.remove(handle)?;
        match node.prev.and_then(|p| self.events.get_mut(p)) {
            Some(p) => p.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.events.get_mut(n)) {
            Some(n) => n.prev = node.prev,
            None => self.tail = node.prev,
        }
        if self.cursor == Some(handle) {
            self.cursor = node.prev.or(node.next);
        }
        self.depth -= 1;
        Some(node.event)
    }

    fn discard_redo(&mut self) {
        let mut next = match self.cursor {
            Some(cursor) => self.events.get(cursor).and_then(|n| n.next),
            None => self.head,
        };
        while let Some(handle) = next {
            next = self.events.get(handle).and_then(|n| n.next);
            self.unlink(handle);
        }
    }

    // ---- queries ----------------------------------------------------------

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> DepthLimit {
        self.max_depth
    }

    pub fn cursor(&self) -> Option<EventHandle> {
        self.cursor
    }

    pub fn head(&self) -> Option<EventHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<EventHandle> {
        self.tail
    }

    pub fn event(&self, handle: EventHandle) -> Option<&Event> {
        self.events.get(handle).map(|n| &n.event)
    }

    pub fn event_mut(&mut self, handle: EventHandle) -> Option<&mut Event> {
        self.events.get_mut(handle).map(|n| &mut n.event)
    }

    pub fn next_of(&self, handle: EventHandle) -> Option<EventHandle> {
        self.events.get(handle).and_then(|n| n.next)
    }

    pub fn prev_of(&self, handle: EventHandle) -> Option<EventHandle> {
        self.events.get(handle).and_then(|n| n.prev)
    }

    /// Handles from oldest to newest.
    pub fn handles(&self) -> Vec<EventHandle> {
        let mut out = Vec::with_capacity(self.depth);
        let mut next = self.head;
        while let Some(handle) = next {
            out.push(handle);
            next = self.next_of(handle);
        }
        out
    }

    /// Event names from oldest to newest.
    pub fn event_names(&self) -> Vec<String> {
        self.handles()
            .into_iter()
            .filter_map(|h| self.event(h).map(|e| e.name().to_string()))
            .collect()
    }

    /// Length of the list counted by walking it.
    pub fn walked_len(&self) -> usize {
        let mut len = 0;
        let mut next = self.head;
        while let Some(handle) = next {
            len += 1;
            next = self.next_of(handle);
        }
        len
    }

    pub fn can_undo(&self) -> bool {
        self.cursor
            .and_then(|c| self.event(c))
            .is_some_and(|e| !e.is_single_add_layer())
    }

    pub fn can_redo(&self) -> bool {
        match self.cursor {
            None => self.head.is_some(),
            Some(c) => self.next_of(c).is_some(),
        }
    }

    /// Name of the event the next undo would revert.
    pub fn undo_name(&self) -> Option<&str> {
        if !self.can_undo() {
            return None;
        }
        self.cursor.and_then(|c| self.event(c)).map(Event::name)
    }

    /// Name of the event the next redo would reapply.
    pub fn redo_name(&self) -> Option<&str> {
        let next = match self.cursor {
            None => self.head?,
            Some(c) => self.next_of(c)?,
        };
        self.event(next).map(Event::name)
    }

    /// The last repeatable action of the event at the cursor.
    pub fn repeatable_action(&self) -> Option<&ActionKind> {
        let event = self.event(self.cursor?)?;
        event
            .actions()
            .iter()
            .rev()
            .map(Action::kind)
            .find(|k| k.is_repeatable())
    }

    /// Bytes held by all events (excluding spare bitmaps).
    pub fn memory_usage(&self) -> usize {
        self.events.values().map(|n| n.event.memory_bytes()).sum()
    }
}
