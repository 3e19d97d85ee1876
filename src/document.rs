use uuid::Uuid;

use crate::buffer::PixelBuffer;
use crate::error::HistoryError;
use crate::geometry::Rect;
use crate::history::{
    ActionKind, DepthLimit, EventHandle, InsertMode, LayerId, ManipulatorSettings, ManipulatorType, Queue,
    StepSummary,
};
use crate::host::{LayerHost, LayerStack};
use crate::settings::HistorySettings;

/// Single open document: its layers and their history.
#[derive(Debug)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub layers: LayerStack,
    pub history: Queue,
    pub insert_mode: InsertMode,
    pub is_dirty: bool,
}

impl Document {
    /// A document with one background layer of `width`×`height` filled with `background`.
    pub fn new_untitled(
        untitled_counter: usize,
        width: u32,
        height: u32,
        background: u32,
        settings: &HistorySettings,
    ) -> Result<Self, HistoryError> {
        Self::with_queue(
            format!("Untitled-{}", untitled_counter),
            PixelBuffer::new_filled(width, height, background),
            Queue::new(settings.depth_limit()),
            settings.insert_mode,
        )
    }

    /// A document whose history uses `history` (e.g. with a custom allocator).
    pub fn with_queue(
        name: String,
        background: PixelBuffer,
        mut history: Queue,
        insert_mode: InsertMode,
    ) -> Result<Self, HistoryError> {
        let mut layers = LayerStack::new();
        let id = layers.push_layer(background);
        if let Some(bitmap) = layers.layer_bitmap(id) {
            history.register_layer(id, bitmap)?;
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            layers,
            history,
            insert_mode,
            is_dirty: false,
        })
    }

    /// Hand every live layer to the history again, e.g. after undo was re-enabled.
    pub fn reregister_layers(&mut self) -> Result<(), HistoryError> {
        for (id, bitmap) in self.layers.iter() {
            self.history.register_layer(id, bitmap)?;
        }
        Ok(())
    }

    /// Seed the committed copy of `layer` again if the history had to drop it
    /// after a change it could not record.
    fn ensure_registered(&mut self, layer: LayerId) -> Result<(), HistoryError> {
        if self.history.max_depth() == DepthLimit::Disabled || self.history.spare_bitmap(layer).is_some() {
            return Ok(());
        }
        let bitmap = self
            .layers
            .layer_bitmap(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        log_warn!("history: registering layer {} again", layer);
        self.history.register_layer(layer, bitmap)
    }

    /// Paint on `layer` with `edit` and record the result as one event.
    ///
    /// Returns `None` when undo is disabled or the edit changed nothing.
    pub fn edit_layer(
        &mut self,
        name: &str,
        layer: LayerId,
        area: Rect,
        edit: impl FnOnce(&mut PixelBuffer),
    ) -> Result<Option<EventHandle>, HistoryError> {
        self.record_edit(name, layer, ActionKind::Content, area, edit)
    }

    /// Like [`edit_layer`](Self::edit_layer) with an explicit action kind.
    pub fn record_edit(
        &mut self,
        name: &str,
        layer: LayerId,
        kind: ActionKind,
        area: Rect,
        edit: impl FnOnce(&mut PixelBuffer),
    ) -> Result<Option<EventHandle>, HistoryError> {
        let registered = self.ensure_registered(layer);
        let bitmap = self
            .layers
            .layer_bitmap_mut(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        edit(bitmap);
        self.is_dirty = true;
        // The edit stands even when the history could not take it.
        registered?;

        let Some(event) = self.history.commit(name, None, self.insert_mode) else {
            return Ok(None);
        };
        let current = self
            .layers
            .layer_bitmap(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        let recorded = self.history.record_change(event, layer, kind, area, current);
        if self.history.discard_if_empty(event) {
            return recorded.map(|_| None);
        }
        recorded.map(|_| Some(event))
    }

    /// Run a manipulator that may produce a bitmap of a different size.
    pub fn manipulate_layer(
        &mut self,
        name: &str,
        layer: LayerId,
        manipulator_type: ManipulatorType,
        settings: ManipulatorSettings,
        manipulate: impl FnOnce(&PixelBuffer) -> PixelBuffer,
    ) -> Result<Option<EventHandle>, HistoryError> {
        let registered = self.ensure_registered(layer);
        let old = self
            .layers
            .layer_bitmap(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        let area = Rect::from_pixel_rect(old.bounds());
        let result = manipulate(old);
        self.layers.replace_layer_bitmap(layer, result);
        self.is_dirty = true;
        registered?;

        let Some(event) = self.history.commit(name, None, self.insert_mode) else {
            return Ok(None);
        };
        let kind = ActionKind::Manipulator {
            settings,
            manipulator_type,
            add_on_id: None,
        };
        let current = self
            .layers
            .layer_bitmap(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        let recorded = self.history.record_change(event, layer, kind, area, current);
        if self.history.discard_if_empty(event) {
            return recorded.map(|_| None);
        }
        recorded.map(|_| Some(event))
    }

    /// Add a layer on top and record it.
    pub fn add_layer(&mut self, bitmap: PixelBuffer) -> Result<LayerId, HistoryError> {
        let id = self.layers.push_layer(bitmap);
        self.is_dirty = true;
        if let Some(event) = self.history.commit("Add Layer", None, self.insert_mode)
            && let Some(bitmap) = self.layers.layer_bitmap(id)
        {
            let recorded = self
                .history
                .record_structural_change(event, id, ActionKind::AddLayer, bitmap);
            if recorded.is_err() {
                self.history.discard_if_empty(event);
            }
            recorded?;
        }
        Ok(id)
    }

    /// Remove a layer and record it.
    pub fn delete_layer(&mut self, layer: LayerId) -> Result<Option<EventHandle>, HistoryError> {
        let bitmap = self
            .layers
            .remove_layer(layer)
            .ok_or(HistoryError::MissingLayer(layer))?;
        self.is_dirty = true;
        let Some(event) = self.history.commit("Delete Layer", None, self.insert_mode) else {
            return Ok(None);
        };
        let recorded = self
            .history
            .record_structural_change(event, layer, ActionKind::DeleteLayer, &bitmap);
        if recorded.is_err() {
            self.history.discard_if_empty(event);
        }
        recorded.map(|_| Some(event))
    }

    pub fn undo(&mut self) -> Result<Option<StepSummary>, HistoryError> {
        let step = self.history.perform_undo(&mut self.layers)?;
        if step.is_some() {
            self.is_dirty = true;
        }
        Ok(step)
    }

    pub fn redo(&mut self) -> Result<Option<StepSummary>, HistoryError> {
        let step = self.history.perform_redo(&mut self.layers)?;
        if step.is_some() {
            self.is_dirty = true;
        }
        Ok(step)
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// All open documents, and the app-wide history depth applied to them.
#[derive(Debug)]
pub struct DocumentRegistry {
    documents: Vec<Document>,
    settings: HistorySettings,
    untitled_counter: usize,
}

impl DocumentRegistry {
    pub fn new(settings: HistorySettings) -> Self {
        Self {
            documents: Vec::new(),
            settings,
            untitled_counter: 0,
        }
    }

    pub fn settings(&self) -> &HistorySettings {
        &self.settings
    }

    pub fn open_untitled(&mut self, width: u32, height: u32, background: u32) -> Result<Uuid, HistoryError> {
        self.untitled_counter += 1;
        let doc = Document::new_untitled(self.untitled_counter, width, height, background, &self.settings)?;
        self.insert(doc)
    }

    /// Adopt a document, bringing its history in line with the app-wide depth.
    pub fn insert(&mut self, mut doc: Document) -> Result<Uuid, HistoryError> {
        if doc.history.max_depth() != self.settings.depth_limit()
            && doc.history.set_max_depth(self.settings.undo_queue_depth)
        {
            doc.reregister_layers()?;
        }
        let id = doc.id;
        self.documents.push(doc);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    pub fn close(&mut self, id: Uuid) -> Option<Document> {
        let idx = self.documents.iter().position(|d| d.id == id)?;
        Some(self.documents.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    /// Apply a new depth to every open document. Documents whose undo was
    /// re-enabled get their layers registered again; their ids are returned.
    pub fn set_max_depth(&mut self, depth: isize) -> Result<Vec<Uuid>, HistoryError> {
        log_info!(
            "history: app-wide depth {:?} -> {:?}",
            self.settings.depth_limit(),
            DepthLimit::from(depth)
        );
        self.settings.undo_queue_depth = depth;
        let mut reregistered = Vec::new();
        for doc in &mut self.documents {
            if doc.history.set_max_depth(depth) {
                doc.reregister_layers()?;
                reregistered.push(doc.id);
            }
        }
        Ok(reregistered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelRect;

    #[test]
    fn edit_undo_redo() {
        let mut doc = Document::new_untitled(1, 32, 32, 0, &HistorySettings::default()).unwrap();
        let bg = doc.layers.order()[0];
        let event = doc
            .edit_layer("Brush", bg, Rect::from_min_max(0.0, 0.0, 10.0, 10.0), |b| {
                b.fill_rect(PixelRect::new(2, 2, 5, 5), 6)
            })
            .unwrap();
        assert!(event.is_some());
        assert_eq!(doc.display_title(), "Untitled-1*");

        doc.undo().unwrap().unwrap();
        assert_eq!(doc.layers.layer_bitmap(bg).unwrap().get(3, 3), 0);
        doc.redo().unwrap().unwrap();
        assert_eq!(doc.layers.layer_bitmap(bg).unwrap().get(3, 3), 6);
    }

    #[test]
    fn no_op_edit_leaves_no_event() {
        let mut doc = Document::new_untitled(1, 16, 16, 0, &HistorySettings::default()).unwrap();
        let bg = doc.layers.order()[0];
        let event = doc
            .edit_layer("Nothing", bg, Rect::from_min_max(0.0, 0.0, 16.0, 16.0), |_| {})
            .unwrap();
        assert!(event.is_none());
        assert_eq!(doc.history.depth(), 0);
    }

    #[test]
    fn delete_layer_undo_restores_it() {
        let mut doc = Document::new_untitled(1, 8, 8, 0, &HistorySettings::default()).unwrap();
        let top = doc.add_layer(PixelBuffer::new_filled(8, 8, 3)).unwrap();
        doc.delete_layer(top).unwrap();
        assert!(!doc.layers.contains(top));

        doc.undo().unwrap().unwrap();
        assert!(doc.layers.contains(top));
        assert_eq!(doc.layers.layer_bitmap(top), doc.history.spare_bitmap(top));

        doc.redo().unwrap().unwrap();
        assert!(!doc.layers.contains(top));
    }

    #[test]
    fn registry_applies_depth_to_all_documents() {
        let mut reg = DocumentRegistry::new(HistorySettings::default());
        let a = reg.open_untitled(8, 8, 0).unwrap();
        let b = reg.open_untitled(8, 8, 0).unwrap();
        assert_eq!(reg.len(), 2);

        for id in [a, b] {
            let doc = reg.get_mut(id).unwrap();
            let bg = doc.layers.order()[0];
            for i in 0..4 {
                doc.edit_layer("Dot", bg, Rect::from_min_max(0.0, 0.0, 8.0, 8.0), |buf| buf.put(i, 0, 9))
                    .unwrap();
            }
        }

        assert!(reg.set_max_depth(2).unwrap().is_empty());
        assert!(reg.iter().all(|d| d.history.depth() == 2));

        reg.set_max_depth(0).unwrap();
        assert!(reg.iter().all(|d| d.history.depth() == 0 && d.history.spare_bitmap(0).is_none()));

        let reregistered = reg.set_max_depth(10).unwrap();
        assert_eq!(reregistered.len(), 2);
        assert!(reg.iter().all(|d| d.history.spare_bitmap(0) == d.layers.layer_bitmap(0)));

        assert!(reg.close(a).is_some());
        assert!(reg.get(a).is_none());
        assert_eq!(reg.settings().undo_queue_depth, 10);
    }
}
