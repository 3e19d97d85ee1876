use crate::history::{EventHandle, LayerId};

/// An allocation for history storage could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory {
    pub requested_bytes: usize,
}

impl std::fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "out of memory allocating {} bytes of history storage", self.requested_bytes)
    }
}

impl std::error::Error for OutOfMemory {}

/// The event handle does not refer to a live event in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound(pub EventHandle);

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event {:?} is not in the history queue", self.0)
    }
}

impl std::error::Error for NotFound {}

/// Error type for history operations
#[derive(Debug)]
pub enum HistoryError {
    OutOfMemory(OutOfMemory),
    EventNotFound(EventHandle),
    /// No spare bitmap was registered for the layer.
    UnregisteredLayer(LayerId),
    /// The host has no live bitmap for a layer the history needs to restore.
    MissingLayer(LayerId),
    Settings(String),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::OutOfMemory(e) => write!(f, "{}", e),
            HistoryError::EventNotFound(h) => write!(f, "event {:?} is not in the history queue", h),
            HistoryError::UnregisteredLayer(id) => write!(f, "layer {} has no spare bitmap registered", id),
            HistoryError::MissingLayer(id) => write!(f, "layer {} is not present in the document", id),
            HistoryError::Settings(e) => write!(f, "settings error: {}", e),
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HistoryError::OutOfMemory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OutOfMemory> for HistoryError {
    fn from(e: OutOfMemory) -> Self {
        HistoryError::OutOfMemory(e)
    }
}

impl From<NotFound> for HistoryError {
    fn from(e: NotFound) -> Self {
        HistoryError::EventNotFound(e.0)
    }
}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Settings(e.to_string())
    }
}
