use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::LayerId;

/// What a recorded action changed.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionKind {
    /// Nothing was stored; applying the action does nothing.
    Noop,
    /// Generic pixel edit of one layer.
    Content,
    /// A layer came into existence.
    AddLayer,
    /// A layer was removed from the document.
    DeleteLayer,
    /// A layer was cleared to its background.
    ClearLayer,
    /// Another layer was merged into this one.
    MergeLayer { merged_layer_id: LayerId },
    /// A painting tool stroke, kept so the stroke can be replayed.
    ToolStroke { script: ToolScript },
    /// An effect or transform, possibly changing the layer size.
    Manipulator {
        settings: ManipulatorSettings,
        manipulator_type: ManipulatorType,
        add_on_id: Option<u32>,
    },
}

impl ActionKind {
    /// Kinds a host can offer to repeat on another layer.
    pub fn is_repeatable(&self) -> bool {
        matches!(
            self,
            ActionKind::MergeLayer { .. } | ActionKind::ToolStroke { .. } | ActionKind::Manipulator { .. }
        )
    }

    /// Kinds that add or remove a whole layer instead of editing pixels.
    pub fn is_structural(&self) -> bool {
        matches!(self, ActionKind::AddLayer | ActionKind::DeleteLayer)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Noop => "No-op",
            ActionKind::Content => "Edit",
            ActionKind::AddLayer => "Add Layer",
            ActionKind::DeleteLayer => "Delete Layer",
            ActionKind::ClearLayer => "Clear Layer",
            ActionKind::MergeLayer { .. } => "Merge Layers",
            ActionKind::ToolStroke { .. } => "Tool Stroke",
            ActionKind::Manipulator { manipulator_type, .. } => manipulator_type.label(),
        }
    }
}

/// Built-in manipulator families, plus effects loaded from add-ons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManipulatorType {
    Translation,
    Rotation,
    Scale,
    Crop,
    HorizontalFlip,
    VerticalFlip,
    FreeTransform,
    AddOn,
}

impl ManipulatorType {
    pub fn label(&self) -> &'static str {
        match self {
            ManipulatorType::Translation => "Translate",
            ManipulatorType::Rotation => "Rotate",
            ManipulatorType::Scale => "Scale",
            ManipulatorType::Crop => "Crop",
            ManipulatorType::HorizontalFlip => "Flip Horizontally",
            ManipulatorType::VerticalFlip => "Flip Vertically",
            ManipulatorType::FreeTransform => "Free Transform",
            ManipulatorType::AddOn => "Effect",
        }
    }
}

/// Opaque, bincode-encoded manipulator settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManipulatorSettings(Vec<u8>);

impl ManipulatorSettings {
    pub fn encode<T: Serialize>(settings: &T) -> Result<Self, bincode::Error> {
        bincode::serialize(settings).map(Self)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bincode::Error> {
        bincode::deserialize(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A recorded tool path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolScript {
    pub tool: String,
    pub points: Vec<[f32; 2]>,
}
