// ── Gesture model ──
//
// The gesture set itself is owned by a collaborator outside this crate;
// the core observes it through `GestureSetEvent`s to invalidate training
// and to order confidence output.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::vector::Vector;

/// Stable identity of a gesture class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GestureId(Uuid);

impl GestureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GestureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GestureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What the device should do when this gesture wins: light the matrix,
/// drive a pin, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub matrix: Option<[[bool; 5]; 5]>,
    pub pin: Option<PinOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinOutput {
    pub pin: u8,
    pub value: u8,
}

/// A gesture class with its training recordings.
///
/// Existence and set membership are identity-affecting; `output` is
/// metadata that can change without invalidating a trained model.
#[derive(Debug, Clone)]
pub struct Gesture {
    pub id: GestureId,
    pub name: String,
    pub recordings: Vec<Vec<Vector>>,
    pub output: OutputConfig,
}

impl Gesture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GestureId::new(),
            name: name.into(),
            recordings: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

/// Mutation notifications from the gesture-set owner.
///
/// The variant, not the content, decides what happens downstream:
/// `Added`/`Removed` invalidate the trained model, `OutputChanged` never
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureSetEvent {
    Added(GestureId),
    Removed(GestureId),
    OutputChanged(GestureId),
}
