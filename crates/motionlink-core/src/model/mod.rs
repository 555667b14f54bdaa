// ── Domain model ──

mod gesture;
mod vector;

pub use gesture::{Gesture, GestureId, GestureSetEvent, OutputConfig, PinOutput};
pub use vector::{TimestampedSample, Vector};
