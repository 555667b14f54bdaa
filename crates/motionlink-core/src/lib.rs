// motionlink-core: streaming-classification pipeline between
// motionlink-device and consumers (CLI, embedding hosts).

pub mod buffer;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod model;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use buffer::SampleRing;
pub use classifier::{ClassifierEngine, ConfidenceStream, GestureConfidence, Model};
pub use config::SessionConfig;
pub use engine::{EngineState, PollingPredictor, PredictorConfig};
pub use error::CoreError;
pub use filter::{FilterKind, FilterPipeline};
pub use session::{
    CatastrophicReason, ConnectionState, DeviceButton, DeviceSession, LogOnlyRecovery,
    OutboundWrite, RecoveryHandler, ResumeMarker, SessionEvent,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Gesture, GestureId, GestureSetEvent, OutputConfig, PinOutput, TimestampedSample, Vector,
};
