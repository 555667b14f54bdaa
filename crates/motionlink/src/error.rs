use thiserror::Error;

/// CLI-level errors with process exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Core(#[from] motionlink_core::CoreError),

    #[error("{0}")]
    Device(#[from] motionlink_device::DeviceError),

    #[error("{0}")]
    Config(#[from] motionlink_config::ConfigError),

    #[error("no board found -- is the device plugged in?")]
    NoDevice,

    #[error("{0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Unsupported(_) => 2,
            Self::NoDevice => 3,
            // EX_TEMPFAIL: a supervisor should restart us.
            Self::Core(motionlink_core::CoreError::ConnectTimeout { .. }) => 75,
            _ => 1,
        }
    }
}
