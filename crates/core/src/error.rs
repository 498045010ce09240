/// Result alias that carries the custom [`LightshowError`] type.
pub type Result<T> = std::result::Result<T, LightshowError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LightshowError {
    /// A configuration value is out of range. The session or dispatcher is not
    /// constructed; the caller decides whether to fall back to defaults.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A sink could not deliver a colour command.
    #[error("sink `{sink}` failed: {message}")]
    Sink { sink: String, message: String },
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LightshowError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a sink delivery error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

impl From<&str> for LightshowError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightshowError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
