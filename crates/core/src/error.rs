/// Result alias that carries the custom [`SonifierError`] type.
pub type Result<T> = std::result::Result<T, SonifierError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SonifierError {
    /// A sonifier was constructed over a zero-sized grid.
    #[error("pixel grid dimensions must be non-zero (got {width}x{height})")]
    InvalidDimensions { width: usize, height: usize },
    /// The configured frequency band is empty or inverted.
    #[error("high frequency {high} Hz must be above low frequency {low} Hz")]
    InvalidFrequencyRange { low: f32, high: f32 },
    /// A pixel grid did not match the dimensions the sonifier was built for.
    #[error(
        "pixel grid is {actual_width}x{actual_height} but the sonifier \
         expects {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },
    /// A scheduled envelope was rejected before any of it was applied.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
    /// The audio output device could not be opened.
    #[error("audio output device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A backend call referenced a node handle it never created.
    #[error("unknown synthesis node handle {0}")]
    UnknownNode(usize),
    /// Catch-all for conditions that do not warrant their own variant, such
    /// as a poisoned lock on shared sonifier state.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around configuration (de)serialisation errors.
    #[error("{0}")]
    Config(#[from] serde_json::Error),
}

impl SonifierError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SonifierError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SonifierError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
