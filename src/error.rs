use thiserror::Error;

/// Convenient result alias for loading and playback.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors that may occur before playback begins. The SID model and filters
/// themselves never fail; runtime hiccups (instruction caps) are logged as
/// warnings and playback continues.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// File does not start with the `PSID` magic (RSID is also rejected).
    #[error("not a PSID file")]
    BadMagic,
    /// File too small for the header, or the payload offset points past EOF.
    #[error("file too small for a PSID header")]
    TruncatedHeader,
    /// Load address plus image size runs past the end of C64 memory.
    #[error("SID data continues past end of C64 memory")]
    ImageOverflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Surfaced from the host audio backend; the process exits cleanly.
    #[error("audio backend: {0}")]
    AudioBackend(String),
}
