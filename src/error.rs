// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    // =============
    // Record errors
    // =============
    #[error("Record digest does not match its ID")]
    DigestMismatch,

    #[error("Record stamp outside the requested range")]
    OutOfRange,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // ======================
    // Network-related errors
    // ======================
    #[error("Fetch from peer failed: {0}")]
    FetchFailed(String),

    #[error("Timeout Error")]
    TimeoutError,

    // =============
    // Crypto errors
    // =============
    #[error("Key derivation exhausted its retry budget")]
    KeyDerivation,

    // ===========
    // Misc errors
    // ===========
    #[error("Regex error: {0}")]
    RegexError(String),

    #[error(transparent)]
    SystemTimeError(#[from] std::time::SystemTimeError),

    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Self::RegexError(err.to_string())
    }
}
