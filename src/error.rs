use std::fmt::Display;

/// Store errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A filesystem or compression failure.
    Io(String),
    /// An index block file name that cannot be parsed.
    MalformedName(String),
    /// A damaged gzip stream or trailer detected while reading a block.
    CorruptBlock(String),
    /// A previous background flush failed and the store is poisoned.
    FlushFailed,
    /// A cancellation token fired at a safe point.
    Interrupted,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::MalformedName(name) => write!(f, "bad index file name: {name}"),
            Error::CorruptBlock(msg) => write!(f, "corrupt index block: {msg}"),
            Error::FlushFailed => write!(f, "previous flush failed"),
            Error::Interrupted => write!(f, "operation interrupted"),
        }
    }
}

/// A bagdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Io(err.to_string())
    }
}
