use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An error raised while talking to memcached.
#[derive(Debug)]
pub enum Error {
    /// An error communicating over the wire.
    Io(std::io::Error),
    /// A key or value rejected before any bytes were sent.
    IllegalInput(String),
    /// The server replied `ERROR`: it did not recognize the command,
    /// usually a version mismatch or a bug in this library.
    UnknownCommand(String),
    /// The server replied `CLIENT_ERROR` while parsing a request.
    Client(String),
    /// The server replied `SERVER_ERROR` while processing a request.
    Server(String),
    /// A reply that matches no recognized pattern.
    Unknown(String),
    /// The peer closed the connection in the middle of a frame.
    UnexpectedClose,
    /// An error caused by (de-)serializing a value.
    Bincode(bincode::Error),
    /// Every pool member is leased and the pool is at capacity.
    PoolExhausted,
    /// The hasher has no live node left to route to.
    NoServers,
}

impl Error {
    /// Whether this is a socket-layer failure. Only these feed the
    /// cluster failure state machine; semantic errors leave the server
    /// state untouched.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Bincode(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::Io(err) => write!(f, "IoError: {}", err),
            Error::IllegalInput(msg) => write!(f, "IllegalInput: {}", msg),
            Error::UnknownCommand(cmd) => write!(f, "UnknownCommandError: {}", cmd),
            Error::Client(msg) => write!(f, "ClientError: {}", msg),
            Error::Server(msg) => write!(f, "ServerError: {}", msg),
            Error::Unknown(msg) => write!(f, "UnknownError: {}", msg),
            Error::UnexpectedClose => write!(f, "connection closed unexpectedly"),
            Error::Bincode(err) => write!(f, "BincodeError: {}", err),
            Error::PoolExhausted => write!(f, "connection pool exhausted"),
            Error::NoServers => write!(f, "all servers seem to be down right now"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Bincode(err) => Some(err),
            _ => None,
        }
    }
}
