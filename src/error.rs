use thiserror::Error;

/// Failure while reading the AGI header block from a connection.
#[derive(Debug, Error)]
pub enum ProtocolParseError {
    #[error("connection closed before end of header block")]
    UnexpectedEof,
    #[error("malformed header line: {0:?}")]
    MalformedLine(String),
    #[error("header line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A variable did not have the shape a pipeline stage requires.
#[derive(Debug, Error)]
pub enum CoercionError {
    #[error("invalid request uri {value:?}: {source}")]
    InvalidUri {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request is not a uri: {0}")]
    NotAUri(String),
}

/// Anything that stops a connection before its call is registered.
#[derive(Debug, Error)]
pub enum AgiError {
    #[error(transparent)]
    Protocol(#[from] ProtocolParseError),
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

/// Signals a dialplan or confirmation handler may end a call with.
#[derive(Debug, Error)]
pub enum CallError {
    /// Deliberate request to stop handling the call. Not a defect.
    #[error("call hung up")]
    Hangup,
    #[error("no dialplan context: {0}")]
    NoContext(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}
