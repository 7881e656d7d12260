use std::{fmt, io, result::Result as StdResult};

use crate::poll::{Handle, InterestClass};

pub type Result<T> = StdResult<T, SocketError>;

/// Every failure the crate reports, whether returned from a call or carried
/// as the payload of an event.
///
/// Precondition violations (`InvalidAddressOrPort`, `TransportInit`,
/// `Configuration`, `EmptyWrite`, `InvalidState`, `NotRegistered`) are
/// returned immediately from the offending call. I/O outcomes observed inside the reactor
/// (`ConnectionFailed`, `Read`, `Write`, `Accept`) are delivered to
/// handlers through events instead. `PollFatal` is the only error that
/// should stop a reactor loop.
#[derive(Debug)]
pub enum SocketError {
    InvalidAddressOrPort(String),
    TransportInit(String),
    Configuration(String),
    ConnectionInit(io::Error),
    ConnectionFailed(io::Error),
    ListenInit(io::Error),
    Read(io::Error),
    Write(io::Error),
    Accept(io::Error),
    EmptyWrite,
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    NotRegistered {
        class: InterestClass,
        handle: Handle,
    },
    PollFatal(io::Error),
    ReentrantPoll,
    Io(io::Error),
}

impl SocketError {
    pub(crate) fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        SocketError::InvalidState { operation, state }
    }

    /// The underlying OS error, if this failure came from a syscall.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            SocketError::ConnectionInit(e)
            | SocketError::ConnectionFailed(e)
            | SocketError::ListenInit(e)
            | SocketError::Read(e)
            | SocketError::Write(e)
            | SocketError::Accept(e)
            | SocketError::PollFatal(e)
            | SocketError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::InvalidAddressOrPort(msg) => write!(f, "Invalid address or port: {}", msg),
            SocketError::TransportInit(msg) => write!(f, "Transport init error: {}", msg),
            SocketError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            SocketError::ConnectionInit(e) => write!(f, "Connection init error: {}", e),
            SocketError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            SocketError::ListenInit(e) => write!(f, "Listen init error: {}", e),
            SocketError::Read(e) => write!(f, "Read error: {}", e),
            SocketError::Write(e) => write!(f, "Write error: {}", e),
            SocketError::Accept(e) => write!(f, "Accept error: {}", e),
            SocketError::EmptyWrite => write!(f, "Cannot write an empty buffer"),
            SocketError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while {}", operation, state)
            }
            SocketError::NotRegistered { class, handle } => {
                write!(f, "{:?} is not registered for {:?} readiness", handle, class)
            }
            SocketError::PollFatal(e) => write!(f, "Fatal poll error: {}", e),
            SocketError::ReentrantPoll => write!(f, "poll() called from inside a poll callback"),
            SocketError::Io(e) => write!(f, "IO Error: {}", e),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.io_error()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        SocketError::Io(err)
    }
}
