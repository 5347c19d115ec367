//! Session control errors

use thiserror::Error;

use super::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("comparison session {0} is already running")]
    AlreadyRunning(SessionId),
    #[error("no comparison session has been started")]
    NeverStarted,
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    /// The engine went away before the awaited session produced an outcome
    #[error("comparison session ended without an outcome")]
    Interrupted,
}
