#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("node is not the leader")]
    NotLeader,
    #[error("operation timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("state machine error: {0}")]
    StateMachine(String),
    #[error("cluster already has state; cannot bootstrap")]
    AlreadyBootstrapped,
    #[error("node is shut down")]
    Shutdown,
}

impl Error {
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }
}
