use crate::error::Error;

/// The deterministic application hosted by the replicated log.
///
/// `apply` runs on every node in log order; its return value is handed
/// back to the caller that submitted the command on the leader. It must
/// not consult clocks, randomness, or I/O — replicas must compute the
/// same result from the same command sequence.
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one committed command and return the response bytes.
    fn apply(&self, command: &[u8]) -> Vec<u8>;

    /// Serialize the whole state.
    fn snapshot(&self) -> Vec<u8>;

    /// Replace the whole state atomically.
    fn restore(&self, snapshot: &[u8]) -> Result<(), Error>;
}
