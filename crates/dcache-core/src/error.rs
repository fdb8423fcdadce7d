/// Reason a hook event was not fully recorded. Never returned to the hook
/// layer; the collector folds these into its drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Dropped {
    #[error("group stats table exhausted")]
    TableExhausted,
    #[error("trace channel full")]
    ChannelFull,
}

/// Wire record could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record too short: {got} bytes, expected {expected}")]
    Truncated { got: usize, expected: usize },
    #[error("unknown operation code {0}")]
    Operation(u32),
    #[error("depth count {0} exceeds the 8-component limit")]
    Depth(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("event source '{0}' is already attached")]
    AlreadyAttached(String),
    #[error("event source '{name}' failed: {reason}")]
    Source { name: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
