use thiserror::Error;

/// Errors surfaced by the FEC encoder and decoder. None of these are fatal
/// to the surrounding session; lost groups are a silent outcome, not an error.
#[derive(Debug, Error)]
pub enum FecError {
    #[error("shard shorter than the 6-byte header")]
    MalformedShard,
    #[error("shard of {len} bytes exceeds the configured maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("singular coefficient matrix")]
    SingularMatrix,
    #[error("config error: {0}")]
    Config(String),
}

impl From<String> for FecError {
    fn from(s: String) -> Self {
        FecError::Config(s)
    }
}
