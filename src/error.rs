use thiserror::Error;

/// Failures raised while fetching or assembling market data.
///
/// Protocol errors stay contained inside one asset's session: the per-asset
/// loop logs them and moves on, so a dead connection for one symbol never
/// aborts the whole run. Solver non-convergence is deliberately absent here;
/// it is an expected early-termination signal, not an error.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The connection failed before the terminating heartbeat was seen.
    #[error("transport error before heartbeat: {0}")]
    Transport(String),

    /// A frame could not be decompressed or parsed. Carries the best-effort
    /// decompressed text for diagnosis.
    #[error("frame decode failed: {reason} (raw: {raw})")]
    Decode { reason: String, raw: String },

    /// A data message's reply channel matched zero or multiple known assets.
    #[error("channel id {channel:?} matched {matches} known assets, expected exactly 1")]
    AmbiguousAsset { channel: String, matches: usize },

    /// No aligned rows survived assembly, so no return series exists.
    #[error("no fully aligned candle rows across all assets")]
    EmptySeries,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}
