use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Streaming market-data endpoint (Huobi public websocket).
pub const WS_ENDPOINT: &str = "wss://api.huobi.pro/ws";

/// Client id echoed on every subscribe request.
pub const CLIENT_ID: &str = "id1";

/// Inclusive historical window requested per asset, as naive UTC timestamps.
pub const WINDOW_START: &str = "2023-09-01 00:00:00";
pub const WINDOW_END: &str = "2023-09-01 23:00:00";

/// Upper bound on waiting for a single inbound frame. The terminating
/// heartbeat normally arrives within a few seconds of the data batch; a
/// silent remote must not hang the run forever.
pub const SESSION_READ_TIMEOUT_SECS: u64 = 30;

// ── Frontier sweep settings ─────────────────────────────────────────────────
/// Number of evenly spaced target returns across the sweep range.
pub const TARGET_GRID_POINTS: usize = 500;
/// Target-return sweep range, as fractional returns.
pub const TARGET_RETURN_MIN: f64 = -0.01;
pub const TARGET_RETURN_MAX: f64 = 0.01;
/// Iteration cap per constrained solve.
pub const SOLVER_MAX_ITER: usize = 300;

// ── Monte-Carlo sampler settings ────────────────────────────────────────────
/// Number of random portfolios drawn for the comparison cloud.
pub const MC_SAMPLES: usize = 10_000;
/// Rolling-max window over the vol-sorted cloud (envelope extraction).
pub const ENVELOPE_MAX_WINDOW: usize = 250;
/// Rolling-mean window applied after the max pass (envelope smoothing).
pub const ENVELOPE_MEAN_WINDOW: usize = 100;
