mod config;
mod error;
mod frontier;
mod montecarlo;
mod series;
mod session;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mean-variance efficient frontier from streamed Huobi hourly klines"
)]
struct Args {
    /// Override the streaming market-data endpoint
    #[arg(long, default_value = config::WS_ENDPOINT)]
    endpoint: String,

    /// Number of random portfolios in the Monte-Carlo comparison cloud
    #[arg(long, default_value_t = config::MC_SAMPLES)]
    samples: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kline_frontier=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
    config::init_cpu_parallelism();
    let args = Args::parse();

    let window = session::TimeWindow::parse(config::WINDOW_START, config::WINDOW_END)?;

    // One session per asset, strictly sequential; a failed session
    // contributes no data but never aborts the run.
    let mut buffer: Vec<session::InboundMessage> = Vec::new();
    for asset in series::Asset::ALL {
        info!("Fetching {} history...", asset.symbol());
        if let Err(e) = session::run(&args.endpoint, asset, window, &mut buffer).await {
            warn!(
                "{}: session failed ({}); continuing with remaining assets",
                asset.symbol(),
                e
            );
        }
    }

    let (prices, returns) = series::build(&buffer)?;
    info!(
        "Assembled {} aligned price rows across {} assets ({} return rows)",
        prices.rows.len(),
        series::Asset::ALL.len(),
        returns.rows.len()
    );
    if let (Some(first), Some(last)) = (prices.timestamps.first(), returns.timestamps.last()) {
        info!("Aligned window: {} .. {}", first, last);
    }

    let mu = returns.cumulative_returns();
    let cov = returns.covariance();
    let targets = frontier::target_grid(
        config::TARGET_GRID_POINTS,
        config::TARGET_RETURN_MIN,
        config::TARGET_RETURN_MAX,
    );
    let front = frontier::solve_frontier(&mu, &cov, &targets);
    info!(
        "Efficient frontier: {} of {} targets converged before the sweep stopped",
        front.len(),
        targets.len()
    );

    let mean_pct = returns.mean_returns() * 100.0;
    let cov_pct = &cov * 10_000.0;
    let ports = montecarlo::sample_portfolios(&mean_pct, &cov_pct, args.samples);
    let envelope =
        montecarlo::frontier_envelope(&ports, config::ENVELOPE_MAX_WINDOW, config::ENVELOPE_MEAN_WINDOW);
    info!(
        "Monte-Carlo cloud: {} portfolios, {} envelope points",
        ports.len(),
        envelope.len()
    );

    print_summary(&front, &ports, &envelope);
    Ok(())
}

/// Prints the solved frontier and cloud summary. Rendering the scatter to an
/// image is a collaborator concern; this binary stops at the numbers.
fn print_summary(
    front: &frontier::Frontier,
    ports: &montecarlo::RandomPortfolios,
    envelope: &[(f64, f64)],
) {
    println!("\n╔══════════════════════════════════════════════════════════╗");
    println!("║              Efficient Frontier Summary                  ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!(
        "║  Converged frontier points : {:>6}                      ║",
        front.len()
    );

    if let Some((target, row)) = front.best_sharpe() {
        println!(
            "║  Best Sharpe               : {:>7.3}                     ║",
            row.sharpe
        );
        println!(
            "║  ...at target return       : {:>+7.3}%                    ║",
            target * 100.0
        );
        println!(
            "║  ...volatility             : {:>7.3}%                    ║",
            row.sd * 100.0
        );
        println!("╠══════════════════════════════════════════════════════════╣");
        println!("║  Weights at best Sharpe:                                 ║");
        for (asset, w) in series::Asset::ALL.iter().zip(row.weights.iter()) {
            println!(
                "║    {:<8} {:>7.2}%                                     ║",
                asset.symbol(),
                w * 100.0
            );
        }
    } else {
        println!("║  No target converged; frontier is empty.                 ║");
    }

    println!("╠══════════════════════════════════════════════════════════╣");
    println!(
        "║  Random portfolios sampled : {:>6}                      ║",
        ports.len()
    );
    if let (Some(first), Some(last)) = (envelope.first(), envelope.last()) {
        println!(
            "║  Envelope vol range        : {:.3}% – {:.3}%             ║",
            first.0, last.0
        );
        println!(
            "║  Envelope return range     : {:+.3}% – {:+.3}%           ║",
            first.1, last.1
        );
    }
    println!("╚══════════════════════════════════════════════════════════╝");
}
