use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rayon::prelude::*;

/// The raw random-portfolio cloud: parallel columns of expected return (%),
/// volatility (%), and the weight vector behind each draw.
#[derive(Clone, Debug)]
pub struct RandomPortfolios {
    pub returns: Vec<f64>,
    pub vols: Vec<f64>,
    pub weights: Vec<Vec<f64>>,
}

impl RandomPortfolios {
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }
}

/// Draws `n` random portfolios against percentage-scaled return statistics.
///
/// Each weight is sampled uniformly from (0,1) and the vector normalized by
/// its sum. That is a deliberate approximation of uniform simplex sampling
/// (it biases slightly toward the centroid) and is kept as the reference
/// behavior downstream comparisons assume. Draws are independent, so they
/// run on the rayon pool.
pub fn sample_portfolios(mean_pct: &DVector<f64>, cov_pct: &DMatrix<f64>, n: usize) -> RandomPortfolios {
    let k = mean_pct.len();

    let draws: Vec<(f64, f64, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map_init(rand::thread_rng, |rng, _| {
            let raw: Vec<f64> = (0..k).map(|_| rng.gen_range(0.0..1.0)).collect();
            let sum: f64 = raw.iter().sum();
            let weights: Vec<f64> = raw.iter().map(|v| v / sum).collect();

            let w = DVector::from_row_slice(&weights);
            let ret = mean_pct.dot(&w);
            let vol = (cov_pct * &w).dot(&w).max(0.0).sqrt();
            (ret, vol, weights)
        })
        .collect();

    let mut out = RandomPortfolios {
        returns: Vec::with_capacity(n),
        vols: Vec::with_capacity(n),
        weights: Vec::with_capacity(n),
    };
    for (ret, vol, weights) in draws {
        out.returns.push(ret);
        out.vols.push(vol);
        out.weights.push(weights);
    }
    out
}

/// Derives the smoothed empirical upper envelope of the cloud: sort by
/// volatility ascending, rolling max over `max_window` on both columns
/// (leading undefined rows dropped), then rolling mean over `mean_window`.
///
/// This is a plotting heuristic, distinct from the analytically solved
/// frontier and not required to match it. Returns (vol, return) pairs.
pub fn frontier_envelope(
    ports: &RandomPortfolios,
    max_window: usize,
    mean_window: usize,
) -> Vec<(f64, f64)> {
    let mut order: Vec<usize> = (0..ports.len()).collect();
    order.sort_by(|&a, &b| ports.vols[a].total_cmp(&ports.vols[b]));

    let vols: Vec<f64> = order.iter().map(|&i| ports.vols[i]).collect();
    let rets: Vec<f64> = order.iter().map(|&i| ports.returns[i]).collect();

    let vols = rolling_mean(&rolling_max(&vols, max_window), mean_window);
    let rets = rolling_mean(&rolling_max(&rets, max_window), mean_window);

    vols.into_iter().zip(rets).collect()
}

fn rolling_max(xs: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || xs.len() < window {
        return Vec::new();
    }
    xs.windows(window)
        .map(|w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .collect()
}

fn rolling_mean(xs: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || xs.len() < window {
        return Vec::new();
    }
    xs.windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}
