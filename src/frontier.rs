use nalgebra::{DMatrix, DVector};

/// Constraint residual tolerance for a converged solve.
const FEAS_TOL: f64 = 1e-8;
/// Bound-violation tolerance before a weight gets clamped.
const BOUND_TOL: f64 = 1e-10;
/// Volatility below this is treated as numerically zero when forming Sharpe.
const VOL_EPS: f64 = 1e-12;

/// One solved frontier point's weight vector plus derived columns.
#[derive(Clone, Debug)]
pub struct WeightRow {
    /// Weights in `Asset::ALL` column order, each in [0, 1], summing to 1.
    pub weights: Vec<f64>,
    pub sharpe: f64,
    pub sd: f64,
}

/// The solved efficient frontier: three parallel sequences, truncated at the
/// first target that failed to converge.
#[derive(Clone, Debug, Default)]
pub struct Frontier {
    pub volatilities: Vec<f64>,
    pub target_returns: Vec<f64>,
    pub weight_rows: Vec<WeightRow>,
}

impl Frontier {
    pub fn len(&self) -> usize {
        self.target_returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_returns.is_empty()
    }

    /// Frontier point with the best Sharpe ratio, if any converged.
    pub fn best_sharpe(&self) -> Option<(f64, &WeightRow)> {
        self.weight_rows
            .iter()
            .zip(self.target_returns.iter())
            .filter(|(row, _)| row.sharpe.is_finite())
            .max_by(|(a, _), (b, _)| a.sharpe.partial_cmp(&b.sharpe).unwrap())
            .map(|(row, &target)| (target, row))
    }
}

pub fn portfolio_return(weights: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    mu.dot(weights)
}

/// Portfolio standard deviation sqrt(wᵀΣw), guarded against tiny negative
/// quadratic forms from floating-point round-off.
pub fn portfolio_sd(weights: &DVector<f64>, cov: &DMatrix<f64>) -> f64 {
    (cov * weights).dot(weights).max(0.0).sqrt()
}

/// Return over volatility. A numerically zero volatility yields NaN rather
/// than a division fault.
pub fn sharpe(weights: &DVector<f64>, mu: &DVector<f64>, cov: &DMatrix<f64>) -> f64 {
    let sd = portfolio_sd(weights, cov);
    if sd <= VOL_EPS {
        f64::NAN
    } else {
        portfolio_return(weights, mu) / sd
    }
}

/// Evenly spaced target returns across [lo, hi], inclusive at both ends.
pub fn target_grid(points: usize, lo: f64, hi: f64) -> Vec<f64> {
    if points == 1 {
        return vec![lo];
    }
    let step = (hi - lo) / (points as f64 - 1.0);
    (0..points).map(|i| lo + step * i as f64).collect()
}

/// Sweeps the ascending target grid, solving a constrained minimum-variance
/// program per point.
///
/// The sweep stops entirely at the first non-converging solve: infeasibility
/// at a low target implies infeasibility further out for this instrument
/// set, so the remaining targets are never attempted. The three output
/// sequences always share one length.
pub fn solve_frontier(mu: &DVector<f64>, cov: &DMatrix<f64>, targets: &[f64]) -> Frontier {
    let mut frontier = Frontier::default();
    for &target in targets {
        let Some(weights) = min_variance_at_target(mu, cov, target, crate::config::SOLVER_MAX_ITER)
        else {
            break;
        };
        let sd = portfolio_sd(&weights, cov);
        frontier.volatilities.push(sd);
        frontier.target_returns.push(target);
        frontier.weight_rows.push(WeightRow {
            weights: weights.iter().copied().collect(),
            sharpe: sharpe(&weights, mu, cov),
            sd,
        });
    }
    frontier
}

/// Minimizes portfolio volatility subject to Σwᵢ = 1, μᵀw = target and
/// 0 ≤ wᵢ ≤ 1, via a sequence of equality-constrained QP subproblems with an
/// active working set for the bounds.
///
/// Each subproblem solves the KKT system over the currently free weights;
/// the worst bound violator is clamped and the solve repeats, capped at
/// `max_iter`. `None` signals non-convergence (the sweep's stop condition),
/// covering both infeasible targets and singular KKT systems.
pub fn min_variance_at_target(
    mu: &DVector<f64>,
    cov: &DMatrix<f64>,
    target: f64,
    max_iter: usize,
) -> Option<DVector<f64>> {
    let n = mu.len();
    if n == 0 {
        return None;
    }

    // Bound state per weight: None = free, Some(v) = clamped at v.
    let mut clamped: Vec<Option<f64>> = vec![None; n];

    for _ in 0..max_iter {
        let free: Vec<usize> = (0..n).filter(|&i| clamped[i].is_none()).collect();
        let m = free.len();

        if m < 2 {
            // Not enough freedom left to satisfy both equalities in general;
            // fill the remaining weight from the sum constraint and accept
            // only an exactly feasible vertex.
            let fixed_sum: f64 = clamped.iter().flatten().sum();
            let mut w = DVector::zeros(n);
            for (i, c) in clamped.iter().enumerate() {
                if let Some(v) = c {
                    w[i] = *v;
                }
            }
            if m == 1 {
                let rest = 1.0 - fixed_sum;
                if !(-BOUND_TOL..=1.0 + BOUND_TOL).contains(&rest) {
                    return None;
                }
                w[free[0]] = rest.clamp(0.0, 1.0);
            } else if (fixed_sum - 1.0).abs() > FEAS_TOL {
                return None;
            }
            if (portfolio_return(&w, mu) - target).abs() > FEAS_TOL {
                return None;
            }
            return Some(w);
        }

        // KKT system over the free block:
        //   [ 2Σ_ff  Aᵀ ] [w_f]   [ -2Σ_fc w_c ]
        //   [  A     0  ] [ λ ] = [     b      ]
        // with A = [1ᵀ; μ_fᵀ] and b adjusted for the clamped components.
        let fixed_sum: f64 = clamped.iter().flatten().sum();
        let fixed_ret: f64 = clamped
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|v| v * mu[i]))
            .sum();

        let dim = m + 2;
        let mut kkt = DMatrix::zeros(dim, dim);
        let mut rhs = DVector::zeros(dim);

        for (a, &i) in free.iter().enumerate() {
            for (b, &j) in free.iter().enumerate() {
                kkt[(a, b)] = 2.0 * cov[(i, j)];
            }
            kkt[(a, m)] = 1.0;
            kkt[(m, a)] = 1.0;
            kkt[(a, m + 1)] = mu[i];
            kkt[(m + 1, a)] = mu[i];

            let cross: f64 = clamped
                .iter()
                .enumerate()
                .filter_map(|(j, c)| c.map(|v| cov[(i, j)] * v))
                .sum();
            rhs[a] = -2.0 * cross;
        }
        rhs[m] = 1.0 - fixed_sum;
        rhs[m + 1] = target - fixed_ret;

        // The two constraint rows can be linearly dependent (all free assets
        // sharing one expected return makes μ a multiple of 1), which leaves
        // the KKT matrix singular even though the target is feasible. Fall
        // back to a least-squares solve there; the feasibility checks below
        // reject any target the degenerate system cannot actually satisfy.
        let solution = match kkt.clone().lu().solve(&rhs) {
            Some(s) => s,
            None => kkt.svd(true, true).solve(&rhs, 1e-12).ok()?,
        };

        let mut w = DVector::zeros(n);
        for (i, c) in clamped.iter().enumerate() {
            if let Some(v) = c {
                w[i] = *v;
            }
        }
        for (a, &i) in free.iter().enumerate() {
            w[i] = solution[a];
        }

        // Clamp the worst bound violator, or accept if all free weights are
        // inside the box.
        let mut worst: Option<(usize, f64, f64)> = None; // (index, bound, violation)
        for &i in &free {
            let (bound, violation) = if w[i] < -BOUND_TOL {
                (0.0, -w[i])
            } else if w[i] > 1.0 + BOUND_TOL {
                (1.0, w[i] - 1.0)
            } else {
                continue;
            };
            if worst.map_or(true, |(_, _, v)| violation > v) {
                worst = Some((i, bound, violation));
            }
        }

        match worst {
            Some((i, bound, _)) => clamped[i] = Some(bound),
            None => {
                for i in 0..n {
                    w[i] = w[i].clamp(0.0, 1.0);
                }
                if (w.sum() - 1.0).abs() > FEAS_TOL
                    || (portfolio_return(&w, mu) - target).abs() > FEAS_TOL
                {
                    return None;
                }
                return Some(w);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(values: &[f64]) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_row_slice(values))
    }

    fn sample_inputs() -> (DVector<f64>, DMatrix<f64>) {
        let mu = DVector::from_row_slice(&[0.004, 0.009, -0.002]);
        let cov = DMatrix::from_row_slice(
            3,
            3,
            &[
                4.0e-4, 1.0e-4, 5.0e-5, //
                1.0e-4, 9.0e-4, 8.0e-5, //
                5.0e-5, 8.0e-5, 2.5e-4,
            ],
        );
        (mu, cov)
    }

    #[test]
    fn test_solved_weights_live_on_the_simplex() {
        let (mu, cov) = sample_inputs();
        let targets = target_grid(100, -0.002, 0.009);
        let frontier = solve_frontier(&mu, &cov, &targets);

        assert!(!frontier.is_empty());
        for row in &frontier.weight_rows {
            let sum: f64 = row.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "weights must sum to 1, got {}", sum);
            for &w in &row.weights {
                assert!((-1e-6..=1.0 + 1e-6).contains(&w), "weight {} out of [0,1]", w);
            }
        }
    }

    #[test]
    fn test_output_sequences_share_length_and_grid_order() {
        let (mu, cov) = sample_inputs();
        let targets = target_grid(200, -0.002, 0.009);
        let frontier = solve_frontier(&mu, &cov, &targets);

        assert_eq!(frontier.volatilities.len(), frontier.target_returns.len());
        assert_eq!(frontier.volatilities.len(), frontier.weight_rows.len());
        for pair in frontier.target_returns.windows(2) {
            assert!(pair[0] < pair[1], "targets must stay strictly increasing");
        }
    }

    #[test]
    fn test_sweep_stops_at_first_nonconvergence() {
        let mu = DVector::from_row_slice(&[0.001, 0.002, 0.003]);
        let cov = diag(&[1.0e-4, 2.0e-4, 3.0e-4]);
        // Feasible long-only returns span [0.001, 0.003]; the grid walks past
        // the upper end.
        let targets = vec![0.0015, 0.002, 0.0025, 0.0035, 0.004];
        let frontier = solve_frontier(&mu, &cov, &targets);

        assert_eq!(frontier.len(), 3);
        assert_eq!(*frontier.target_returns.last().unwrap(), 0.0025);
        assert!(frontier
            .target_returns
            .iter()
            .all(|&t| t < 0.003 + 1e-12));
    }

    #[test]
    fn test_infeasible_first_target_yields_empty_frontier() {
        let mu = DVector::from_row_slice(&[0.001, 0.002, 0.003]);
        let cov = diag(&[1.0e-4, 2.0e-4, 3.0e-4]);
        let targets = vec![-0.01, 0.002];
        let frontier = solve_frontier(&mu, &cov, &targets);
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_uncorrelated_assets_concentrate_on_extreme_target() {
        // The lowest-volatility asset also carries the highest return, so the
        // only way to hit that return target is to hold it outright.
        let mu = DVector::from_row_slice(&[0.010, 0.002, 0.001]);
        let cov = diag(&[1.0e-5, 4.0e-4, 6.0e-4]);

        let w = min_variance_at_target(&mu, &cov, 0.010, 300).unwrap();
        assert!(w[0] > 0.99, "expected concentration, got {:?}", w);
        assert!((w.sum() - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_interior_target_prefers_low_variance_mix() {
        let mu = DVector::from_row_slice(&[0.002, 0.002, 0.002]);
        let cov = diag(&[1.0e-4, 1.0e-4, 1.0e-4]);

        // Identical assets: the minimum-variance mix at the common return is
        // the equal-weight portfolio.
        let w = min_variance_at_target(&mu, &cov, 0.002, 300).unwrap();
        for i in 0..3 {
            assert!((w[i] - 1.0 / 3.0).abs() < 1e-6, "got {:?}", w);
        }
    }

    #[test]
    fn test_dependent_constraints_still_converge() {
        // With every asset at the same expected return the return constraint
        // is a multiple of the sum constraint; the solve must still accept
        // the matching target instead of reporting non-convergence.
        let mu = DVector::from_row_slice(&[0.002, 0.002, 0.002]);
        let cov = diag(&[1.0e-4, 2.0e-4, 3.0e-4]);

        let frontier = solve_frontier(&mu, &cov, &[0.002]);
        assert_eq!(frontier.len(), 1);
        let sum: f64 = frontier.weight_rows[0].weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_dependent_constraints_reject_unreachable_target() {
        // Same degeneracy, but a target no mix can reach must stay a
        // non-convergence, not a bogus solution.
        let mu = DVector::from_row_slice(&[0.002, 0.002, 0.002]);
        let cov = diag(&[1.0e-4, 2.0e-4, 3.0e-4]);

        assert!(min_variance_at_target(&mu, &cov, 0.004, 300).is_none());
    }

    #[test]
    fn test_degenerate_volatility_yields_nan_sharpe() {
        let mu = DVector::from_row_slice(&[0.001, 0.001]);
        let cov = DMatrix::zeros(2, 2);
        let w = DVector::from_row_slice(&[0.5, 0.5]);
        assert!(sharpe(&w, &mu, &cov).is_nan());
    }

    #[test]
    fn test_volatility_guard_against_roundoff() {
        // A covariance quadratic form that rounds to a tiny negative must
        // not produce NaN volatility.
        let cov = DMatrix::from_row_slice(2, 2, &[1e-18, -1e-18, -1e-18, 1e-18]);
        let w = DVector::from_row_slice(&[0.5, 0.5]);
        let sd = portfolio_sd(&w, &cov);
        assert!(sd >= 0.0 && sd.is_finite());
    }

    #[test]
    fn test_target_grid_is_inclusive_and_even() {
        let grid = target_grid(500, -0.01, 0.01);
        assert_eq!(grid.len(), 500);
        assert!((grid[0] + 0.01).abs() < 1e-15);
        assert!((grid[499] - 0.01).abs() < 1e-15);
        let step = grid[1] - grid[0];
        for pair in grid.windows(2) {
            assert!((pair[1] - pair[0] - step).abs() < 1e-12);
        }
    }
}
