//! Gene-wise dispersion estimation using Cox-Reid adjusted profile likelihood
//!
//! Group designs only (intercept, or intercept + one indicator), so the fitted
//! means come from the linear model on normalized counts rather than NB IRLS.
//! The likelihood, its derivative and both optimizers are shared with MAP
//! estimation, which adds a log-normal prior.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::dispersion::DispersionParams;
use crate::error::{DgeError, Result};
use crate::glm::linalg::{log_det_symmetric, solve_symmetric, trace_inv_product, xtwx};
use crate::glm::MIN_MU;

/// Log-normal prior on the dispersion, centred on the trend
#[derive(Debug, Clone, Copy)]
pub(super) struct LogPrior {
    pub log_mean: f64,
    pub var: f64,
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub(super) struct LineSearch {
    pub alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

/// Fitted normalized-scale group means: X (X'X)^-1 X' y
fn linear_fit(normalized: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let p = design.ncols();
    let gram = xtwx(design, &vec![1.0; normalized.len()]);
    let mut xty = vec![0.0; p];
    for (i, &y) in normalized.iter().enumerate() {
        for j in 0..p {
            xty[j] += design[[i, j]] * y;
        }
    }
    let beta = solve_symmetric(&gram, &xty, p);
    (0..normalized.len())
        .map(|i| (0..p).map(|j| design[[i, j]] * beta[j]).sum())
        .collect()
}

/// Expected counts from the linear model, floored at MIN_MU
pub fn linear_model_mu(counts: &[f64], size_factors: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();
    linear_fit(&normalized, design)
        .into_iter()
        .zip(size_factors)
        .map(|(m, &s)| (m * s).max(MIN_MU))
        .collect()
}

/// Moment estimate sum(((y - mu)^2 - mu) / mu^2) / (m - p) on normalized counts
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (n, p) = design.dim();
    if n <= p {
        return f64::INFINITY;
    }
    let sum: f64 = linear_fit(normalized, design)
        .iter()
        .zip(normalized)
        .map(|(&mu, &y)| {
            let mu = mu.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / (n - p) as f64).max(0.0)
}

/// (var - xim * mean) / mean^2 where xim is the mean of inverse size factors
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let mean = crate::stats::mean(normalized);
    if mean <= 1e-10 {
        return f64::INFINITY;
    }
    let var = crate::stats::sample_variance(normalized);
    (var - xim * mean) / (mean * mean)
}

/// Cox-Reid adjusted log likelihood of log(alpha), plus the prior when given
pub(super) fn log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let mut ll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    for (&y, &mu_i) in counts.iter().zip(mu) {
        let mu_i = mu_i.max(1e-10);
        ll += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
        ll -= y * (mu_i + alpha_inv).ln();
        ll -= alpha_inv * (1.0 + mu_i * alpha).ln();
        weights.push(1.0 / (1.0 / mu_i + alpha));
    }

    let p = design.ncols();
    let cr = log_det_symmetric(&xtwx(design, &weights), p)
        .map(|ld| -0.5 * ld)
        .unwrap_or(0.0);

    let prior_term = prior
        .map(|pr| -0.5 * (log_alpha - pr.log_mean).powi(2) / pr.var)
        .unwrap_or(0.0);

    ll + cr + prior_term
}

/// Derivative of `log_posterior` with respect to log(alpha)
pub(super) fn d_log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;
    let alpha_sq = alpha * alpha;

    let mut dll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    let mut dweights = Vec::with_capacity(counts.len());
    for (&y, &mu_i) in counts.iter().zip(mu) {
        let mu_i = mu_i.max(1e-10);
        dll += (digamma(alpha_inv) + (1.0 + mu_i * alpha).ln() - mu_i * alpha / (1.0 + mu_i * alpha)
            - digamma(y + alpha_inv)
            + y / (mu_i + alpha_inv))
            / alpha_sq;
        let w = 1.0 / (1.0 / mu_i + alpha);
        weights.push(w);
        dweights.push(-w * w);
    }

    // d/dalpha of -0.5 log|B| = -0.5 tr(B^-1 dB)
    let p = design.ncols();
    let b = xtwx(design, &weights);
    let db = xtwx(design, &dweights);
    let dcr = -0.5 * trace_inv_product(&b, &db, p);

    let prior_term = prior
        .map(|pr| -(log_alpha - pr.log_mean) / pr.var)
        .unwrap_or(0.0);

    (dll + dcr) * alpha + prior_term
}

/// Armijo line search on log(alpha) with the mean held fixed
pub(super) fn line_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    alpha_init: f64,
    max_disp: f64,
    params: &DispersionParams,
    prior: Option<LogPrior>,
) -> LineSearch {
    const MIN_LOG_PROPOSAL: f64 = -30.0;
    const MAX_LOG_PROPOSAL: f64 = 10.0;
    const EPSILON: f64 = 1e-4;
    let min_log_alpha = (params.min_disp / 10.0).ln();

    let mut log_alpha = alpha_init.max(1e-10).ln().clamp(MIN_LOG_PROPOSAL, max_disp.ln());
    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let raw = log_alpha + kappa * dlp;
        if raw < MIN_LOG_PROPOSAL {
            kappa = (MIN_LOG_PROPOSAL - log_alpha) / dlp;
        }
        if raw > MAX_LOG_PROPOSAL {
            kappa = (MAX_LOG_PROPOSAL - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;

        let lp_proposal = log_posterior(counts, design, mu, proposal, prior);
        // Armijo: -lp(proposal) <= -lp - kappa * eps * dlp^2
        if -lp_proposal <= -lp - kappa * EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_proposal - lp;
            lp = lp_proposal;

            if change < params.disp_tol || log_alpha < min_log_alpha {
                iterations = iter + 1;
                break;
            }

            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        alpha: log_alpha.exp().max(params.min_disp),
        initial_lp,
        last_lp: lp,
        iterations,
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Coarse-then-fine grid over log(alpha) in [min_disp, max_disp]
pub(super) fn grid_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<LogPrior>,
) -> f64 {
    const N_GRID: usize = 20;
    let lo = min_disp.ln();
    let hi = max_disp.ln();
    let delta = (hi - lo) / (N_GRID - 1) as f64;

    let evaluate = |grid: &[f64]| -> Vec<f64> {
        grid.iter()
            .map(|&la| log_posterior(counts, design, mu, la, prior))
            .collect()
    };

    let coarse: Vec<f64> = (0..N_GRID).map(|i| lo + i as f64 * delta).collect();
    let center = coarse[argmax(&evaluate(&coarse))];

    let fine_delta = 2.0 * delta / (N_GRID - 1) as f64;
    let fine: Vec<f64> = (0..N_GRID).map(|i| center - delta + i as f64 * fine_delta).collect();
    fine[argmax(&evaluate(&fine))].exp()
}

/// Upper bound on dispersion estimates
pub(super) fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Dispersion MLE for one gene. Returns (dispersion, mu).
///
/// Starts from the smaller of the rough and moment estimates, keeps that start
/// when the line search fails to improve on it, and falls back to a grid search
/// when the line search did not converge.
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n]);
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(n);
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(min_disp, max_disp);

    let mu = linear_model_mu(counts, size_factors, design);
    let fit = line_search(counts, design, &mu, alpha_init, max_disp, params, None);

    let no_increase = fit.last_lp < fit.initial_lp + fit.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase { alpha_init } else { fit.alpha };

    let converged = fit.iterations < params.maxit && fit.iterations != 1;
    if !converged && alpha > min_disp * 10.0 {
        alpha = grid_search(counts, design, &mu, min_disp, max_disp, None);
    }

    (alpha.clamp(min_disp, max_disp), mu)
}

/// Gene-wise dispersions for every row of `counts`, with the fitted means
pub fn estimate_gene_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    params: &DispersionParams,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let (n_genes, n_samples) = counts.dim();
    if size_factors.len() != n_samples || design.nrows() != n_samples {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} samples", n_samples),
            got: format!("{} size factors, {} design rows", size_factors.len(), design.nrows()),
        });
    }
    if design.nrows() == design.ncols() {
        log::warn!("No replicates: dispersion estimates will be unreliable");
    }

    let sf: Vec<f64> = size_factors.to_vec();
    let xim = sf.iter().map(|&s| 1.0 / s.max(1e-10)).sum::<f64>() / n_samples as f64;

    let results: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene_counts: Vec<f64> = counts.row(i).to_vec();
            estimate_dispersion_gene(&gene_counts, &sf, design, xim, params)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (disp, gene_mu)) in results.into_iter().enumerate() {
        dispersions[i] = disp;
        for (j, m) in gene_mu.into_iter().enumerate() {
            mu[[i, j]] = m;
        }
    }
    Ok((dispersions, mu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group_design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_linear_model_mu_is_group_mean() {
        let mu = linear_model_mu(&[10.0, 20.0, 30.0, 0.0, 0.0, 0.0], &[1.0; 6], &two_group_design());
        assert!((mu[0] - 20.0).abs() < 1e-9);
        assert!((mu[2] - 20.0).abs() < 1e-9);
        // zero group floored
        assert_eq!(mu[4], MIN_MU);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let counts = [25.0, 24.0, 25.0, 10.0, 20.0, 11.0];
        let design = two_group_design();
        let mu = linear_model_mu(&counts, &[1.0; 6], &design);
        let prior = Some(LogPrior {
            log_mean: (0.05_f64).ln(),
            var: 1.0,
        });
        for &la in &[-4.0, -2.0, 0.0] {
            for pr in [None, prior] {
                let h = 1e-5;
                let numeric = (log_posterior(&counts, &design, &mu, la + h, pr)
                    - log_posterior(&counts, &design, &mu, la - h, pr))
                    / (2.0 * h);
                let analytic = d_log_posterior(&counts, &design, &mu, la, pr);
                assert!(
                    (numeric - analytic).abs() < 1e-4 * (1.0 + analytic.abs()),
                    "log alpha {}: numeric {} analytic {}",
                    la,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_overdispersed_gene_gets_larger_dispersion() {
        let design = two_group_design();
        let sf = [1.0; 6];
        let xim = 1.0;
        let params = DispersionParams::default();
        let (tight, _) = estimate_dispersion_gene(&[100.0, 102.0, 98.0, 101.0, 99.0, 100.0], &sf, &design, xim, &params);
        let (noisy, _) = estimate_dispersion_gene(&[20.0, 180.0, 60.0, 150.0, 30.0, 90.0], &sf, &design, xim, &params);
        assert!(noisy > tight, "noisy {} tight {}", noisy, tight);
        assert!(noisy > 0.1);
    }

    #[test]
    fn test_dispersion_bounded_by_max_disp() {
        let design = two_group_design();
        let (disp, _) = estimate_dispersion_gene(
            &[0.0, 0.0, 500.0, 0.0, 1.0, 0.0],
            &[1.0; 6],
            &design,
            1.0,
            &DispersionParams::default(),
        );
        assert!(disp <= 10.0 && disp >= 1e-8);
    }

    #[test]
    fn test_all_zero_gene_is_nan() {
        let (disp, mu) = estimate_dispersion_gene(&[0.0; 6], &[1.0; 6], &two_group_design(), 1.0, &DispersionParams::default());
        assert!(disp.is_nan());
        assert_eq!(mu, vec![0.0; 6]);
    }

    #[test]
    fn test_gene_wise_dispersion_matrix() {
        let counts = array![
            [100.0, 120.0, 90.0, 110.0, 95.0, 105.0],
            [500.0, 550.0, 480.0, 520.0, 490.0, 510.0],
            [50.0, 45.0, 55.0, 48.0, 52.0, 50.0]
        ];
        let sf = Array1::from_elem(6, 1.0);
        let (disp, mu) =
            estimate_gene_dispersions(counts.view(), &sf, &two_group_design(), &DispersionParams::default()).unwrap();
        assert_eq!(disp.len(), 3);
        assert!(disp.iter().all(|&x| x > 0.0));
        assert_eq!(mu.dim(), (3, 6));
    }

    #[test]
    fn test_intercept_only_design() {
        let design = Array2::from_elem((4, 1), 1.0);
        let (disp, mu) = estimate_dispersion_gene(&[10.0, 30.0, 12.0, 40.0], &[1.0; 4], &design, 1.0, &DispersionParams::default());
        assert!(disp.is_finite() && disp > 0.0);
        assert!((mu[0] - 23.0).abs() < 1e-9);
    }
}
