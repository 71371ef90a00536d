//! Dispersion trend fitting

use ndarray::Array1;
use serde::Serialize;

use crate::error::{DgeError, Result};

/// Fitted dispersion-mean relationship
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DispersionTrend {
    /// dispersion(mean) = asympt_disp + extra_pois / mean
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// A single dispersion for every gene
    Mean { dispersion: f64 },
}

impl DispersionTrend {
    /// Trended dispersion at a given mean normalized count
    pub fn eval(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean { dispersion } => dispersion,
        }
    }
}

/// Fit the trend of gene-wise dispersions against mean normalized counts
///
/// Tries the parametric fit first and falls back to the mean of gene-wise
/// dispersions above `10 * min_disp` when it fails.
pub fn fit_dispersion_trend(
    base_means: &Array1<f64>,
    gene_dispersions: &Array1<f64>,
    min_disp: f64,
) -> Result<(DispersionTrend, Array1<f64>)> {
    let trend = match fit_parametric_trend(base_means, gene_dispersions, min_disp) {
        Ok(trend) => trend,
        Err(e) => {
            log::warn!("Parametric dispersion fit failed ({}); using mean dispersion", e);
            fit_mean_trend(gene_dispersions, min_disp)?
        }
    };
    log::debug!("Dispersion trend: {:?}", trend);

    let trended = base_means.mapv(|m| trend.eval(m));
    Ok((trend, trended))
}

fn fit_mean_trend(gene_dispersions: &Array1<f64>, min_disp: f64) -> Result<DispersionTrend> {
    let valid: Vec<f64> = gene_dispersions
        .iter()
        .filter(|&&d| d.is_finite() && d > 10.0 * min_disp)
        .copied()
        .collect();
    if valid.is_empty() {
        return Err(DgeError::TrendFittingFailed {
            reason: "all gene-wise dispersion estimates are at the lower bound".to_string(),
        });
    }
    Ok(DispersionTrend::Mean {
        dispersion: crate::stats::mean(&valid),
    })
}

/// Iterated Gamma-family GLM on disp ~ 1 + 1/mean, dropping genes whose
/// residual disp / fitted leaves (1e-4, 15) at each round
fn fit_parametric_trend(
    base_means: &Array1<f64>,
    gene_dispersions: &Array1<f64>,
    min_disp: f64,
) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = base_means
        .iter()
        .zip(gene_dispersions.iter())
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    if data.len() < 3 {
        return Err(DgeError::TrendFittingFailed {
            reason: "Not enough valid data points for trend fitting".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                fitted > 0.0 && {
                    let residual = disp / fitted;
                    residual > 1e-4 && residual < 15.0
                }
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(DgeError::TrendFittingFailed {
                reason: "Not enough good residuals for parametric fit".to_string(),
            });
        }

        let (new_coefs, glm_converged) = fit_gamma_identity(&good, coefs);
        coefs = new_coefs;
        log::debug!(
            "Parametric fit iter {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(DgeError::TrendFittingFailed {
                reason: format!("coefficients not positive (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }

        let log_change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if log_change < 1e-6 && glm_converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(DgeError::TrendFittingFailed {
        reason: "dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma GLM with identity link from `start`. Returns (coefs, converged).
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}
