//! Variance Stabilizing Transformation (VST)
//!
//! Transforms count data to approximately homoskedastic log2-like values,
//! where variance is independent of mean. Used before Euclidean-distance
//! clustering of genes.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::dispersion::{estimate_gene_dispersions, fit_dispersion_trend, DispersionParams, DispersionTrend};
use crate::error::{DgeError, Result};
use crate::normalization::{estimate_size_factors, normalized_counts, SizeFactorMethod};
use crate::stats::{cmp_f64, median_in_place, sample_variance};

/// Genes used for blind dispersion estimation on large matrices
const NSUB: usize = 1000;

/// Dispersion used when no trend can be estimated at all
const FALLBACK_DISPERSION: f64 = 0.1;

/// Transformed matrix with the parameters that produced it
#[derive(Debug, Clone)]
pub struct VstResult {
    /// Transformed data (genes x samples)
    pub data: Array2<f64>,
    pub size_factors: Array1<f64>,
    pub trend: DispersionTrend,
}

/// Apply the variance stabilizing transformation to raw counts
///
/// Size factors and the dispersion trend are taken from a prior fit when
/// given. Otherwise they are estimated blind: median-of-ratios size factors
/// and an intercept-only dispersion fit on at most 1000 of the most variable
/// genes.
pub fn vst(
    counts: ArrayView2<f64>,
    size_factors: Option<&Array1<f64>>,
    trend: Option<&DispersionTrend>,
) -> Result<VstResult> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DgeError::EmptyData {
            reason: "VST needs at least one gene and one sample".to_string(),
        });
    }

    let size_factors = match size_factors {
        Some(sf) if sf.len() == n_samples => sf.clone(),
        Some(sf) => {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} size factors", n_samples),
                got: sf.len().to_string(),
            })
        }
        None => estimate_size_factors(counts, SizeFactorMethod::Ratio)?,
    };
    let norm_counts = normalized_counts(counts, &size_factors);

    let trend = match trend {
        Some(t) => *t,
        None => blind_trend(counts, &norm_counts, &size_factors)?,
    };

    let data = match trend {
        DispersionTrend::Parametric {
            asympt_disp,
            extra_pois,
        } => transform(&norm_counts, |q| vst_parametric_single(q, asympt_disp, extra_pois)),
        DispersionTrend::Mean { dispersion } => transform(&norm_counts, |q| vst_mean_single(q, dispersion)),
    };

    Ok(VstResult {
        data,
        size_factors,
        trend,
    })
}

/// Dispersion trend from an intercept-only fit, ignoring conditions
fn blind_trend(counts: ArrayView2<f64>, norm_counts: &Array2<f64>, size_factors: &Array1<f64>) -> Result<DispersionTrend> {
    let (n_genes, n_samples) = counts.dim();
    if n_samples < 2 {
        return Err(DgeError::InvalidInput {
            reason: "blind dispersion estimation needs at least two samples".to_string(),
        });
    }

    let selected: Vec<usize> = if n_genes > NSUB {
        let mut gene_vars: Vec<(usize, f64)> = norm_counts
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, row)| (i, sample_variance(&row.to_vec())))
            .collect();
        // stable: equal variances keep row order
        gene_vars.sort_by(|a, b| cmp_f64(&b.1, &a.1));
        let mut idx: Vec<usize> = gene_vars.iter().take(NSUB).map(|&(i, _)| i).collect();
        idx.sort_unstable();
        idx
    } else {
        (0..n_genes).collect()
    };

    let sub_counts = counts.select(Axis(0), &selected);
    let sub_norm = norm_counts.select(Axis(0), &selected);
    let base_means = sub_norm.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(selected.len()));
    let design = Array2::ones((n_samples, 1));
    let params = DispersionParams::default();

    let (gene_disp, _mu) = estimate_gene_dispersions(sub_counts.view(), size_factors, &design, &params)?;
    match fit_dispersion_trend(&base_means, &gene_disp, params.min_disp) {
        Ok((trend, _)) => Ok(trend),
        Err(e) => {
            let dispersion = moment_dispersion(&sub_norm);
            log::warn!("VST trend fit failed ({}); using moment dispersion {:.4}", e, dispersion);
            Ok(DispersionTrend::Mean { dispersion })
        }
    }
}

/// Median of (var - mean) / mean^2 over genes with mean above 1
fn moment_dispersion(norm_counts: &Array2<f64>) -> f64 {
    let mut dispersions: Vec<f64> = norm_counts
        .axis_iter(Axis(0))
        .filter_map(|row| {
            let values = row.to_vec();
            let mean = crate::stats::mean(&values);
            if mean <= 1.0 {
                return None;
            }
            let disp = (sample_variance(&values) - mean) / (mean * mean);
            (disp.is_finite() && disp > 0.0).then_some(disp)
        })
        .collect();
    if dispersions.is_empty() {
        return FALLBACK_DISPERSION;
    }
    median_in_place(&mut dispersions).max(1e-3)
}

fn transform<F>(norm_counts: &Array2<f64>, f: F) -> Array2<f64>
where
    F: Fn(f64) -> f64 + Sync,
{
    let (n_genes, n_samples) = norm_counts.dim();
    let flat: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .flat_map_iter(|i| {
            let row = norm_counts.row(i);
            (0..n_samples).map(move |j| row[j])
        })
        .map(|q| f(q.max(0.0)))
        .collect();
    Array2::from_shape_vec((n_genes, n_samples), flat).unwrap_or_else(|_| Array2::zeros((n_genes, n_samples)))
}

/// log2((1 + e + 2aq + 2 sqrt(aq (1 + e + aq))) / (4a)), applied to zeros as well
fn vst_parametric_single(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let a = asympt_disp;
    let e = extra_pois;
    let numerator = 1.0 + e + 2.0 * a * q + 2.0 * (a * q * (1.0 + e + a * q)).sqrt();
    let denominator = 4.0 * a;

    if numerator > 0.0 && denominator > 0.0 {
        (numerator / denominator).log2()
    } else {
        0.0
    }
}

/// (2 asinh(sqrt(aq)) - ln a - ln 4) / ln 2
fn vst_mean_single(q: f64, alpha: f64) -> f64 {
    if alpha <= 0.0 {
        return 0.0;
    }
    let asinh_term = 2.0 * (alpha * q).sqrt().asinh();
    (asinh_term - alpha.ln() - 4.0_f64.ln()) / std::f64::consts::LN_2
}
