//! Size factor estimation using the median of ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};
use crate::stats::median_in_place;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Median of ratios against the geometric mean over genes without zeros
    #[default]
    Ratio,
    /// Geometric mean over positive counts only, for sparse matrices
    PosCounts,
}

/// Estimate size factors, falling back to positive counts when every gene has a zero
///
/// Accounts for both sequencing depth and RNA composition bias.
pub fn estimate_size_factors(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    match method {
        SizeFactorMethod::Ratio => match estimate_size_factors_ratio(counts) {
            Err(DgeError::SizeFactorFailed { reason }) => {
                log::warn!("{}; falling back to positive-count geometric means", reason);
                estimate_size_factors_poscounts(counts)
            }
            other => other,
        },
        SizeFactorMethod::PosCounts => estimate_size_factors_poscounts(counts),
    }
}

/// Counts divided by their sample's size factor
pub fn normalized_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut col, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|x| x / sf);
    }
    normalized
}

fn check_not_empty(counts: &ArrayView2<f64>) -> Result<()> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DgeError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }
    Ok(())
}

/// Per-sample median of count / reference ratios
fn median_ratios(counts: &ArrayView2<f64>, reference: &[(usize, f64)], default: Option<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();
    let mut size_factors = Array1::zeros(n_samples);

    for j in 0..n_samples {
        let mut ratios: Vec<f64> = reference
            .iter()
            .filter_map(|&(i, geo_mean)| {
                let count = counts[[i, j]];
                (count > 0.0 && geo_mean > 0.0).then(|| count / geo_mean)
            })
            .collect();

        size_factors[j] = match (ratios.is_empty(), default) {
            (false, _) => median_in_place(&mut ratios),
            (true, Some(value)) => value,
            (true, None) => {
                return Err(DgeError::SizeFactorFailed {
                    reason: format!("No valid ratios for sample {}", j),
                })
            }
        };
    }
    Ok(size_factors)
}

/// Standard median of ratios method
fn estimate_size_factors_ratio(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_not_empty(&counts)?;
    let n_samples = counts.ncols() as f64;

    // Geometric means over genes with no zero count
    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, (row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples).exp()))
        .collect();

    if reference.is_empty() {
        return Err(DgeError::SizeFactorFailed {
            reason: "No genes with all non-zero counts found".to_string(),
        });
    }

    let size_factors = median_ratios(&counts, &reference, None)?;
    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(DgeError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }
    Ok(size_factors)
}

/// Geometric mean over positive counts, still divided by the total sample count
fn estimate_size_factors_poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_not_empty(&counts)?;
    let n_samples = counts.ncols() as f64;

    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&x| x > 0.0))
        .map(|(i, row)| {
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            (i, (log_sum / n_samples).exp())
        })
        .collect();

    if reference.is_empty() {
        return Err(DgeError::SizeFactorFailed {
            reason: "No genes with positive counts found".to_string(),
        });
    }

    let mut size_factors = median_ratios(&counts, &reference, Some(1.0))?;

    // Re-center so the geometric mean of the factors is 1
    let log_mean = size_factors.iter().map(|&x| x.ln()).sum::<f64>() / n_samples;
    let center = log_mean.exp();
    size_factors.mapv_inplace(|x| x / center);
    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn depth_matrix() -> Array2<f64> {
        array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0]
        ]
    }

    #[test]
    fn test_size_factor_estimation() {
        let sf = estimate_size_factors(depth_matrix().view(), SizeFactorMethod::Ratio).unwrap();
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // s2 has 2x the depth of s1
        let ratio = sf[1] / sf[0];
        assert!((ratio - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_normalized_counts() {
        let counts = depth_matrix();
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        let norm = normalized_counts(counts.view(), &sf);

        let gene1: Vec<f64> = norm.row(0).to_vec();
        let mean = gene1.iter().sum::<f64>() / 4.0;
        for val in gene1 {
            assert!((val - mean).abs() / mean < 0.1);
        }
    }

    #[test]
    fn test_zero_in_every_gene_falls_back_to_poscounts() {
        let counts = array![[0.0, 10.0, 20.0], [5.0, 0.0, 10.0], [8.0, 16.0, 0.0]];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert!(sf.iter().all(|&x| x.is_finite() && x > 0.0));
    }

    #[test]
    fn test_empty_matrix_is_error() {
        let counts = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            estimate_size_factors(counts.view(), SizeFactorMethod::Ratio),
            Err(DgeError::EmptyData { .. })
        ));
    }
}
