//! Heatmap ordering of gene subsets by hierarchical clustering
//!
//! Counts are variance-stabilized, optionally z-scored per gene, and the
//! genes clustered on Euclidean distance. When clustering is impossible the
//! caller gets the input order back together with the reason.

mod linkage;

pub use linkage::{euclidean_distances, hclust, Dendrogram, LinkageMethod, Merge};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::de::DeResults;
use crate::error::{DgeError, Result};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::transform::{vst, VstResult};

/// Smallest subset that is actually clustered
pub const MIN_CLUSTER_GENES: usize = 3;

/// Per-gene scaling applied after the VST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowScaling {
    /// Center and scale each gene to unit variance
    #[default]
    ZScore,
    None,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    pub method: LinkageMethod,
    pub scaling: RowScaling,
}

/// Display order of a gene subset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOrdering {
    pub genes: Vec<String>,
    pub method: LinkageMethod,
    /// Why clustering was skipped and the input order kept
    pub fallback: Option<String>,
}

/// Order `subset` by hierarchical clustering of its variance-stabilized counts
///
/// With a DE fit the matrix is restricted to that comparison's samples and
/// its size factors and dispersion trend are reused; otherwise both are
/// estimated blind, size factors over the whole matrix. Fewer than three
/// genes are returned as given.
pub fn order_genes(
    matrix: &CountMatrix,
    subset: &[String],
    options: &ClusterOptions,
    fit: Option<&DeResults>,
) -> Result<Vec<String>> {
    if subset.len() < MIN_CLUSTER_GENES {
        return Ok(subset.to_vec());
    }

    let rows: Vec<usize> = subset
        .iter()
        .map(|id| {
            matrix.gene_index(id).ok_or_else(|| DgeError::ClusteringFailed {
                reason: format!("gene '{}' is not in the count matrix", id),
            })
        })
        .collect::<Result<_>>()?;

    let transformed = stabilize(matrix, &rows, fit).map_err(|e| match e {
        DgeError::ClusteringFailed { .. } => e,
        other => DgeError::ClusteringFailed {
            reason: format!("variance stabilization failed: {}", other),
        },
    })?;

    let data = match options.scaling {
        RowScaling::ZScore => zscore_rows(&transformed.data, subset)?,
        RowScaling::None => transformed.data,
    };

    let tree = hclust(&euclidean_distances(&data), options.method)?;
    Ok(tree.order.iter().map(|&i| subset[i].clone()).collect())
}

/// [`order_genes`], keeping the input order if clustering fails
pub fn order_genes_or_fallback(
    matrix: &CountMatrix,
    subset: &[String],
    options: &ClusterOptions,
    fit: Option<&DeResults>,
) -> ClusterOrdering {
    match order_genes(matrix, subset, options, fit) {
        Ok(genes) => ClusterOrdering {
            genes,
            method: options.method,
            fallback: None,
        },
        Err(e) => {
            log::warn!("Clustering with {} failed, keeping input order: {}", options.method, e);
            ClusterOrdering {
                genes: subset.to_vec(),
                method: options.method,
                fallback: Some(e.to_string()),
            }
        }
    }
}

fn stabilize(matrix: &CountMatrix, rows: &[usize], fit: Option<&DeResults>) -> Result<VstResult> {
    match fit {
        Some(fit) => {
            let columns: Vec<usize> = fit
                .sample_ids
                .iter()
                .map(|s| {
                    matrix.sample_index(s).ok_or_else(|| DgeError::InvalidInput {
                        reason: format!("sample '{}' of {} is not in the count matrix", s, fit.name()),
                    })
                })
                .collect::<Result<_>>()?;
            let counts = matrix.counts().select(Axis(0), rows).select(Axis(1), &columns);
            let size_factors = Array1::from_vec(fit.size_factors.clone());
            vst(counts.view(), Some(&size_factors), Some(&fit.trend))
        }
        None => {
            let size_factors = estimate_size_factors(matrix.counts(), SizeFactorMethod::Ratio)?;
            let counts = matrix.counts().select(Axis(0), rows);
            vst(counts.view(), Some(&size_factors), None)
        }
    }
}

fn zscore_rows(data: &Array2<f64>, ids: &[String]) -> Result<Array2<f64>> {
    let mut scaled = data.clone();
    for (i, mut row) in scaled.axis_iter_mut(Axis(0)).enumerate() {
        let values = row.to_vec();
        let mean = crate::stats::mean(&values);
        let sd = crate::stats::sample_variance(&values).sqrt();
        if !(sd > 1e-12) {
            return Err(DgeError::ClusteringFailed {
                reason: format!("gene '{}' is constant across samples", ids[i]),
            });
        }
        row.mapv_inplace(|v| (v - mean) / sd);
    }
    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn matrix() -> CountMatrix {
        CountMatrix::new(
            array![
                [10.0, 15.0, 8.0, 90.0, 120.0, 100.0],
                [200.0, 180.0, 220.0, 20.0, 25.0, 15.0],
                [12.0, 14.0, 10.0, 80.0, 110.0, 95.0],
                [300.0, 260.0, 310.0, 30.0, 40.0, 28.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [60.0, 75.0, 55.0, 65.0, 70.0, 58.0],
                // keeps `noise` off the median ratio, which would normalize it flat
                [50.0, 50.0, 50.0, 50.0, 50.0, 50.0]
            ],
            ids(&["up1", "down1", "up2", "down2", "silent", "noise", "flat"]),
            ids(&["a1", "a2", "a3", "b1", "b2", "b3"]),
        )
        .unwrap()
    }

    #[test]
    fn test_small_subsets_unchanged() {
        let subset = ids(&["down1", "up1"]);
        let order = order_genes(&matrix(), &subset, &ClusterOptions::default(), None).unwrap();
        assert_eq!(order, subset);
    }

    #[test]
    fn test_similar_genes_are_adjacent() {
        let subset = ids(&["up1", "down1", "up2", "down2"]);
        for method in [LinkageMethod::WardD2, LinkageMethod::Complete, LinkageMethod::Average, LinkageMethod::Single] {
            let options = ClusterOptions {
                method,
                scaling: RowScaling::ZScore,
            };
            let order = order_genes(&matrix(), &subset, &options, None).unwrap();
            let pos = |g: &str| order.iter().position(|x| x == g).unwrap();
            assert_eq!((pos("up1") as i64 - pos("up2") as i64).abs(), 1, "{}: {:?}", method, order);
            assert_eq!((pos("down1") as i64 - pos("down2") as i64).abs(), 1, "{}: {:?}", method, order);
        }
    }

    #[test]
    fn test_deterministic() {
        let subset = ids(&["noise", "up1", "down1", "up2", "down2"]);
        let a = order_genes(&matrix(), &subset, &ClusterOptions::default(), None).unwrap();
        let b = order_genes(&matrix(), &subset, &ClusterOptions::default(), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), subset.len());
        let mut sorted = a.clone();
        sorted.sort();
        let mut expected = subset.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_constant_gene_falls_back_with_reason() {
        let subset = ids(&["up1", "silent", "down1"]);
        let ordering = order_genes_or_fallback(&matrix(), &subset, &ClusterOptions::default(), None);
        assert_eq!(ordering.genes, subset);
        assert!(ordering.fallback.unwrap().contains("silent"));
    }

    #[test]
    fn test_silent_gene_clusters_without_scaling() {
        let subset = ids(&["up1", "silent", "down1"]);
        let options = ClusterOptions {
            method: LinkageMethod::Average,
            scaling: RowScaling::None,
        };
        let ordering = order_genes_or_fallback(&matrix(), &subset, &options, None);
        assert!(ordering.fallback.is_none());
        assert_eq!(ordering.genes.len(), 3);
    }

    #[test]
    fn test_unknown_gene_is_clustering_failure() {
        let subset = ids(&["up1", "down1", "missing"]);
        assert!(matches!(
            order_genes(&matrix(), &subset, &ClusterOptions::default(), None),
            Err(DgeError::ClusteringFailed { .. })
        ));
    }
}
