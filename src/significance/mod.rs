//! Significance classification of DE results
//!
//! Splits a comparison's gene list into up- and down-regulated views under an
//! adjustable threshold policy. The gene list itself is never modified, so
//! changing thresholds only needs a new classification pass.

use serde::{Deserialize, Serialize};

use crate::de::GeneResult;
use crate::error::{DgeError, Result};
use crate::stats::cmp_f64;

/// Threshold policy for calling a gene significant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Adjusted p-value must be strictly below this
    pub padj: f64,
    /// |log2 fold change| must be strictly above this
    pub log2fc: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            padj: 0.05,
            log2fc: 1.0,
        }
    }
}

impl Thresholds {
    pub fn new(padj: f64, log2fc: f64) -> Result<Self> {
        if !(padj > 0.0 && padj <= 1.0) {
            return Err(DgeError::InvalidInput {
                reason: format!("adjusted p-value threshold must lie in (0, 1], got {}", padj),
            });
        }
        if !(log2fc >= 0.0) || !log2fc.is_finite() {
            return Err(DgeError::InvalidInput {
                reason: format!("log2 fold change threshold must be non-negative, got {}", log2fc),
            });
        }
        Ok(Self { padj, log2fc })
    }
}

/// Up/down views over a gene list
#[derive(Debug, Clone)]
pub struct Significance<'a> {
    /// Descending by log2 fold change
    pub up: Vec<&'a GeneResult>,
    /// Ascending by log2 fold change (most negative first)
    pub down: Vec<&'a GeneResult>,
    pub thresholds: Thresholds,
    pub n_tested: usize,
}

/// Counts handed to reporting collaborators
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignificanceSummary {
    pub tested: usize,
    pub up: usize,
    pub down: usize,
    pub padj_threshold: f64,
    pub log2fc_threshold: f64,
}

/// Partition `genes` into significant up and down sets
///
/// One pass selects the members; equal fold changes keep their input order.
pub fn classify<'a>(genes: &'a [GeneResult], thresholds: &Thresholds) -> Significance<'a> {
    let mut up = Vec::new();
    let mut down = Vec::new();
    for gene in genes {
        if !(gene.padj < thresholds.padj) {
            continue;
        }
        if gene.log2_fold_change > thresholds.log2fc {
            up.push(gene);
        } else if gene.log2_fold_change < -thresholds.log2fc {
            down.push(gene);
        }
    }
    up.sort_by(|a, b| cmp_f64(&b.log2_fold_change, &a.log2_fold_change));
    down.sort_by(|a, b| cmp_f64(&a.log2_fold_change, &b.log2_fold_change));

    Significance {
        up,
        down,
        thresholds: *thresholds,
        n_tested: genes.len(),
    }
}

impl Significance<'_> {
    pub fn summary(&self) -> SignificanceSummary {
        SignificanceSummary {
            tested: self.n_tested,
            up: self.up.len(),
            down: self.down.len(),
            padj_threshold: self.thresholds.padj,
            log2fc_threshold: self.thresholds.log2fc,
        }
    }

    pub fn up_ids(&self) -> Vec<&str> {
        self.up.iter().map(|g| g.gene_id.as_str()).collect()
    }

    pub fn down_ids(&self) -> Vec<&str> {
        self.down.iter().map(|g| g.gene_id.as_str()).collect()
    }

    /// Up then down gene ids, the default heatmap subset
    pub fn significant_ids(&self) -> Vec<String> {
        self.up
            .iter()
            .chain(self.down.iter())
            .map(|g| g.gene_id.clone())
            .collect()
    }
}
