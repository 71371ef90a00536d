//! Per-comparison differential expression results

use serde::Serialize;

use crate::data::Comparison;
use crate::dispersion::DispersionTrend;

/// Cap on -log10(padj) when the adjusted p-value underflows to zero
pub const NEG_LOG10_PADJ_CAP: f64 = 50.0;

/// Statistics for one gene in one comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneResult {
    pub gene_id: String,
    /// Mean normalized count over the comparison's samples
    pub base_mean: f64,
    /// Comparison condition relative to baseline
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
    /// Final (MAP) dispersion used in the fit
    pub dispersion: f64,
}

impl GeneResult {
    /// -log10(padj), capped at 50 when padj is zero
    pub fn neg_log10_padj(&self) -> f64 {
        if self.padj <= 0.0 {
            NEG_LOG10_PADJ_CAP
        } else {
            (-self.padj.log10()).min(NEG_LOG10_PADJ_CAP)
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        [
            self.base_mean,
            self.log2_fold_change,
            self.lfc_se,
            self.stat,
            self.pvalue,
            self.padj,
            self.dispersion,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Results of one comparison
///
/// `genes` keeps the engine's gene order and is never re-sorted in place;
/// significance views are derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct DeResults {
    pub comparison: Comparison,
    pub genes: Vec<GeneResult>,
    /// Samples included in this comparison, in matrix order
    pub sample_ids: Vec<String>,
    pub size_factors: Vec<f64>,
    pub trend: DispersionTrend,
    pub filter_theta: f64,
    pub filter_cutoff: f64,
    /// Genes entering the test (expressed in at least one included sample)
    pub n_tested: usize,
    /// Tested genes dropped for an undefined statistic or independent filtering
    pub n_dropped: usize,
}

impl DeResults {
    pub fn name(&self) -> String {
        self.comparison.name()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn gene(&self, gene_id: &str) -> Option<&GeneResult> {
        self.genes.iter().find(|g| g.gene_id == gene_id)
    }

    /// Gene ids with padj below `alpha`
    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        self.genes
            .iter()
            .filter(|g| g.padj < alpha)
            .map(|g| g.gene_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(padj: f64) -> GeneResult {
        GeneResult {
            gene_id: "g".to_string(),
            base_mean: 10.0,
            log2_fold_change: 1.0,
            lfc_se: 0.2,
            stat: 5.0,
            pvalue: padj,
            padj,
            dispersion: 0.1,
        }
    }

    #[test]
    fn test_neg_log10_padj() {
        assert!((gene(0.01).neg_log10_padj() - 2.0).abs() < 1e-12);
        assert_eq!(gene(0.0).neg_log10_padj(), NEG_LOG10_PADJ_CAP);
        assert_eq!(gene(1e-300).neg_log10_padj(), NEG_LOG10_PADJ_CAP);
    }

    #[test]
    fn test_incomplete_rows_detected() {
        assert!(gene(0.5).is_complete());
        assert!(!gene(f64::NAN).is_complete());
    }
}
