//! Differential expression engine
//!
//! Runs the moderated negative binomial pipeline for one comparison at a time:
//! size factors, dispersions (gene-wise, trend, MAP), GLM fit, Wald test and
//! BH adjustment with independent filtering.

mod results;

pub use results::{DeResults, GeneResult, NEG_LOG10_PADJ_CAP};

use serde::{Deserialize, Serialize};

use crate::data::{Comparison, ContrastDataSet, CountMatrix, SampleMetadata};
use crate::dispersion::{estimate_dispersions, DispersionParams};
use crate::error::{DgeError, Result};
use crate::filter::independent_filtering;
use crate::glm::{fit_glm, GlmFitParams};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::testing::wald_test;

/// Parameters for the whole DE pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeParams {
    pub size_factor_method: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    /// Target FDR for choosing the independent filtering threshold
    pub filter_alpha: f64,
}

impl Default for DeParams {
    fn default() -> Self {
        Self {
            size_factor_method: SizeFactorMethod::Ratio,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            filter_alpha: 0.1,
        }
    }
}

impl DeParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.filter_alpha > 0.0 && self.filter_alpha < 1.0) {
            return Err(DgeError::InvalidInput {
                reason: format!("filter_alpha must lie in (0, 1), got {}", self.filter_alpha),
            });
        }
        if !(self.dispersion.min_disp > 0.0) || self.dispersion.maxit == 0 || self.glm.maxit == 0 {
            return Err(DgeError::InvalidInput {
                reason: "dispersion and GLM parameters must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// The statistical engine
///
/// Holds mutable fitting state, so a run needs `&mut self`: one comparison
/// must finish before the next can start.
#[derive(Debug, Default)]
pub struct DeEngine {
    params: DeParams,
    warmed: bool,
    runs: usize,
}

impl DeEngine {
    pub fn new(params: DeParams) -> Self {
        Self {
            params,
            warmed: false,
            runs: 0,
        }
    }

    pub fn params(&self) -> &DeParams {
        &self.params
    }

    pub fn is_ready(&self) -> bool {
        self.warmed
    }

    /// Number of completed comparison runs
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Validate parameters and fit a small built-in dataset once
    pub fn warm_up(&mut self) -> Result<()> {
        if self.warmed {
            return Ok(());
        }
        self.params.validate()?;

        let ids = |prefix: &str, n: usize| (1..=n).map(|i| format!("{}{}", prefix, i)).collect::<Vec<_>>();
        let rows: Vec<f64> = (0..8)
            .flat_map(|g| {
                let base = 20.0 * (g + 1) as f64;
                let fold = if g % 3 == 0 { 4.0 } else { 1.0 };
                [base, base * 1.5, base * 0.6, base * fold * 1.4, base * fold, base * fold * 0.7]
            })
            .collect();
        let counts = ndarray::Array2::from_shape_vec((8, 6), rows).map_err(|e| DgeError::InvalidInput {
            reason: e.to_string(),
        })?;
        let matrix = CountMatrix::new(counts, ids("g", 8), ids("s", 6))?;
        let labels = ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect();
        let metadata = SampleMetadata::new(ids("s", 6), labels)?;
        self.fit(&matrix, &metadata, &Comparison::new("a", "b"))?;

        self.warmed = true;
        log::debug!("DE engine warmed up");
        Ok(())
    }

    /// Run one comparison
    ///
    /// Genes with zero counts across the included samples, or with any
    /// undefined statistic, are absent from the returned list.
    pub fn run(&mut self, matrix: &CountMatrix, metadata: &SampleMetadata, comparison: &Comparison) -> Result<DeResults> {
        if !self.warmed {
            return Err(DgeError::BackendNotReady {
                state: "engine not warmed up".to_string(),
            });
        }
        let results = self.fit(matrix, metadata, comparison)?;
        self.runs += 1;
        Ok(results)
    }

    fn fit(&self, matrix: &CountMatrix, metadata: &SampleMetadata, comparison: &Comparison) -> Result<DeResults> {
        let params = &self.params;
        let mut ds = ContrastDataSet::new(matrix, metadata, comparison)?;
        log::info!(
            "{}: {} genes x {} samples",
            comparison,
            ds.n_genes(),
            ds.n_samples()
        );

        let size_factors = estimate_size_factors(ds.counts().counts(), params.size_factor_method)?;
        ds.set_size_factors(size_factors)?;

        estimate_dispersions(&mut ds, &params.dispersion)?;
        fit_glm(&mut ds, &params.glm)?;
        let wald = wald_test(&ds)?;

        let base_means = ds
            .base_means()
            .ok_or_else(|| DgeError::InvalidInput {
                reason: "normalized counts missing after fitting".to_string(),
            })?
            .to_vec();
        let filter = independent_filtering(&wald.pvalues, &base_means, params.filter_alpha);

        let dispersions = ds.map_dispersions().ok_or_else(|| DgeError::InvalidInput {
            reason: "dispersions missing after fitting".to_string(),
        })?;
        let trend = *ds.dispersion_trend().ok_or_else(|| DgeError::InvalidInput {
            reason: "dispersion trend missing after fitting".to_string(),
        })?;

        let n_tested = ds.n_genes();
        let genes: Vec<GeneResult> = ds
            .counts()
            .gene_ids()
            .iter()
            .enumerate()
            .map(|(i, id)| GeneResult {
                gene_id: id.clone(),
                base_mean: base_means[i],
                log2_fold_change: wald.log2_fold_changes[i],
                lfc_se: wald.lfc_se[i],
                stat: wald.stat[i],
                pvalue: wald.pvalues[i],
                padj: filter.padj[i],
                dispersion: dispersions[i],
            })
            .filter(GeneResult::is_complete)
            .collect();

        let n_dropped = n_tested - genes.len();
        log::info!(
            "{}: {} genes reported, {} dropped ({} rejections at FDR {})",
            comparison,
            genes.len(),
            n_dropped,
            filter.rejections,
            params.filter_alpha
        );

        Ok(DeResults {
            comparison: comparison.clone(),
            genes,
            sample_ids: ds.counts().sample_ids().to_vec(),
            size_factors: ds.size_factors().map(|sf| sf.to_vec()).unwrap_or_default(),
            trend,
            filter_theta: filter.theta,
            filter_cutoff: filter.cutoff,
            n_tested,
            n_dropped,
        })
    }
}
