//! ContrastDataSet - working state for one two-group comparison

use ndarray::{Array1, Array2};

use super::{Comparison, CountMatrix, SampleMetadata};
use crate::dispersion::DispersionTrend;
use crate::error::{DgeError, Result};
use crate::normalization::normalized_counts;

/// Minimum samples per condition group for dispersion estimation
pub const MIN_REPLICATES: usize = 2;

/// Counts restricted to one comparison's samples, plus the fit results
/// accumulated while the DE engine runs over it
#[derive(Debug, Clone)]
pub struct ContrastDataSet {
    /// Counts over the included samples; genes with no reads there are removed
    counts: CountMatrix,
    comparison: Comparison,
    /// true for samples of the comparison condition, false for the baseline
    in_comparison: Vec<bool>,
    /// Intercept + comparison indicator (baseline is the reference level)
    design: Array2<f64>,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    /// Gene-wise dispersion estimates (MLE)
    gene_dispersions: Option<Array1<f64>>,
    /// Fitted means from the gene-wise step, reused for MAP estimation
    mu: Option<Array2<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    dispersion_trend: Option<DispersionTrend>,
    dispersion_prior_var: Option<f64>,
    /// Final MAP dispersion estimates
    map_dispersions: Option<Array1<f64>>,
    dispersion_outliers: Option<Vec<bool>>,

    /// GLM coefficients on the natural log scale (intercept, condition)
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
}

impl ContrastDataSet {
    /// Restrict `matrix` to the samples labelled with either condition of `comparison`
    ///
    /// Samples carrying other labels are excluded from this comparison only.
    pub fn new(matrix: &CountMatrix, metadata: &SampleMetadata, comparison: &Comparison) -> Result<Self> {
        metadata.validate_against(matrix)?;

        let mut sample_indices = Vec::new();
        let mut in_comparison = Vec::new();
        for (j, sample) in matrix.sample_ids().iter().enumerate() {
            match metadata.condition_of(sample) {
                Some(label) if label == comparison.baseline => {
                    sample_indices.push(j);
                    in_comparison.push(false);
                }
                Some(label) if label == comparison.comparison => {
                    sample_indices.push(j);
                    in_comparison.push(true);
                }
                _ => {}
            }
        }

        let n_comparison = in_comparison.iter().filter(|&&b| b).count();
        let n_baseline = in_comparison.len() - n_comparison;
        for (condition, n_samples) in [(&comparison.baseline, n_baseline), (&comparison.comparison, n_comparison)] {
            if n_samples < MIN_REPLICATES {
                return Err(DgeError::InsufficientReplication {
                    comparison: comparison.name(),
                    condition: condition.clone(),
                    n_samples,
                });
            }
        }

        let subset = matrix.subset_samples(&sample_indices)?;
        let expressed: Vec<usize> = (0..subset.n_genes())
            .filter(|&i| subset.gene_counts(i).iter().any(|&x| x > 0.0))
            .collect();
        if expressed.len() < subset.n_genes() {
            log::debug!(
                "{}: {} genes with zero counts in every included sample removed",
                comparison,
                subset.n_genes() - expressed.len()
            );
        }
        if expressed.is_empty() {
            return Err(DgeError::EmptyData {
                reason: format!("No gene has reads in the samples of {}", comparison),
            });
        }
        let counts = subset.subset_genes(&expressed)?;

        let mut design = Array2::zeros((in_comparison.len(), 2));
        for (j, &b) in in_comparison.iter().enumerate() {
            design[[j, 0]] = 1.0;
            design[[j, 1]] = if b { 1.0 } else { 0.0 };
        }

        Ok(Self {
            counts,
            comparison: comparison.clone(),
            in_comparison,
            design,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            mu: None,
            trended_dispersions: None,
            dispersion_trend: None,
            dispersion_prior_var: None,
            map_dispersions: None,
            dispersion_outliers: None,
            coefficients: None,
            standard_errors: None,
            converged: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn comparison(&self) -> &Comparison {
        &self.comparison
    }

    pub fn in_comparison(&self) -> &[bool] {
        &self.in_comparison
    }

    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<&DispersionTrend> {
        self.dispersion_trend.as_ref()
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Option<Array1<f64>> {
        self.normalized_counts
            .as_ref()
            .and_then(|n| n.mean_axis(ndarray::Axis(1)))
    }

    fn check_gene_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.n_genes() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    fn check_shape(&self, what: &str, rows: usize, cols: usize, expected_cols: usize) -> Result<()> {
        if rows != self.n_genes() || cols != expected_cols {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} {}", self.n_genes(), expected_cols, what),
                got: format!("{}x{}", rows, cols),
            });
        }
        Ok(())
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(DgeError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.normalized_counts = Some(normalized_counts(self.counts.counts(), &size_factors));
        self.size_factors = Some(size_factors);
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        self.check_shape("mu matrix", mu.nrows(), mu.ncols(), self.n_samples())?;
        self.mu = Some(mu);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, trend: DispersionTrend, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.dispersion_trend = Some(trend);
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_dispersion_prior_var(&mut self, var: f64) {
        self.dispersion_prior_var = Some(var);
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>, outliers: Vec<bool>) -> Result<()> {
        self.check_gene_len("dispersions", dispersions.len())?;
        self.check_gene_len("outlier flags", outliers.len())?;
        self.map_dispersions = Some(dispersions);
        self.dispersion_outliers = Some(outliers);
        Ok(())
    }

    pub fn set_coefficients(&mut self, coefficients: Array2<f64>) -> Result<()> {
        self.check_shape("coefficients", coefficients.nrows(), coefficients.ncols(), self.design.ncols())?;
        self.coefficients = Some(coefficients);
        Ok(())
    }

    pub fn set_standard_errors(&mut self, se: Array2<f64>) -> Result<()> {
        self.check_shape("standard errors", se.nrows(), se.ncols(), self.design.ncols())?;
        self.standard_errors = Some(se);
        Ok(())
    }

    pub fn set_converged(&mut self, converged: Vec<bool>) -> Result<()> {
        self.check_gene_len("convergence flags", converged.len())?;
        self.converged = Some(converged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn matrix() -> CountMatrix {
        CountMatrix::new(
            array![
                [100.0, 200.0, 50.0, 150.0, 7.0],
                [500.0, 600.0, 400.0, 550.0, 9.0],
                [0.0, 0.0, 0.0, 0.0, 3.0]
            ],
            ids(&["gene1", "gene2", "gene3"]),
            ids(&["s1", "s2", "s3", "s4", "s5"]),
        )
        .unwrap()
    }

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(
            ids(&["s1", "s2", "s3", "s4", "s5"]),
            ids(&["ctrl", "treat", "ctrl", "treat", "other"]),
        )
        .unwrap()
    }

    #[test]
    fn test_other_conditions_are_excluded() {
        let ds = ContrastDataSet::new(&matrix(), &metadata(), &Comparison::new("ctrl", "treat")).unwrap();
        assert_eq!(ds.n_samples(), 4);
        assert_eq!(ds.counts().sample_ids(), &ids(&["s1", "s2", "s3", "s4"])[..]);
        assert_eq!(ds.in_comparison(), &[false, true, false, true]);
        assert_eq!(ds.design_matrix().column(1).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unexpressed_genes_are_removed() {
        let ds = ContrastDataSet::new(&matrix(), &metadata(), &Comparison::new("ctrl", "treat")).unwrap();
        assert_eq!(ds.counts().gene_ids(), &ids(&["gene1", "gene2"])[..]);
    }

    #[test]
    fn test_single_replicate_is_rejected() {
        let err = ContrastDataSet::new(&matrix(), &metadata(), &Comparison::new("ctrl", "other")).unwrap_err();
        match err {
            DgeError::InsufficientReplication {
                comparison,
                condition,
                n_samples,
            } => {
                assert_eq!(comparison, "other_vs_ctrl");
                assert_eq!(condition, "other");
                assert_eq!(n_samples, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_size_factors_produce_normalized_counts() {
        let mut ds = ContrastDataSet::new(&matrix(), &metadata(), &Comparison::new("ctrl", "treat")).unwrap();
        ds.set_size_factors(array![1.0, 2.0, 0.5, 1.0]).unwrap();
        let norm = ds.normalized_counts().unwrap();
        assert_eq!(norm[[0, 1]], 100.0);
        assert_eq!(norm[[0, 2]], 100.0);
        assert!(ds.set_size_factors(array![1.0, 0.0, 1.0, 1.0]).is_err());
        assert!(ds.set_size_factors(array![1.0]).is_err());
    }
}
