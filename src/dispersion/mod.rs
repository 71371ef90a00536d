//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions, linear_model_mu};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, MapDispersions, MIN_PRIOR_VAR};
pub use trend::{fit_dispersion_trend, DispersionTrend};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::ContrastDataSet;
use crate::error::{DgeError, Result};

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on dispersion estimates
    pub min_disp: f64,
    /// Line search convergence tolerance on the log posterior
    pub disp_tol: f64,
    /// Initial line search step size
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Estimate all dispersions (gene-wise, trended, and MAP) for a contrast
pub fn estimate_dispersions(ds: &mut ContrastDataSet, params: &DispersionParams) -> Result<()> {
    let design = ds.design_matrix().clone();
    if design.nrows() <= design.ncols() {
        return Err(DgeError::InvalidInput {
            reason: "as many parameters as samples; no replicates for dispersion estimation".to_string(),
        });
    }
    let size_factors = ds
        .size_factors()
        .ok_or_else(|| DgeError::InvalidInput {
            reason: "size factors must be estimated before dispersions".to_string(),
        })?
        .clone();
    let base_means = ds.base_means().ok_or_else(|| DgeError::InvalidInput {
        reason: "normalized counts required for dispersion estimation".to_string(),
    })?;

    let (gene_disp, mu) = estimate_gene_dispersions(ds.counts().counts(), &size_factors, &design, params)?;

    let (trend, trended) = match fit_dispersion_trend(&base_means, &gene_disp, params.min_disp) {
        Ok(fit) => fit,
        Err(DgeError::TrendFittingFailed { reason }) => {
            // Nothing to shrink toward: the gene-wise estimates become final
            log::warn!("{}; using gene-wise dispersions as final estimates", reason);
            let n_genes = gene_disp.len();
            ds.set_trended_dispersions(
                DispersionTrend::Mean {
                    dispersion: params.min_disp,
                },
                Array1::from_elem(n_genes, params.min_disp),
            )?;
            ds.set_dispersion_prior_var(MIN_PRIOR_VAR);
            ds.set_map_dispersions(gene_disp.clone(), vec![false; n_genes])?;
            ds.set_gene_dispersions(gene_disp)?;
            ds.set_mu(mu)?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let map = estimate_map_dispersions(ds.counts().counts(), &design, &mu, &gene_disp, &trended, params);

    ds.set_gene_dispersions(gene_disp)?;
    ds.set_mu(mu)?;
    ds.set_trended_dispersions(trend, trended)?;
    ds.set_dispersion_prior_var(map.prior_var);
    ds.set_map_dispersions(map.dispersions, map.outliers)?;
    Ok(())
}
