//! Maximum a posteriori dispersion shrinkage toward the trend

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::{grid_search, line_search, max_dispersion, LogPrior};
use crate::dispersion::DispersionParams;
use crate::stats::{mad_squared, trigamma};

/// Floor on the prior variance of log dispersions
pub const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance of log dispersions and the observed residual variance
///
/// Residuals log(gene-wise) - log(trend) over genes away from the lower bound;
/// observed variance is mad^2, the sampling variance trigamma((m - p) / 2) is
/// subtracted, floored at 0.25. Returns (prior_var, var_log_disp_ests).
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coef: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coef {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coef) as f64;
    let prior_var = (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR);
    log::debug!(
        "Prior var: df={}, varLogDispEsts={:.4}, prior_var={:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );
    (prior_var, var_log_disp_ests)
}

/// MAP dispersion for one gene with the mean held at `mu`
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    params: &DispersionParams,
) -> f64 {
    if !trend_disp.is_finite() || trend_disp <= 0.0 || !gene_disp.is_finite() {
        return trend_disp;
    }

    let max_disp = max_dispersion(counts.len());
    let prior = LogPrior {
        log_mean: trend_disp.ln(),
        var: prior_var,
    };
    let start = if gene_disp > 0.1 * trend_disp {
        gene_disp
    } else {
        trend_disp
    };

    let fit = line_search(counts, design, mu, start, max_disp, params, Some(prior));
    let alpha = if fit.iterations < params.maxit {
        fit.alpha
    } else {
        grid_search(counts, design, mu, params.min_disp, max_disp, Some(prior))
    };
    alpha.clamp(params.min_disp, max_disp)
}

/// Result of MAP estimation over all genes
#[derive(Debug, Clone)]
pub struct MapDispersions {
    pub dispersions: Array1<f64>,
    /// Genes whose gene-wise estimate sits far above the trend and is kept as-is
    pub outliers: Vec<bool>,
    pub prior_var: f64,
}

/// Shrink gene-wise dispersions toward the trend
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    mu: &Array2<f64>,
    gene_dispersions: &Array1<f64>,
    trended_dispersions: &Array1<f64>,
    params: &DispersionParams,
) -> MapDispersions {
    let (n_genes, n_samples) = counts.dim();
    let gene = gene_dispersions.to_vec();
    let trend = trended_dispersions.to_vec();
    let (prior_var, var_log_disp_ests) =
        estimate_prior_variance(&gene, &trend, n_samples, design.ncols(), params.min_disp);

    let map: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene_counts: Vec<f64> = counts.row(i).to_vec();
            let gene_mu: Vec<f64> = mu.row(i).to_vec();
            fit_map_dispersion(&gene_counts, design, &gene_mu, gene[i], trend[i], prior_var, params)
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();
    let outliers: Vec<bool> = gene
        .iter()
        .zip(&trend)
        .map(|(&g, &t)| g.is_finite() && t.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > threshold)
        .collect();

    let dispersions: Array1<f64> = map
        .iter()
        .zip(&gene)
        .zip(&outliers)
        .map(|((&m, &g), &outlier)| if outlier { g } else { m })
        .collect();

    log::debug!(
        "MAP dispersions: prior_var={:.4}, {} upper outliers (threshold {:.4})",
        prior_var,
        outliers.iter().filter(|&&o| o).count(),
        threshold
    );

    MapDispersions {
        dispersions,
        outliers,
        prior_var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::gene_wise::linear_model_mu;
    use ndarray::array;

    fn design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_map_lies_between_gene_wise_and_trend() {
        let counts = [100.0, 120.0, 90.0, 110.0, 95.0, 105.0];
        let mu = linear_model_mu(&counts, &[1.0; 6], &design());
        let gene_disp = 0.005;
        let trend_disp = 0.1;
        let map = fit_map_dispersion(&counts, &design(), &mu, gene_disp, trend_disp, 0.5, &DispersionParams::default());
        assert!(map > gene_disp && map < trend_disp, "map {}", map);
    }

    #[test]
    fn test_prior_variance_floor() {
        let gene = [0.1, 0.11, 0.09, 0.1, 0.105];
        let trend = [0.1; 5];
        let (prior_var, var_log) = estimate_prior_variance(&gene, &trend, 6, 2, 1e-8);
        assert_eq!(prior_var, MIN_PRIOR_VAR);
        assert!(var_log > 0.0 && var_log < 0.1);
    }

    #[test]
    fn test_prior_variance_subtracts_sampling_variance() {
        let gene: Vec<f64> = (0..40).map(|i| 0.1 * ((i as f64 - 20.0) / 5.0).exp()).collect();
        let trend = vec![0.1; 40];
        let (prior_var, var_log) = estimate_prior_variance(&gene, &trend, 12, 2, 1e-8);
        assert!((prior_var - (var_log - trigamma(5.0))).abs() < 1e-12);
    }

    #[test]
    fn test_upper_outliers_keep_gene_wise_estimate() {
        let counts = array![
            [100.0, 120.0, 90.0, 110.0, 95.0, 105.0],
            [50.0, 52.0, 48.0, 51.0, 49.0, 50.0],
            [200.0, 210.0, 190.0, 205.0, 195.0, 200.0],
            [10.0, 400.0, 30.0, 500.0, 5.0, 250.0]
        ];
        let sf = [1.0; 6];
        let mut mu = Array2::zeros((4, 6));
        for i in 0..4 {
            let row = linear_model_mu(&counts.row(i).to_vec(), &sf, &design());
            for j in 0..6 {
                mu[[i, j]] = row[j];
            }
        }
        let gene = array![0.01, 0.011, 0.009, 3.0];
        let trend = array![0.01, 0.01, 0.01, 0.01];
        let result = estimate_map_dispersions(counts.view(), &design(), &mu, &gene, &trend, &DispersionParams::default());
        assert_eq!(result.outliers, vec![false, false, false, true]);
        assert_eq!(result.dispersions[3], 3.0);
    }
}
