//! Wald test for differential expression

use std::f64::consts::LN_2;

use statrs::function::erf::erfc;

use crate::data::ContrastDataSet;
use crate::error::{DgeError, Result};

/// Index of the condition coefficient (comparison vs baseline) in the design
pub const CONDITION_COEF: usize = 1;

/// Per-gene Wald statistics on the log2 scale
#[derive(Debug, Clone, Default)]
pub struct WaldStatistics {
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
}

/// Wald test of the condition coefficient against zero
///
/// stat = beta / se, two-sided normal p-value; log2 fold change and its SE
/// are the natural-log coefficient and SE divided by ln 2.
pub fn wald_test(ds: &ContrastDataSet) -> Result<WaldStatistics> {
    let coefficients = ds.coefficients().ok_or_else(|| DgeError::InvalidInput {
        reason: "GLM must be fitted before testing".to_string(),
    })?;
    let standard_errors = ds.standard_errors().ok_or_else(|| DgeError::InvalidInput {
        reason: "Standard errors not available".to_string(),
    })?;
    if coefficients.ncols() <= CONDITION_COEF {
        return Err(DgeError::InvalidInput {
            reason: "design has no condition coefficient".to_string(),
        });
    }

    let n_genes = ds.n_genes();
    let mut out = WaldStatistics {
        log2_fold_changes: Vec::with_capacity(n_genes),
        lfc_se: Vec::with_capacity(n_genes),
        stat: Vec::with_capacity(n_genes),
        pvalues: Vec::with_capacity(n_genes),
    };

    for i in 0..n_genes {
        let beta = coefficients[[i, CONDITION_COEF]];
        let se = standard_errors[[i, CONDITION_COEF]];
        let stat = if se > 0.0 && se.is_finite() && beta.is_finite() {
            beta / se
        } else {
            f64::NAN
        };
        out.log2_fold_changes.push(beta / LN_2);
        out.lfc_se.push(se / LN_2);
        out.stat.push(stat);
        out.pvalues.push(normal_two_sided(stat));
    }
    Ok(out)
}

/// 2 * Phi(-|z|); NaN when the statistic is undefined
fn normal_two_sided(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2)
}
