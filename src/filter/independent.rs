//! Independent filtering on mean normalized count before BH adjustment

use serde::Serialize;

use crate::stats::{cmp_f64, quantile_type7};
use crate::testing::benjamini_hochberg;

/// Number of candidate filter quantiles
const N_THETA: usize = 50;

/// Adjusted p-values after filtering, with the threshold that produced them
#[derive(Debug, Clone, Serialize)]
pub struct FilterOutcome {
    /// NaN for genes filtered out or without a p-value
    pub padj: Vec<f64>,
    /// Quantile of mean counts below which genes were filtered
    pub theta: f64,
    /// Mean normalized count threshold
    pub cutoff: f64,
    pub rejections: usize,
}

/// Apply independent filtering based on mean expression
///
/// Tries 50 quantile thresholds on `base_means`, from the fraction of zero means
/// up to 0.95, adjusts the surviving p-values with BH at each, and keeps the
/// threshold with the most rejections at `alpha` (the smallest on ties). With
/// no rejections anywhere this reduces to unfiltered BH.
pub fn independent_filtering(pvalues: &[f64], base_means: &[f64], alpha: f64) -> FilterOutcome {
    let n = pvalues.len();
    let mut sorted_means: Vec<f64> = base_means.iter().filter(|m| m.is_finite()).copied().collect();
    if n == 0 || sorted_means.is_empty() {
        return FilterOutcome {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: 0.0,
            rejections: 0,
        };
    }
    sorted_means.sort_by(cmp_f64);

    let zeros = base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count();
    let lower = zeros as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };

    let mut best: Option<FilterOutcome> = None;
    for i in 0..N_THETA {
        let theta = lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64;
        let cutoff = quantile_type7(&sorted_means, theta);
        let filtered: Vec<f64> = pvalues
            .iter()
            .zip(base_means)
            .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
            .collect();
        let padj = benjamini_hochberg(&filtered);
        let rejections = padj.iter().filter(|&&p| p < alpha).count();

        if best.as_ref().map_or(true, |b| rejections > b.rejections) {
            best = Some(FilterOutcome {
                padj,
                theta,
                cutoff,
                rejections,
            });
        }
    }

    match best {
        Some(outcome) => {
            log::debug!(
                "Independent filtering: theta={:.3}, cutoff={:.3}, {} rejections at alpha={}",
                outcome.theta,
                outcome.cutoff,
                outcome.rejections,
                alpha
            );
            outcome
        }
        None => FilterOutcome {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: 0.0,
            rejections: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rejections_is_plain_bh() {
        let p = vec![0.5, 0.6, 0.7, 0.8];
        let means = vec![1.0, 2.0, 3.0, 4.0];
        let outcome = independent_filtering(&p, &means, 0.1);
        assert_eq!(outcome.rejections, 0);
        assert_eq!(outcome.theta, 0.0);
        assert_eq!(outcome.padj, benjamini_hochberg(&p));
    }

    #[test]
    fn test_filtering_low_count_nulls_adds_rejections() {
        // 900 low-count nulls push every signal gene above alpha under plain BH
        let mut p = Vec::new();
        let mut means = Vec::new();
        for i in 0..900 {
            p.push(0.1 + 0.001 * i as f64);
            means.push(1.0 + i as f64 * 0.01);
        }
        for i in 0..20 {
            p.push(0.002 + 0.0001 * i as f64);
            means.push(100.0 + i as f64);
        }
        let plain = benjamini_hochberg(&p).iter().filter(|&&x| x < 0.1).count();
        assert_eq!(plain, 0);

        let outcome = independent_filtering(&p, &means, 0.1);
        assert_eq!(outcome.rejections, 20);
        assert!(outcome.theta > 0.0);
        assert!(outcome.padj[0].is_nan());
        assert!(outcome.padj[919] < 0.1);
    }

    #[test]
    fn test_ties_keep_smallest_theta() {
        // signal strong enough that every threshold rejects the same genes
        let mut p = vec![0.5; 10];
        let means: Vec<f64> = (0..20).map(|i| 1.0 + i as f64).collect();
        p.extend(std::iter::repeat(1e-8).take(10));
        let outcome = independent_filtering(&p, &means, 0.1);
        assert_eq!(outcome.rejections, 10);
        assert_eq!(outcome.theta, 0.0);
        assert!(!outcome.padj[0].is_nan());
    }
}
