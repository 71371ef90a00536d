//! Benjamini-Hochberg FDR correction

use crate::stats::cmp_f64;

/// Benjamini-Hochberg adjusted p-values
///
/// NaN p-values are excluded from the number of tests and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| cmp_f64(&pvalues[a], &pvalues[b]));

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    let mut rank = m;
    for &i in indices.iter().rev() {
        let p = pvalues[i];
        if p.is_finite() {
            let adj = (p * m as f64 / rank as f64).min(1.0);
            cummin = cummin.min(adj);
            padj[i] = cummin;
            rank -= 1;
        }
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!(padj[1].is_nan());
        assert!((padj[2] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bh_ordering_and_cap() {
        let padj = benjamini_hochberg(&[0.001, 0.01, 0.05, 0.9]);
        for i in 0..padj.len() - 1 {
            assert!(padj[i] <= padj[i + 1]);
        }
        assert!(padj[3] <= 1.0);
    }

    #[test]
    fn test_bh_all_nan() {
        assert!(benjamini_hochberg(&[f64::NAN, f64::NAN]).iter().all(|p| p.is_nan()));
    }
}
