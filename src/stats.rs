//! Statistical utility functions shared across modules
//!
//! Order statistics used by size factors, the dispersion prior and
//! independent filtering, plus the trigamma function.

use std::cmp::Ordering;

/// Total order on f64 that places NaN last
pub fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or_else(|| match (a.is_nan(), b.is_nan()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => Ordering::Equal,
    })
}

/// Median of the values, sorting the slice in place. NaN for an empty slice.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    values.sort_by(cmp_f64);
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Median absolute deviation squared, scaled by 1.4826 for normal consistency
pub fn mad_squared(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    let center = median_in_place(&mut sorted);
    let mut abs_devs: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    let mad = median_in_place(&mut abs_devs) * 1.4826;
    mad * mad
}

/// Type-7 quantile (linear interpolation) of an already sorted slice
pub fn quantile_type7(sorted_x: &[f64], p: f64) -> f64 {
    let n = sorted_x.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted_x[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted_x[lo] + (h - lo as f64) * (sorted_x[hi] - sorted_x[lo])
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with n-1 denominator; 0 when fewer than two values
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    // Recurrence up to the asymptotic region
    let mut shift = 0.0;
    let mut z = x;
    while z < 8.0 {
        shift += 1.0 / (z * z);
        z += 1.0;
    }

    let z2 = z * z;
    shift + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}
