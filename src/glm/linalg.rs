//! Small dense linear algebra on row-major flat matrices (p x p, p small)

use ndarray::Array2;

/// X' W X as a flat row-major p x p matrix
pub fn xtwx(design: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut out = vec![0.0; p * p];
    for (i, &w) in weights.iter().enumerate() {
        for j in 0..p {
            let xij = design[[i, j]];
            for k in 0..p {
                out[j * p + k] += w * xij * design[[i, k]];
            }
        }
    }
    out
}

/// Cholesky factor L (lower, row-major) with a tiny diagonal floor for
/// matrices that are not numerically positive definite
fn cholesky(a: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                l[i * n + j] = sum.max(1e-12).sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    l
}

/// Solve A x = b for symmetric positive (semi-)definite A
pub fn solve_symmetric(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky(a, n);

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_symmetric(a: &[f64], n: usize) -> Vec<f64> {
    let mut result = vec![0.0; n * n];
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        let col = solve_symmetric(a, &e, n);
        for j in 0..n {
            result[j * n + i] = col[j];
        }
    }
    result
}

/// log|A| for symmetric positive definite A; None when A is singular
pub fn log_det_symmetric(a: &[f64], n: usize) -> Option<f64> {
    let mut l = vec![0.0; n * n];
    let mut log_det = 0.0;
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 1e-300 {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
                log_det += sum.ln();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(log_det)
}

/// trace(A^{-1} B) for symmetric positive definite A
pub fn trace_inv_product(a: &[f64], b: &[f64], n: usize) -> f64 {
    let mut trace = 0.0;
    for col in 0..n {
        let b_col: Vec<f64> = (0..n).map(|row| b[row * n + col]).collect();
        let x = solve_symmetric(a, &b_col, n);
        trace += x[col];
    }
    trace
}
