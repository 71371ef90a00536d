//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during GLM fitting
pub const MIN_MU: f64 = 0.5;

/// IRLS stops when any |beta| exceeds this (natural-log scale)
pub const MAX_LFC_BETA: f64 = 30.0;

/// Clamp on the linear predictor to keep exp() finite
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// log P(Y = y) for a negative binomial with mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

/// IRLS working weight W = mu / (1 + alpha * mu); mu should already be floored
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}
