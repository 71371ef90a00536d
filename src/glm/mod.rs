//! Generalized Linear Model fitting for negative binomial data

mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use fitting::{fit_glm, fit_single_gene, GlmFitParams, GlmFitResult};
pub use negative_binomial::MIN_MU;
