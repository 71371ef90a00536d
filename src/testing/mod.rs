//! Statistical testing for differential expression

mod fdr;
mod wald;

pub use fdr::benjamini_hochberg;
pub use wald::{wald_test, WaldStatistics, CONDITION_COEF};
