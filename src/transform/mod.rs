//! Transformation functions for RNA-seq data
//!
//! Provides the variance-stabilizing transformation used for clustering and
//! heatmaps.

mod vst;

pub use vst::{vst, VstResult};
