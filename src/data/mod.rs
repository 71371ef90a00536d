//! Data structures for differential expression analysis

mod comparison;
mod count_matrix;
mod dataset;
mod metadata;

pub use comparison::{Comparison, ComparisonMode};
pub use count_matrix::CountMatrix;
pub use dataset::{ContrastDataSet, MIN_REPLICATES};
pub use metadata::SampleMetadata;
