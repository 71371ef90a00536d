//! rust_dge: differential gene expression analysis in Rust
//!
//! Takes a raw count matrix and a sample-to-condition table through gene
//! identifier resolution, moderated negative binomial testing per comparison,
//! significance classification, heatmap ordering by hierarchical clustering
//! and preranked gene-set enrichment.
//!
//! # Example
//!
//! ```ignore
//! use rust_dge::prelude::*;
//!
//! let mut session = AnalysisSession::<AnyTranslator>::new(AnalysisConfig::default());
//! session.initialize().await?;
//! session.load_files("counts.csv".as_ref(), "metadata.csv".as_ref()).await?;
//!
//! let mode = ComparisonMode::OneVsRest { baseline: Some("control".to_string()) };
//! for (name, outcome) in session.run_comparisons(&mode).await? {
//!     if outcome.is_ok() {
//!         let significance = session.significance(&name)?;
//!         println!("{}: {:?}", name, significance.summary());
//!     }
//! }
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod data;
pub mod de;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod glm;
pub mod identifiers;
pub mod io;
pub mod normalization;
pub mod rng;
pub mod session;
pub mod significance;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cluster::{order_genes, order_genes_or_fallback, ClusterOptions, ClusterOrdering, LinkageMethod, RowScaling};
    pub use crate::config::AnalysisConfig;
    pub use crate::data::{Comparison, ComparisonMode, CountMatrix, SampleMetadata};
    pub use crate::de::{DeEngine, DeParams, DeResults, GeneResult};
    pub use crate::enrichment::{gsea, GeneSet, GeneSetDatabase, GseaParams, GseaResult, RankedGenes, SetNamespace};
    pub use crate::error::{AnalysisStage, ComparisonFailure, DgeError, Result};
    pub use crate::identifiers::{
        detect_namespace, normalize_identifiers, AnyTranslator, DetectionParams, IdNamespace, IdentifierTranslator,
        MyGeneTranslator, NamespaceDetector, ResolutionStats, TableTranslator, TranslationParams,
    };
    pub use crate::io::{read_count_matrix, read_gmt, read_metadata};
    pub use crate::session::{
        progress_channel, AnalysisSession, ComparisonOutcome, GeneSetSource, Progress, StructuredSummary,
    };
    pub use crate::significance::{classify, Significance, Thresholds};
    pub use crate::transform::{vst, VstResult};
}
