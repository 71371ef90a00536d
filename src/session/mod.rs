//! Analysis session: one dataset, its comparisons and everything derived from them
//!
//! The session owns the dataset, the result cache, the readiness gate and the
//! exclusive handle to the statistical engine. Comparisons are fitted one at a
//! time on that handle, off the async reactor. Changing significance
//! thresholds keeps cached results; loading a new dataset drops them.

mod cache;
mod progress;
mod readiness;

pub use cache::{AnalysisKind, CacheKey, CacheStats, ComparisonCache};
pub use progress::{progress_channel, Progress, ProgressSender};
pub use readiness::{ReadinessGate, ReadinessState};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinError;

use crate::cluster::{order_genes_or_fallback, ClusterOptions, ClusterOrdering};
use crate::config::AnalysisConfig;
use crate::data::{Comparison, ComparisonMode, CountMatrix, SampleMetadata};
use crate::de::{DeEngine, DeResults, GeneResult};
use crate::enrichment::{gsea, GeneSetDatabase, GseaResult, RankedGenes, SetNamespace};
use crate::error::{AnalysisStage, ComparisonFailure, DgeError, Result};
use crate::identifiers::{
    normalize_identifiers, translate_batched, AnyTranslator, IdNamespace, IdentifierTranslator, NamespaceDetector,
    ResolutionStats,
};
use crate::io::{read_count_matrix, read_gmt, read_metadata};
use crate::significance::{classify, Significance, SignificanceSummary, Thresholds};

/// Outcome of one comparison in a batch
pub type ComparisonOutcome = std::result::Result<Arc<DeResults>, ComparisonFailure>;

/// The dataset an analysis runs on, after identifier resolution
#[derive(Debug, Clone)]
pub struct Dataset {
    pub matrix: CountMatrix,
    pub metadata: SampleMetadata,
    /// Namespace of the raw row identifiers
    pub source_namespace: IdNamespace,
    /// Namespace of the matrix rows after resolution
    pub namespace: IdNamespace,
    pub resolution: ResolutionStats,
}

/// A GMT file loaded during backend bring-up
#[derive(Debug, Clone)]
pub struct GeneSetSource {
    pub name: String,
    pub path: PathBuf,
    pub namespace: SetNamespace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneSummary {
    pub gene_id: String,
    pub log2_fold_change: f64,
    pub padj: f64,
    pub base_mean: f64,
}

impl From<&GeneResult> for GeneSummary {
    fn from(g: &GeneResult) -> Self {
        Self {
            gene_id: g.gene_id.clone(),
            log2_fold_change: g.log2_fold_change,
            padj: g.padj,
            base_mean: g.base_mean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetSummary {
    pub id: String,
    pub description: String,
    pub nes: f64,
    pub padj: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentSummary {
    pub database: String,
    pub n_significant: usize,
    pub top_sets: Vec<SetSummary>,
}

/// Numeric digest of one comparison for narrative text generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredSummary {
    pub comparison: String,
    pub baseline: String,
    pub condition: String,
    pub n_samples: usize,
    pub significance: SignificanceSummary,
    pub top_up: Vec<GeneSummary>,
    pub top_down: Vec<GeneSummary>,
    pub enrichment: Vec<EnrichmentSummary>,
}

pub struct AnalysisSession<T: IdentifierTranslator + 'static = AnyTranslator> {
    config: AnalysisConfig,
    thresholds: Thresholds,
    dataset: Option<Arc<Dataset>>,
    cache: ComparisonCache,
    gate: Arc<ReadinessGate>,
    engine: Arc<Mutex<DeEngine>>,
    sources: Vec<GeneSetSource>,
    databases: Arc<RwLock<BTreeMap<String, Arc<GeneSetDatabase>>>>,
    translator: Option<Arc<T>>,
    progress: ProgressSender,
    enrichment_runs: usize,
}

fn joined<R>(outcome: std::result::Result<Result<R>, JoinError>) -> Result<R> {
    outcome.map_err(|e| DgeError::Background { reason: e.to_string() })?
}

impl<T: IdentifierTranslator + 'static> AnalysisSession<T> {
    pub fn new(config: AnalysisConfig) -> Self {
        let gate = ReadinessGate::new(Duration::from_secs(config.init_timeout_secs));
        Self {
            thresholds: config.thresholds,
            engine: Arc::new(Mutex::new(DeEngine::new(config.de.clone()))),
            config,
            dataset: None,
            cache: ComparisonCache::new(),
            gate: Arc::new(gate),
            sources: Vec::new(),
            databases: Arc::new(RwLock::new(BTreeMap::new())),
            translator: None,
            progress: ProgressSender::silent(),
            enrichment_runs: 0,
        }
    }

    pub fn with_translator(mut self, translator: T) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    /// Gene-set files to load during [`AnalysisSession::initialize`]
    pub fn with_gene_sets(mut self, sources: Vec<GeneSetSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_deref()
    }

    /// Shared handle to the readiness gate, for callers that wait on bring-up
    pub fn readiness(&self) -> Arc<ReadinessGate> {
        Arc::clone(&self.gate)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Comparisons fitted by the engine so far
    pub async fn engine_runs(&self) -> usize {
        self.engine.lock().await.runs()
    }

    /// Enrichment analyses actually computed (cache hits excluded)
    pub fn enrichment_runs(&self) -> usize {
        self.enrichment_runs
    }

    /// Bring up the statistical backend
    ///
    /// Warms up the engine, then loads each configured gene-set database.
    /// Concurrent calls share one initialization.
    pub async fn initialize(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let databases = Arc::clone(&self.databases);
        let sources = self.sources.clone();
        let progress = self.progress.clone();

        self.gate
            .ensure_ready(async move {
                progress.status("Starting statistical engine");
                let mut handle = engine.lock_owned().await;
                joined(tokio::task::spawn_blocking(move || handle.warm_up()).await)?;
                progress.console("engine warm-up fit completed");

                for source in sources {
                    progress.status(format!("Loading gene-set database {}", source.name));
                    let GeneSetSource { name, path, namespace } = source;
                    let db = joined(tokio::task::spawn_blocking(move || read_gmt(&path, &name, namespace)).await)?;
                    progress.console(format!("{}: {} sets, {} identifiers", db.name, db.len(), db.namespace));
                    databases.write().await.insert(db.name.clone(), Arc::new(db));
                }
                Ok(())
            })
            .await
    }

    /// Register an in-memory gene-set database
    pub async fn add_database(&self, database: GeneSetDatabase) {
        log::debug!("Registering gene-set database {} ({} sets)", database.name, database.len());
        self.databases
            .write()
            .await
            .insert(database.name.clone(), Arc::new(database));
    }

    pub async fn database_names(&self) -> Vec<String> {
        self.databases.read().await.keys().cloned().collect()
    }

    /// Replace the dataset
    ///
    /// Detects the identifier namespace, normalizes rows to gene symbols and
    /// checks that every sample has a condition. All cached results are
    /// dropped.
    pub async fn load_dataset(&mut self, matrix: CountMatrix, metadata: SampleMetadata) -> Result<&Dataset> {
        let namespace = NamespaceDetector::new(&self.config.detection)?.detect(matrix.gene_ids());
        self.progress.status(format!(
            "Detected {} identifiers on {} genes x {} samples",
            namespace,
            matrix.n_genes(),
            matrix.n_samples()
        ));

        let resolution =
            normalize_identifiers(&matrix, namespace, self.translator.as_deref(), &self.config.translation).await?;
        metadata.validate_against(&resolution.matrix)?;
        self.progress.console(format!(
            "identifier resolution: {} in, {} translated, {} dropped, {} rows out",
            resolution.stats.n_input, resolution.stats.n_translated, resolution.stats.n_dropped, resolution.stats.n_output
        ));

        self.cache.clear();
        self.dataset = Some(Arc::new(Dataset {
            matrix: resolution.matrix,
            metadata,
            source_namespace: resolution.source_namespace,
            namespace: resolution.namespace,
            resolution: resolution.stats,
        }));
        self.dataset.as_deref().ok_or_else(|| DgeError::InvalidInput {
            reason: "no dataset loaded".to_string(),
        })
    }

    /// [`AnalysisSession::load_dataset`] from count and metadata files
    pub async fn load_files(&mut self, counts: &Path, metadata: &Path) -> Result<&Dataset> {
        let matrix = read_count_matrix(counts)?;
        let metadata = read_metadata(metadata)?;
        self.load_dataset(matrix, metadata).await
    }

    /// Change the significance policy; cached results stay valid
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<()> {
        let thresholds = Thresholds::new(thresholds.padj, thresholds.log2fc)?;
        log::info!(
            "Significance thresholds set to padj < {}, |log2FC| > {}",
            thresholds.padj,
            thresholds.log2fc
        );
        self.thresholds = thresholds;
        Ok(())
    }

    fn require_dataset(&self) -> Result<Arc<Dataset>> {
        self.dataset.clone().ok_or_else(|| DgeError::InvalidInput {
            reason: "no dataset loaded".to_string(),
        })
    }

    fn results(&self, comparison: &str) -> Result<&Arc<DeResults>> {
        self.cache.peek_de(comparison).ok_or_else(|| DgeError::InvalidInput {
            reason: format!("comparison '{}' has not been run", comparison),
        })
    }

    /// Run every comparison of `mode`, one after another
    ///
    /// Planning errors and an unready backend reject the whole request. Past
    /// that point each comparison succeeds or fails on its own; a failure
    /// does not undo earlier successes.
    pub async fn run_comparisons(&mut self, mode: &ComparisonMode) -> Result<Vec<(String, ComparisonOutcome)>> {
        self.gate.check_ready()?;
        let dataset = self.require_dataset()?;
        let plan = mode.plan(&dataset.metadata)?;
        self.progress
            .status(format!("Running {} comparison(s)", plan.len()));

        let mut outcomes = Vec::with_capacity(plan.len());
        for comparison in plan {
            let outcome = self.run_comparison(&comparison).await;
            if let Err(failure) = &outcome {
                log::warn!("{}", failure);
            }
            outcomes.push((comparison.name(), outcome));
        }
        Ok(outcomes)
    }

    /// Fit one comparison, or return its cached results
    pub async fn run_comparison(&mut self, comparison: &Comparison) -> ComparisonOutcome {
        let name = comparison.name();
        if let Some(hit) = self.cache.de(&name) {
            log::debug!("{}: served from cache", name);
            return Ok(hit);
        }

        let fail = |stage, error| ComparisonFailure {
            comparison: name.clone(),
            stage,
            error,
        };
        self.gate
            .check_ready()
            .map_err(|e| fail(AnalysisStage::BackendInit, e))?;
        let dataset = self
            .require_dataset()
            .map_err(|e| fail(AnalysisStage::DifferentialExpression, e))?;

        self.progress.status(format!("Fitting {}", name));
        let mut engine = Arc::clone(&self.engine).lock_owned().await;
        let job = comparison.clone();
        let fitted = joined(
            tokio::task::spawn_blocking(move || engine.run(&dataset.matrix, &dataset.metadata, &job)).await,
        )
        .map_err(|e| fail(AnalysisStage::DifferentialExpression, e))?;

        self.progress.console(format!(
            "{}: {} genes reported, {} dropped, filter threshold {:.4}",
            name,
            fitted.n_genes(),
            fitted.n_dropped,
            fitted.filter_cutoff
        ));
        Ok(self.cache.insert_de(fitted))
    }

    /// Up/down views of a fitted comparison under the current thresholds
    pub fn significance(&self, comparison: &str) -> Result<Significance<'_>> {
        let results = self.results(comparison)?;
        Ok(classify(&results.genes, &self.thresholds))
    }

    /// Ranked enrichment of a fitted comparison against one database
    ///
    /// Computed once per (comparison, database) and cached; an empty list
    /// means no significant enrichment. Failures name both the comparison
    /// and the database and leave other databases untouched.
    pub async fn enrichment(&mut self, comparison: &str, database: &str) -> Result<Arc<Vec<GseaResult>>> {
        if let Some(hit) = self.cache.enrichment(comparison, database) {
            log::debug!("{} / {}: served from cache", comparison, database);
            return Ok(hit);
        }
        let results = Arc::clone(self.results(comparison)?);

        let outcome = self.compute_enrichment(&results, database).await;
        let computed = outcome.map_err(|e| match e {
            DgeError::ExternalServiceTimeout { .. } | DgeError::EnrichmentFailed { .. } => e,
            other => DgeError::EnrichmentFailed {
                comparison: comparison.to_string(),
                database: database.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.enrichment_runs += 1;
        Ok(self.cache.insert_enrichment(comparison, database, computed))
    }

    async fn compute_enrichment(&self, results: &DeResults, database: &str) -> Result<Vec<GseaResult>> {
        self.gate.check_ready()?;
        let db = self
            .databases
            .read()
            .await
            .get(database)
            .cloned()
            .ok_or_else(|| DgeError::InvalidInput {
                reason: format!("gene-set database '{}' is not loaded", database),
            })?;
        let dataset = self.require_dataset()?;

        let mut ranked = RankedGenes::from_results(&results.genes);
        let from = match dataset.namespace {
            IdNamespace::Unknown => IdNamespace::Symbol,
            ns => ns,
        };
        let to = db.namespace.id_namespace();
        if from != to {
            let translator = self.translator.as_deref().ok_or_else(|| DgeError::TranslationService {
                reason: format!("no identifier translator configured for {} gene sets", db.namespace),
            })?;
            self.progress
                .status(format!("Translating {} ranked genes to {} for {}", ranked.len(), to, db.name));
            let mapping = translate_batched(translator, &ranked.genes, from, to, &self.config.translation).await?;
            let translated = ranked.translate(&mapping);
            if translated.len() < ranked.len() {
                log::warn!(
                    "{}: {} of {} ranked genes have no {} id and are left out",
                    db.name,
                    ranked.len() - translated.len(),
                    ranked.len(),
                    to
                );
            }
            ranked = translated;
        }

        self.progress
            .status(format!("Enrichment of {} against {}", results.name(), db.name));
        let params = self.config.gsea.clone();
        let found = joined(tokio::task::spawn_blocking(move || gsea(&ranked, &db, &params)).await)?;
        if found.is_empty() {
            log::info!("{} / {}: no significant enrichment", results.name(), database);
        }
        Ok(found)
    }

    /// Heatmap order for a fitted comparison
    ///
    /// `genes` defaults to the comparison's significant genes under the
    /// current thresholds, `options` to the configured clustering options.
    /// Clustering failures fall back to the input order, with the reason
    /// recorded on the result.
    pub async fn cluster(
        &self,
        comparison: &str,
        genes: Option<Vec<String>>,
        options: Option<ClusterOptions>,
    ) -> Result<ClusterOrdering> {
        let results = Arc::clone(self.results(comparison)?);
        let dataset = self.require_dataset()?;
        let subset = match genes {
            Some(g) => g,
            None => classify(&results.genes, &self.thresholds).significant_ids(),
        };
        let options = options.unwrap_or(self.config.cluster);

        self.progress
            .status(format!("Clustering {} genes of {} ({})", subset.len(), comparison, options.method));
        joined(
            tokio::task::spawn_blocking(move || {
                Ok(order_genes_or_fallback(&dataset.matrix, &subset, &options, Some(results.as_ref())))
            })
            .await,
        )
    }

    /// Counts, top genes and cached enrichment of one comparison
    pub fn structured_summary(&self, comparison: &str, top_n: usize) -> Result<StructuredSummary> {
        let results = self.results(comparison)?;
        let significance = classify(&results.genes, &self.thresholds);

        let enrichment = self
            .cache
            .enrichments_for(comparison)
            .into_iter()
            .map(|(database, sets)| EnrichmentSummary {
                database: database.to_string(),
                n_significant: sets.len(),
                top_sets: sets
                    .iter()
                    .take(top_n)
                    .map(|s| SetSummary {
                        id: s.id.clone(),
                        description: s.description.clone(),
                        nes: s.nes,
                        padj: s.padj,
                    })
                    .collect(),
            })
            .collect();

        Ok(StructuredSummary {
            comparison: results.name(),
            baseline: results.comparison.baseline.clone(),
            condition: results.comparison.comparison.clone(),
            n_samples: results.sample_ids.len(),
            significance: significance.summary(),
            top_up: significance.up.iter().take(top_n).map(|g| GeneSummary::from(*g)).collect(),
            top_down: significance.down.iter().take(top_n).map(|g| GeneSummary::from(*g)).collect(),
            enrichment,
        })
    }
}
