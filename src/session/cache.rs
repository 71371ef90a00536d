//! Per-session store of computed comparison results

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::de::DeResults;
use crate::enrichment::GseaResult;

/// What kind of result a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    DifferentialExpression,
    Enrichment,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnalysisKind::DifferentialExpression => "differential expression",
            AnalysisKind::Enrichment => "enrichment",
        })
    }
}

/// (comparison name, analysis kind, database name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub comparison: String,
    pub kind: AnalysisKind,
    pub database: Option<String>,
}

impl CacheKey {
    pub fn de(comparison: &str) -> Self {
        Self {
            comparison: comparison.to_string(),
            kind: AnalysisKind::DifferentialExpression,
            database: None,
        }
    }

    pub fn enrichment(comparison: &str, database: &str) -> Self {
        Self {
            comparison: comparison.to_string(),
            kind: AnalysisKind::Enrichment,
            database: Some(database.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub inserts: usize,
}

/// Write-once result cache
///
/// The first value stored under a key is kept for the rest of the session;
/// later inserts under the same key return the stored value. Only
/// [`ComparisonCache::clear`] removes entries.
#[derive(Debug, Default)]
pub struct ComparisonCache {
    de: HashMap<CacheKey, Arc<DeResults>>,
    enrichment: HashMap<CacheKey, Arc<Vec<GseaResult>>>,
    stats: CacheStats,
}

impl ComparisonCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn de(&mut self, comparison: &str) -> Option<Arc<DeResults>> {
        let found = self.de.get(&CacheKey::de(comparison)).cloned();
        self.record(found.is_some());
        found
    }

    /// Lookup without touching the hit/miss counters
    pub fn peek_de(&self, comparison: &str) -> Option<&Arc<DeResults>> {
        self.de.get(&CacheKey::de(comparison))
    }

    pub fn insert_de(&mut self, results: DeResults) -> Arc<DeResults> {
        let key = CacheKey::de(&results.name());
        let stats = &mut self.stats;
        let stored = self.de.entry(key).or_insert_with(|| {
            stats.inserts += 1;
            Arc::new(results)
        });
        Arc::clone(stored)
    }

    pub fn enrichment(&mut self, comparison: &str, database: &str) -> Option<Arc<Vec<GseaResult>>> {
        let found = self.enrichment.get(&CacheKey::enrichment(comparison, database)).cloned();
        self.record(found.is_some());
        found
    }

    pub fn insert_enrichment(&mut self, comparison: &str, database: &str, results: Vec<GseaResult>) -> Arc<Vec<GseaResult>> {
        let key = CacheKey::enrichment(comparison, database);
        let stats = &mut self.stats;
        let stored = self.enrichment.entry(key).or_insert_with(|| {
            stats.inserts += 1;
            Arc::new(results)
        });
        Arc::clone(stored)
    }

    /// Cached enrichment tables of one comparison, sorted by database name
    pub fn enrichments_for(&self, comparison: &str) -> Vec<(&str, &Arc<Vec<GseaResult>>)> {
        let mut found: Vec<(&str, &Arc<Vec<GseaResult>>)> = self
            .enrichment
            .iter()
            .filter(|(k, _)| k.comparison == comparison)
            .filter_map(|(k, v)| k.database.as_deref().map(|db| (db, v)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));
        found
    }

    /// Names of comparisons with cached DE results, sorted
    pub fn comparisons(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.de.keys().map(|k| k.comparison.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        match key.kind {
            AnalysisKind::DifferentialExpression => self.de.contains_key(key),
            AnalysisKind::Enrichment => self.enrichment.contains_key(key),
        }
    }

    pub fn len(&self) -> usize {
        self.de.len() + self.enrichment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            log::debug!("Clearing {} cached results", self.len());
        }
        self.de.clear();
        self.enrichment.clear();
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Comparison;
    use crate::dispersion::DispersionTrend;

    fn results(baseline: &str, comparison: &str, n_tested: usize) -> DeResults {
        DeResults {
            comparison: Comparison::new(baseline, comparison),
            genes: Vec::new(),
            sample_ids: Vec::new(),
            size_factors: Vec::new(),
            trend: DispersionTrend::Mean { dispersion: 0.1 },
            filter_theta: 0.0,
            filter_cutoff: 0.0,
            n_tested,
            n_dropped: 0,
        }
    }

    #[test]
    fn test_write_once() {
        let mut cache = ComparisonCache::new();
        let first = cache.insert_de(results("A", "B", 10));
        let second = cache.insert_de(results("A", "B", 99));
        assert_eq!(first.n_tested, 10);
        assert_eq!(second.n_tested, 10);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().inserts, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut cache = ComparisonCache::new();
        cache.insert_de(results("A", "B", 1));
        cache.insert_enrichment("B_vs_A", "GO", Vec::new());
        cache.insert_enrichment("B_vs_A", "KEGG", Vec::new());
        cache.insert_enrichment("C_vs_A", "GO", Vec::new());

        assert!(cache.de("B_vs_A").is_some());
        assert!(cache.de("C_vs_A").is_none());
        assert!(cache.enrichment("B_vs_A", "GO").is_some());
        assert!(cache.enrichment("B_vs_A", "Reactome").is_none());
        let dbs: Vec<&str> = cache.enrichments_for("B_vs_A").iter().map(|(d, _)| *d).collect();
        assert_eq!(dbs, vec!["GO", "KEGG"]);
        assert_eq!(cache.comparisons(), vec!["B_vs_A"]);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 2, inserts: 4 });
    }

    #[test]
    fn test_clear() {
        let mut cache = ComparisonCache::new();
        cache.insert_de(results("A", "B", 1));
        assert!(cache.contains(&CacheKey::de("B_vs_A")));
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&CacheKey::de("B_vs_A")));
    }
}
