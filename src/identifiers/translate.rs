//! Identifier translation service boundary
//!
//! Implementations:
//! - [`MyGeneTranslator`]: batched HTTP queries against the mygene.info service
//! - [`TableTranslator`]: offline lookup table loaded from a TSV file
//! - [`AnyTranslator`]: runtime choice between the two

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DgeError, Result};
use crate::identifiers::IdNamespace;

/// Mapping from queried identifier to resolved identifier. Unresolved queries are absent.
pub type Translation = HashMap<String, String>;

/// An external identifier translation service
///
/// A call translates one batch; unresolved ids are simply missing from the map.
pub trait IdentifierTranslator: Send + Sync {
    fn translate(
        &self,
        ids: &[String],
        from: IdNamespace,
        to: IdNamespace,
    ) -> impl Future<Output = Result<Translation>> + Send;
}

/// Parameters for batched translation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationParams {
    /// Identifiers per request
    pub batch_size: usize,
    /// Hard bound on a whole translation call, in seconds
    pub timeout_secs: u64,
    /// Species hint passed to the service
    pub species: String,
}

impl Default for TranslationParams {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            timeout_secs: 300,
            species: "human".to_string(),
        }
    }
}

/// Translate `ids` in bounded batches under a hard timeout
///
/// A failing batch is logged and skipped; the remaining batches still run.
pub async fn translate_batched<T: IdentifierTranslator>(
    translator: &T,
    ids: &[String],
    from: IdNamespace,
    to: IdNamespace,
    params: &TranslationParams,
) -> Result<Translation> {
    let batch_size = params.batch_size.max(1);
    let work = async {
        let mut merged = Translation::with_capacity(ids.len());
        let n_batches = ids.len().div_ceil(batch_size);
        for (i, batch) in ids.chunks(batch_size).enumerate() {
            match translator.translate(batch, from, to).await {
                Ok(found) => {
                    log::debug!(
                        "translation batch {}/{}: {} of {} resolved",
                        i + 1,
                        n_batches,
                        found.len(),
                        batch.len()
                    );
                    for (k, v) in found {
                        merged.entry(k).or_insert(v);
                    }
                }
                Err(e) => {
                    log::warn!("translation batch {}/{} failed, skipping: {}", i + 1, n_batches, e);
                }
            }
        }
        merged
    };

    tokio::time::timeout(Duration::from_secs(params.timeout_secs), work)
        .await
        .map_err(|_| DgeError::ExternalServiceTimeout {
            service: "identifier translation".to_string(),
            seconds: params.timeout_secs,
        })
}

// ---------------------------------------------------------------------------
// mygene.info
// ---------------------------------------------------------------------------

const MYGENE_QUERY_URL: &str = "https://mygene.info/v3/query";

fn mygene_scope(ns: IdNamespace) -> Option<&'static str> {
    match ns {
        IdNamespace::Ensembl => Some("ensembl.gene"),
        IdNamespace::Entrez => Some("entrezgene"),
        IdNamespace::Uniprot => Some("uniprot"),
        IdNamespace::Symbol => Some("symbol"),
        IdNamespace::Unknown => None,
    }
}

fn mygene_field(ns: IdNamespace) -> Option<&'static str> {
    match ns {
        IdNamespace::Ensembl => Some("ensembl.gene"),
        IdNamespace::Entrez => Some("entrezgene"),
        IdNamespace::Uniprot => Some("uniprot.Swiss-Prot"),
        IdNamespace::Symbol => Some("symbol"),
        IdNamespace::Unknown => None,
    }
}

/// Batch translator backed by the mygene.info query endpoint
#[derive(Debug, Clone)]
pub struct MyGeneTranslator {
    client: reqwest::Client,
    url: String,
    species: String,
}

impl MyGeneTranslator {
    pub fn new(species: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("rust_dge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: MYGENE_QUERY_URL.to_string(),
            species: species.to_string(),
        })
    }

    /// Point at a different endpoint (mirrors, local stubs)
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Extract the first string value of `field` from one mygene hit.
/// Handles dotted paths, arrays, and numeric ids.
fn hit_value(hit: &Value, field: &str) -> Option<String> {
    let mut node = hit;
    for part in field.split('.') {
        node = match node {
            Value::Array(items) => items.first()?.get(part)?,
            other => other.get(part)?,
        };
    }
    match node {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        _ => None,
    }
}

/// Parse a mygene batch response body; the first hit per query wins
pub fn parse_mygene_response(body: &Value, field: &str) -> Translation {
    let mut out = Translation::new();
    let Some(hits) = body.as_array() else {
        return out;
    };
    for hit in hits {
        if hit.get("notfound").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let Some(query) = hit.get("query").and_then(Value::as_str) else {
            continue;
        };
        if out.contains_key(query) {
            continue;
        }
        if let Some(value) = hit_value(hit, field) {
            out.insert(query.to_string(), value);
        }
    }
    out
}

impl IdentifierTranslator for MyGeneTranslator {
    async fn translate(&self, ids: &[String], from: IdNamespace, to: IdNamespace) -> Result<Translation> {
        let (Some(scope), Some(field)) = (mygene_scope(from), mygene_field(to)) else {
            return Err(DgeError::InvalidInput {
                reason: format!("cannot translate {} identifiers to {}", from, to),
            });
        };
        if ids.is_empty() {
            return Ok(Translation::new());
        }

        let form = [
            ("q", ids.join(",")),
            ("scopes", scope.to_string()),
            ("fields", field.to_string()),
            ("species", self.species.clone()),
        ];
        let response = self.client.post(&self.url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(DgeError::TranslationService {
                reason: format!("{} returned HTTP {}", self.url, response.status()),
            });
        }
        let body: Value = response.json().await?;
        Ok(parse_mygene_response(&body, field))
    }
}

// ---------------------------------------------------------------------------
// Offline table
// ---------------------------------------------------------------------------

/// Offline translator over a table whose columns are identifier namespaces
///
/// The TSV header names the namespace of each column, e.g. `ensembl  symbol  entrez`.
#[derive(Debug, Clone, Default)]
pub struct TableTranslator {
    columns: Vec<IdNamespace>,
    rows: Vec<Vec<String>>,
}

impl TableTranslator {
    pub fn new(columns: Vec<IdNamespace>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} columns", columns.len()),
                got: format!("{} columns", bad.len()),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Load a tab-separated mapping table with a namespace header row
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(::csv::Trim::All)
            .from_path(path)?;
        let columns = reader
            .headers()?
            .iter()
            .map(|h| h.parse::<IdNamespace>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| DgeError::parse(path.display().to_string(), e.to_string()))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Self::new(columns, rows)
    }

    fn column(&self, ns: IdNamespace) -> Option<usize> {
        self.columns.iter().position(|&c| c == ns)
    }
}

impl IdentifierTranslator for TableTranslator {
    async fn translate(&self, ids: &[String], from: IdNamespace, to: IdNamespace) -> Result<Translation> {
        let (Some(src), Some(dst)) = (self.column(from), self.column(to)) else {
            return Ok(Translation::new());
        };
        let mut lookup: HashMap<&str, &str> = HashMap::with_capacity(self.rows.len());
        for row in &self.rows {
            if !row[dst].is_empty() {
                lookup.entry(row[src].as_str()).or_insert(row[dst].as_str());
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| lookup.get(id.as_str()).map(|v| (id.clone(), v.to_string())))
            .collect())
    }
}

/// Runtime-selected translator
#[derive(Debug, Clone)]
pub enum AnyTranslator {
    MyGene(MyGeneTranslator),
    Table(TableTranslator),
}

impl IdentifierTranslator for AnyTranslator {
    async fn translate(&self, ids: &[String], from: IdNamespace, to: IdNamespace) -> Result<Translation> {
        match self {
            AnyTranslator::MyGene(t) => t.translate(ids, from, to).await,
            AnyTranslator::Table(t) => t.translate(ids, from, to).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    fn table() -> TableTranslator {
        TableTranslator::new(
            vec![IdNamespace::Ensembl, IdNamespace::Symbol],
            vec![
                vec!["ENSG1".to_string(), "TP53".to_string()],
                vec!["ENSG2".to_string(), "EGFR".to_string()],
            ],
        )
        .unwrap()
    }

    /// Fails every second batch
    struct FlakyTranslator {
        calls: AtomicUsize,
    }

    impl IdentifierTranslator for FlakyTranslator {
        async fn translate(&self, ids: &[String], _from: IdNamespace, _to: IdNamespace) -> Result<Translation> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(DgeError::TranslationService {
                    reason: "boom".to_string(),
                });
            }
            Ok(ids.iter().map(|id| (id.clone(), format!("SYM_{}", id))).collect())
        }
    }

    struct SlowTranslator;

    impl IdentifierTranslator for SlowTranslator {
        async fn translate(&self, _ids: &[String], _from: IdNamespace, _to: IdNamespace) -> Result<Translation> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Translation::new())
        }
    }

    #[tokio::test]
    async fn test_table_translator_partial() {
        let ids = vec!["ENSG1".to_string(), "ENSG9".to_string()];
        let found = table()
            .translate(&ids, IdNamespace::Ensembl, IdNamespace::Symbol)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["ENSG1"], "TP53");
    }

    #[tokio::test]
    async fn test_table_translator_reverse_direction() {
        let ids = vec!["EGFR".to_string()];
        let found = table()
            .translate(&ids, IdNamespace::Symbol, IdNamespace::Ensembl)
            .await
            .unwrap();
        assert_eq!(found["EGFR"], "ENSG2");
    }

    #[tokio::test]
    async fn test_batched_skips_failed_batches() {
        let translator = FlakyTranslator {
            calls: AtomicUsize::new(0),
        };
        let ids: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        let params = TranslationParams {
            batch_size: 2,
            ..Default::default()
        };
        let found = translate_batched(&translator, &ids, IdNamespace::Entrez, IdNamespace::Symbol, &params)
            .await
            .unwrap();
        // batches [0,1] ok, [2,3] fail, [4] ok
        assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(found.len(), 3);
        assert!(found.contains_key("4"));
        assert!(!found.contains_key("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_times_out() {
        let params = TranslationParams {
            timeout_secs: 5,
            ..Default::default()
        };
        let ids = vec!["1".to_string()];
        let err = translate_batched(&SlowTranslator, &ids, IdNamespace::Entrez, IdNamespace::Symbol, &params)
            .await
            .unwrap_err();
        assert!(matches!(err, DgeError::ExternalServiceTimeout { seconds: 5, .. }));
    }

    #[test]
    fn test_parse_mygene_response() {
        let body = json!([
            {"query": "7157", "_id": "7157", "symbol": "TP53"},
            {"query": "7157", "_id": "x", "symbol": "DUPLICATE"},
            {"query": "999999999", "notfound": true},
            {"query": "TP53", "entrezgene": 7157},
            {"query": "ENSG00000141510", "ensembl": [{"gene": "ENSG00000141510"}]}
        ]);
        let symbols = parse_mygene_response(&body, "symbol");
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols["7157"], "TP53");

        let entrez = parse_mygene_response(&body, "entrezgene");
        assert_eq!(entrez["TP53"], "7157");

        let ensembl = parse_mygene_response(&body, "ensembl.gene");
        assert_eq!(ensembl["ENSG00000141510"], "ENSG00000141510");
    }

    #[test]
    fn test_table_from_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "entrez\tsymbol").unwrap();
        writeln!(file, "7157\tTP53").unwrap();
        let t = TableTranslator::from_tsv(file.path()).unwrap();
        assert_eq!(t.columns, vec![IdNamespace::Entrez, IdNamespace::Symbol]);
        assert_eq!(t.rows.len(), 1);
    }
}
