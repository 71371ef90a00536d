//! Gene identifier namespace detection

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};

/// Gene identifier namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdNamespace {
    Ensembl,
    Entrez,
    Uniprot,
    Symbol,
    Unknown,
}

impl IdNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdNamespace::Ensembl => "ensembl",
            IdNamespace::Entrez => "entrez",
            IdNamespace::Uniprot => "uniprot",
            IdNamespace::Symbol => "symbol",
            IdNamespace::Unknown => "unknown",
        }
    }

    /// Whether rows in this namespace must be looked up to reach gene symbols
    pub fn needs_translation(&self) -> bool {
        matches!(self, IdNamespace::Ensembl | IdNamespace::Entrez | IdNamespace::Uniprot)
    }
}

impl fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdNamespace {
    type Err = DgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ensembl" | "ensembl_gene" | "ensembl.gene" => Ok(IdNamespace::Ensembl),
            "entrez" | "entrezgene" | "ncbi" => Ok(IdNamespace::Entrez),
            "uniprot" => Ok(IdNamespace::Uniprot),
            "symbol" | "gene_symbol" => Ok(IdNamespace::Symbol),
            "unknown" => Ok(IdNamespace::Unknown),
            other => Err(DgeError::InvalidInput {
                reason: format!("Unknown identifier namespace '{}'", other),
            }),
        }
    }
}

/// Parameters for namespace detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// How many leading identifiers are scored
    pub sample_size: usize,
    pub ensembl_threshold: f64,
    pub uniprot_threshold: f64,
    pub entrez_threshold: f64,
    pub symbol_threshold: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            sample_size: 100,
            ensembl_threshold: 0.7,
            uniprot_threshold: 0.7,
            entrez_threshold: 0.7,
            symbol_threshold: 0.5,
        }
    }
}

const ENSEMBL_PATTERN: &str = r"^ENS[A-Z]*G\d{11}(\.\d+)?$";
const UNIPROT_PATTERN: &str =
    r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})(-\d+)?$";
const ENTREZ_PATTERN: &str = r"^\d+$";
const SYMBOL_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9-]*(\.\d+)?$";

/// Prioritized pattern table: Ensembl, UniProt, Entrez, then Symbol
pub struct NamespaceDetector {
    rules: Vec<(IdNamespace, Regex, f64)>,
    sample_size: usize,
}

impl NamespaceDetector {
    pub fn new(params: &DetectionParams) -> Result<Self> {
        let table = [
            (IdNamespace::Ensembl, ENSEMBL_PATTERN, params.ensembl_threshold),
            (IdNamespace::Uniprot, UNIPROT_PATTERN, params.uniprot_threshold),
            (IdNamespace::Entrez, ENTREZ_PATTERN, params.entrez_threshold),
            (IdNamespace::Symbol, SYMBOL_PATTERN, params.symbol_threshold),
        ];
        let mut rules = Vec::with_capacity(table.len());
        for (namespace, pattern, threshold) in table {
            let re = Regex::new(pattern).map_err(|e| DgeError::InvalidInput {
                reason: format!("bad {} pattern: {}", namespace, e),
            })?;
            rules.push((namespace, re, threshold));
        }
        Ok(Self {
            rules,
            sample_size: params.sample_size.max(1),
        })
    }

    /// Detect the namespace of a list of identifiers
    ///
    /// Scores the first `sample_size` ids against each pattern in priority order and
    /// returns the first namespace whose match fraction exceeds its threshold.
    pub fn detect<S: AsRef<str>>(&self, ids: &[S]) -> IdNamespace {
        let sample: Vec<&str> = ids
            .iter()
            .take(self.sample_size)
            .map(|s| s.as_ref().trim())
            .collect();
        if sample.is_empty() {
            return IdNamespace::Unknown;
        }

        for (namespace, re, threshold) in &self.rules {
            let hits = sample.iter().filter(|id| re.is_match(id)).count();
            let fraction = hits as f64 / sample.len() as f64;
            log::debug!("namespace {}: {}/{} sampled ids match", namespace, hits, sample.len());
            if fraction > *threshold {
                return *namespace;
            }
        }
        IdNamespace::Unknown
    }
}

/// Detect with default parameters
pub fn detect_namespace<S: AsRef<str>>(ids: &[S]) -> Result<IdNamespace> {
    Ok(NamespaceDetector::new(&DetectionParams::default())?.detect(ids))
}
