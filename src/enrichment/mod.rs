//! Ranked gene-set enrichment
//!
//! A comparison's genes are ranked by log2 fold change and tested against
//! the sets of a named database. Databases keyed on Entrez ids need the
//! ranking translated first; genes without a translation only drop out of
//! that database's run.

mod gsea;

pub use gsea::{enrichment_score, gsea, GseaParams, GseaResult, RunningScore};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::de::GeneResult;
use crate::error::{DgeError, Result};
use crate::identifiers::{IdNamespace, Translation};
use crate::stats::cmp_f64;

/// Identifier space a gene-set database is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetNamespace {
    #[default]
    Symbol,
    Entrez,
}

impl SetNamespace {
    pub fn id_namespace(&self) -> IdNamespace {
        match self {
            SetNamespace::Symbol => IdNamespace::Symbol,
            SetNamespace::Entrez => IdNamespace::Entrez,
        }
    }

    pub fn needs_translation(&self) -> bool {
        *self != SetNamespace::Symbol
    }
}

impl fmt::Display for SetNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetNamespace::Symbol => "symbol",
            SetNamespace::Entrez => "entrez",
        })
    }
}

impl FromStr for SetNamespace {
    type Err = DgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "symbol" => Ok(SetNamespace::Symbol),
            "entrez" => Ok(SetNamespace::Entrez),
            other => Err(DgeError::InvalidInput {
                reason: format!("unknown gene-set namespace '{}' (symbol, entrez)", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSet {
    pub id: String,
    pub description: String,
    pub genes: Vec<String>,
}

/// A named collection of gene sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneSetDatabase {
    pub name: String,
    pub namespace: SetNamespace,
    pub sets: Vec<GeneSet>,
}

impl GeneSetDatabase {
    pub fn new(name: impl Into<String>, namespace: SetNamespace, sets: Vec<GeneSet>) -> Self {
        Self {
            name: name.into(),
            namespace,
            sets,
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Genes sorted by descending score, each id at most once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGenes {
    pub genes: Vec<String>,
    pub scores: Vec<f64>,
}

impl RankedGenes {
    /// Rank by log2 fold change, descending
    ///
    /// The sort is stable, so equal fold changes keep result order, and the
    /// first occurrence of a repeated id wins.
    pub fn from_results(results: &[GeneResult]) -> Self {
        let mut pairs: Vec<(&str, f64)> = results
            .iter()
            .filter(|g| g.log2_fold_change.is_finite())
            .map(|g| (g.gene_id.as_str(), g.log2_fold_change))
            .collect();
        pairs.sort_by(|a, b| cmp_f64(&b.1, &a.1));
        Self::dedup(pairs.into_iter().map(|(g, s)| (g.to_string(), s)))
    }

    fn dedup<I: IntoIterator<Item = (String, f64)>>(pairs: I) -> Self {
        let mut seen = HashSet::new();
        let mut genes = Vec::new();
        let mut scores = Vec::new();
        for (gene, score) in pairs {
            if seen.insert(gene.clone()) {
                genes.push(gene);
                scores.push(score);
            }
        }
        Self { genes, scores }
    }

    /// Re-key the ranking through `mapping`, dropping genes without a translation
    pub fn translate(&self, mapping: &Translation) -> Self {
        let translated = self
            .genes
            .iter()
            .zip(&self.scores)
            .filter_map(|(g, &s)| mapping.get(g).filter(|t| !t.is_empty()).map(|t| (t.clone(), s)));
        Self::dedup(translated)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(id: &str, lfc: f64) -> GeneResult {
        GeneResult {
            gene_id: id.to_string(),
            base_mean: 10.0,
            log2_fold_change: lfc,
            lfc_se: 0.1,
            stat: lfc * 10.0,
            pvalue: 0.01,
            padj: 0.02,
            dispersion: 0.1,
        }
    }

    #[test]
    fn test_ranking_sorted_and_deduplicated() {
        let results = vec![gene("A", 0.5), gene("B", 2.0), gene("A", 3.0), gene("C", -1.0), gene("D", 2.0)];
        let ranked = RankedGenes::from_results(&results);
        assert_eq!(ranked.genes, vec!["A", "B", "D", "C"]);
        assert_eq!(ranked.scores, vec![3.0, 2.0, 2.0, -1.0]);
    }

    #[test]
    fn test_translation_drops_missing_and_collisions() {
        let ranked = RankedGenes::from_results(&[gene("TP53", 2.0), gene("EGFR", 1.0), gene("XYZ", 0.5), gene("TP53B", 0.2)]);
        let mapping: Translation = [("TP53", "7157"), ("EGFR", "1956"), ("TP53B", "7157")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let translated = ranked.translate(&mapping);
        assert_eq!(translated.genes, vec!["7157", "1956"]);
        assert_eq!(translated.scores, vec![2.0, 1.0]);
    }

    #[test]
    fn test_namespace_parse() {
        assert_eq!("Entrez".parse::<SetNamespace>().unwrap(), SetNamespace::Entrez);
        assert!(SetNamespace::Entrez.needs_translation());
        assert!("kegg".parse::<SetNamespace>().is_err());
    }
}
