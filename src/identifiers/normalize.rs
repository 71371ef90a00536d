//! Normalization of matrix row identifiers to gene symbols

use std::collections::HashSet;

use serde::Serialize;

use crate::data::CountMatrix;
use crate::error::{DgeError, Result};
use crate::identifiers::translate::{translate_batched, IdentifierTranslator, TranslationParams};
use crate::identifiers::IdNamespace;

/// Outcome of identifier normalization
#[derive(Debug, Clone)]
pub struct Resolution {
    pub matrix: CountMatrix,
    /// Namespace detected on the raw identifiers
    pub source_namespace: IdNamespace,
    /// Namespace of the returned matrix rows
    pub namespace: IdNamespace,
    pub stats: ResolutionStats,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResolutionStats {
    pub n_input: usize,
    pub n_translated: usize,
    pub n_dropped: usize,
    pub n_output: usize,
}

/// Strip an Ensembl version suffix (`ENSG00000141510.16` -> `ENSG00000141510`)
pub fn strip_ensembl_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, version)) if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => stem,
        _ => id,
    }
}

/// Strip Ensembl versions and sum rows that collide afterwards.
/// Other namespaces are returned unchanged.
pub fn collapse_versions(matrix: &CountMatrix, namespace: IdNamespace) -> Result<CountMatrix> {
    if namespace != IdNamespace::Ensembl {
        return Ok(matrix.clone());
    }
    matrix.merge_rows(|id| Some(strip_ensembl_version(id).to_string()))
}

/// Normalize matrix rows to the gene-symbol space
///
/// Symbol and unknown namespaces pass through untouched. Ensembl versions are
/// stripped; then, when a translator is available, ids are looked up in batches.
/// Untranslated ids are dropped and ids resolving to the same symbol are summed.
pub async fn normalize_identifiers<T: IdentifierTranslator>(
    matrix: &CountMatrix,
    namespace: IdNamespace,
    translator: Option<&T>,
    params: &TranslationParams,
) -> Result<Resolution> {
    let n_input = matrix.n_genes();
    if !namespace.needs_translation() {
        return Ok(Resolution {
            matrix: matrix.clone(),
            source_namespace: namespace,
            namespace,
            stats: ResolutionStats {
                n_input,
                n_translated: 0,
                n_dropped: 0,
                n_output: n_input,
            },
        });
    }

    let collapsed = collapse_versions(matrix, namespace)?;

    let Some(translator) = translator else {
        log::warn!(
            "No identifier translator configured; keeping {} identifiers as-is",
            namespace
        );
        let n_output = collapsed.n_genes();
        return Ok(Resolution {
            matrix: collapsed,
            source_namespace: namespace,
            namespace,
            stats: ResolutionStats {
                n_input,
                n_translated: 0,
                n_dropped: 0,
                n_output,
            },
        });
    };

    let ids: Vec<String> = collapsed.gene_ids().to_vec();
    log::info!("Translating {} {} identifiers to gene symbols", ids.len(), namespace);
    let mapping = translate_batched(translator, &ids, namespace, IdNamespace::Symbol, params).await?;

    let translated = collapsed.merge_rows(|id| mapping.get(id).filter(|s| !s.is_empty()).cloned())?;
    if translated.n_genes() == 0 {
        return Err(DgeError::NoIdentifiersTranslated {
            namespace: namespace.to_string(),
            n_queried: ids.len(),
        });
    }

    let n_translated = ids.iter().filter(|id| mapping.contains_key(*id)).count();
    let n_dropped = ids.len() - n_translated;
    if n_dropped > 0 {
        log::warn!("{} of {} identifiers could not be translated and were dropped", n_dropped, ids.len());
    }
    let distinct: HashSet<&String> = mapping.values().collect();
    log::info!(
        "{} identifiers translated onto {} distinct symbols",
        n_translated,
        distinct.len()
    );

    let n_output = translated.n_genes();
    Ok(Resolution {
        matrix: translated,
        source_namespace: namespace,
        namespace: IdNamespace::Symbol,
        stats: ResolutionStats {
            n_input,
            n_translated,
            n_dropped,
            n_output,
        },
    })
}
