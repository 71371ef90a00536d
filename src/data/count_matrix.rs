//! Count matrix representation for RNA-seq data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DgeError, Result};

/// A count matrix of raw RNA-seq read counts
/// Rows are genes, columns are samples. Gene identifiers are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers, unique
    gene_ids: Vec<String>,
    /// Sample identifiers, unique
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    ///
    /// Duplicate gene identifiers are rejected here; use [`CountMatrix::from_rows`]
    /// to sum rows that share an identifier.
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DgeError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        let mut seen = HashMap::with_capacity(n_samples);
        for id in &sample_ids {
            if seen.insert(id.as_str(), ()).is_some() {
                return Err(DgeError::InvalidCountMatrix {
                    reason: format!("Duplicate sample name '{}'", id),
                });
            }
        }

        let mut seen = HashMap::with_capacity(n_genes);
        for id in &gene_ids {
            if seen.insert(id.as_str(), ()).is_some() {
                return Err(DgeError::InvalidCountMatrix {
                    reason: format!("Duplicate gene identifier '{}'", id),
                });
            }
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    /// Build a matrix from (gene id, counts) rows, summing rows that share an id.
    /// Row order follows the first occurrence of each id.
    pub fn from_rows<I>(rows: I, sample_ids: Vec<String>) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        let n_samples = sample_ids.len();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut gene_ids: Vec<String> = Vec::new();
        let mut data: Vec<f64> = Vec::new();
        let mut n_merged = 0usize;

        for (gene_id, values) in rows {
            if values.len() != n_samples {
                return Err(DgeError::DimensionMismatch {
                    expected: format!("{} counts for gene '{}'", n_samples, gene_id),
                    got: format!("{}", values.len()),
                });
            }
            match index.get(&gene_id) {
                Some(&row) => {
                    let offset = row * n_samples;
                    for (j, v) in values.iter().enumerate() {
                        data[offset + j] += v;
                    }
                    n_merged += 1;
                }
                None => {
                    index.insert(gene_id.clone(), gene_ids.len());
                    gene_ids.push(gene_id);
                    data.extend_from_slice(&values);
                }
            }
        }

        if n_merged > 0 {
            log::warn!("{} row(s) shared an identifier with an earlier row and were summed", n_merged);
        }

        let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), data).map_err(|e| {
            DgeError::InvalidCountMatrix {
                reason: e.to_string(),
            }
        })?;
        Self::new(counts, gene_ids, sample_ids)
    }

    /// Re-key rows through `resolve`, summing per sample the rows that land on the same key.
    /// Rows for which `resolve` returns `None` are dropped.
    pub fn merge_rows<F>(&self, mut resolve: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let rows: Vec<(String, Vec<f64>)> = self
            .gene_ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| resolve(id).map(|key| (key, self.counts.row(i).to_vec())))
            .collect();
        Self::from_rows(rows, self.sample_ids.clone())
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// Get gene IDs
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Get gene index by ID
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Get sample index by ID
    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Calculate sum of counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Subset to specific samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        Self::new(new_counts, self.gene_ids.clone(), new_sample_ids)
    }

    /// Subset to specific genes
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), gene_indices);
        let new_gene_ids: Vec<String> = gene_indices
            .iter()
            .map(|&i| self.gene_ids[i].clone())
            .collect();

        Self::new(new_counts, new_gene_ids, self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids(&["gene1", "gene2"]), ids(&["s1", "s2", "s3"])).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        let result = CountMatrix::new(counts, ids(&["gene1", "gene2"]), ids(&["s1", "s2"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_gene_ids_rejected_by_new() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let result = CountMatrix::new(counts, ids(&["g", "g"]), ids(&["s1", "s2"]));
        assert!(matches!(result, Err(DgeError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_library_sizes() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids(&["gene1", "gene2"]), ids(&["s1", "s2"])).unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
    }

    #[test]
    fn test_from_rows_sums_duplicates() {
        let rows = vec![
            ("A".to_string(), vec![1.0, 2.0]),
            ("B".to_string(), vec![5.0, 5.0]),
            ("A".to_string(), vec![10.0, 20.0]),
        ];
        let m = CountMatrix::from_rows(rows, ids(&["s1", "s2"])).unwrap();
        assert_eq!(m.gene_ids(), &ids(&["A", "B"])[..]);
        assert_eq!(m.gene_counts(0).to_vec(), vec![11.0, 22.0]);
        assert_eq!(m.gene_counts(1).to_vec(), vec![5.0, 5.0]);
    }

    #[test]
    fn test_merge_rows_drops_and_sums() {
        let counts = array![[1.0, 1.0], [2.0, 3.0], [4.0, 4.0]];
        let m = CountMatrix::new(counts, ids(&["x.1", "x.2", "drop"]), ids(&["s1", "s2"])).unwrap();
        let merged = m
            .merge_rows(|id| if id == "drop" { None } else { Some("x".to_string()) })
            .unwrap();
        assert_eq!(merged.n_genes(), 1);
        assert_eq!(merged.gene_counts(0).to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_subset_samples() {
        let counts = array![[1.0, 2.0, 3.0]];
        let m = CountMatrix::new(counts, ids(&["g"]), ids(&["a", "b", "c"])).unwrap();
        let sub = m.subset_samples(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &ids(&["c", "a"])[..]);
        assert_eq!(sub.gene_counts(0).to_vec(), vec![3.0, 1.0]);
    }
}
