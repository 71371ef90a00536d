//! Sample-to-condition metadata

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::data::CountMatrix;
use crate::error::{DgeError, Result};

/// Sample metadata: one condition label per sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleMetadata {
    /// Sample identifiers, unique
    sample_ids: Vec<String>,
    /// Condition label for each sample (parallel to `sample_ids`)
    conditions: Vec<String>,
}

impl SampleMetadata {
    /// Create new sample metadata from parallel vectors of samples and labels
    pub fn new(sample_ids: Vec<String>, conditions: Vec<String>) -> Result<Self> {
        if sample_ids.len() != conditions.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} condition labels", sample_ids.len()),
                got: format!("{} condition labels", conditions.len()),
            });
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (id, label) in sample_ids.iter().zip(conditions.iter()) {
            if let Some(prev) = seen.insert(id.as_str(), label.as_str()) {
                return Err(DgeError::InvalidMetadata {
                    reason: format!(
                        "Sample '{}' listed more than once (conditions '{}' and '{}')",
                        id, prev, label
                    ),
                });
            }
        }

        Ok(Self {
            sample_ids,
            conditions,
        })
    }

    /// Create from (sample, condition) pairs
    pub fn from_pairs<I, S, C>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, C)>,
        S: Into<String>,
        C: Into<String>,
    {
        let (samples, labels): (Vec<String>, Vec<String>) =
            pairs.into_iter().map(|(s, c)| (s.into(), c.into())).unzip();
        Self::new(samples, labels)
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples described
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Condition label for a sample, if present
    pub fn condition_of(&self, sample_id: &str) -> Option<&str> {
        self.sample_ids
            .iter()
            .position(|s| s == sample_id)
            .map(|i| self.conditions[i].as_str())
    }

    /// Distinct condition labels, sorted
    pub fn conditions(&self) -> Vec<String> {
        self.conditions
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Samples carrying the given label, in metadata order
    pub fn samples_with(&self, condition: &str) -> Vec<&str> {
        self.sample_ids
            .iter()
            .zip(self.conditions.iter())
            .filter(|(_, c)| *c == condition)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    /// Check that every matrix sample has a label. Extra metadata rows are ignored.
    pub fn validate_against(&self, matrix: &CountMatrix) -> Result<()> {
        let missing: Vec<&str> = matrix
            .sample_ids()
            .iter()
            .filter(|s| self.condition_of(s).is_none())
            .map(|s| s.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(DgeError::InvalidMetadata {
                reason: format!("No condition label for sample(s): {}", missing.join(", ")),
            });
        }

        let extra = self
            .sample_ids
            .iter()
            .filter(|s| matrix.sample_index(s).is_none())
            .count();
        if extra > 0 {
            log::debug!("Ignoring {} metadata row(s) for samples absent from the count matrix", extra);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn meta() -> SampleMetadata {
        SampleMetadata::from_pairs(vec![
            ("s1", "treat"),
            ("s2", "ctrl"),
            ("s3", "treat"),
            ("s4", "ctrl"),
        ])
        .unwrap()
    }

    #[test]
    fn test_conditions_sorted() {
        assert_eq!(meta().conditions(), vec!["ctrl".to_string(), "treat".to_string()]);
    }

    #[test]
    fn test_samples_with() {
        assert_eq!(meta().samples_with("ctrl"), vec!["s2", "s4"]);
        assert!(meta().samples_with("other").is_empty());
    }

    #[test]
    fn test_duplicate_sample_rejected() {
        let result = SampleMetadata::from_pairs(vec![("s1", "a"), ("s1", "b")]);
        assert!(matches!(result, Err(DgeError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_validate_against_ignores_extra_rows() {
        let counts = CountMatrix::new(
            array![[1.0, 2.0]],
            vec!["g".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
        )
        .unwrap();
        assert!(meta().validate_against(&counts).is_ok());
    }

    #[test]
    fn test_validate_against_missing_sample() {
        let counts = CountMatrix::new(
            array![[1.0, 2.0]],
            vec!["g".to_string()],
            vec!["s1".to_string(), "s9".to_string()],
        )
        .unwrap();
        let err = meta().validate_against(&counts).unwrap_err();
        assert!(err.to_string().contains("s9"));
    }
}
