//! Comparisons between two condition groups

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::SampleMetadata;
use crate::error::{DgeError, Result};

/// An ordered (baseline, comparison) pair of condition labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    /// Baseline (reference) condition, the denominator of the fold change
    pub baseline: String,
    /// Comparison condition, the numerator of the fold change
    pub comparison: String,
}

impl Comparison {
    pub fn new(baseline: impl Into<String>, comparison: impl Into<String>) -> Self {
        Self {
            baseline: baseline.into(),
            comparison: comparison.into(),
        }
    }

    /// Canonical name `"{comparison}_vs_{baseline}"`
    pub fn name(&self) -> String {
        format!("{}_vs_{}", self.comparison, self.baseline)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// How comparisons are requested for one primary analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparisonMode {
    /// A single baseline vs comparison contrast
    Pairwise { baseline: String, comparison: String },
    /// Every other condition against one baseline.
    /// The baseline defaults to the alphabetically first condition.
    OneVsRest { baseline: Option<String> },
}

impl ComparisonMode {
    /// Expand the mode into concrete comparisons over the metadata's conditions
    pub fn plan(&self, metadata: &SampleMetadata) -> Result<Vec<Comparison>> {
        let levels = metadata.conditions();
        let require = |name: &str| -> Result<()> {
            if levels.iter().any(|l| l == name) {
                Ok(())
            } else {
                Err(DgeError::InvalidInput {
                    reason: format!(
                        "Condition '{}' not found in metadata (available: {})",
                        name,
                        levels.join(", ")
                    ),
                })
            }
        };

        match self {
            ComparisonMode::Pairwise {
                baseline,
                comparison,
            } => {
                require(baseline)?;
                require(comparison)?;
                if baseline == comparison {
                    return Err(DgeError::InvalidInput {
                        reason: format!("Cannot compare condition '{}' with itself", baseline),
                    });
                }
                Ok(vec![Comparison::new(baseline.as_str(), comparison.as_str())])
            }
            ComparisonMode::OneVsRest { baseline } => {
                let baseline = match baseline {
                    Some(b) => {
                        require(b)?;
                        b.clone()
                    }
                    None => levels.first().cloned().ok_or_else(|| DgeError::InvalidMetadata {
                        reason: "Metadata contains no conditions".to_string(),
                    })?,
                };
                if levels.len() < 2 {
                    return Err(DgeError::InvalidInput {
                        reason: "At least two conditions are required for a comparison".to_string(),
                    });
                }
                Ok(levels
                    .iter()
                    .filter(|l| **l != baseline)
                    .map(|l| Comparison::new(baseline.as_str(), l.as_str()))
                    .collect())
            }
        }
    }
}
