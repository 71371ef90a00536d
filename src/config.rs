//! Analysis configuration
//!
//! Every stage's parameters in one serde structure. Any field may be left
//! out of a JSON config file and keeps its default.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterOptions;
use crate::de::DeParams;
use crate::enrichment::GseaParams;
use crate::error::{DgeError, Result};
use crate::identifiers::{DetectionParams, TranslationParams};
use crate::significance::Thresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub de: DeParams,
    pub thresholds: Thresholds,
    pub detection: DetectionParams,
    pub translation: TranslationParams,
    pub gsea: GseaParams,
    pub cluster: ClusterOptions,
    /// Bound on backend bring-up, in seconds
    pub init_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            de: DeParams::default(),
            thresholds: Thresholds::default(),
            detection: DetectionParams::default(),
            translation: TranslationParams::default(),
            gsea: GseaParams::default(),
            cluster: ClusterOptions::default(),
            init_timeout_secs: 600,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| DgeError::parse(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.de.validate()?;
        Thresholds::new(self.thresholds.padj, self.thresholds.log2fc)?;
        self.gsea.validate()?;
        if self.translation.timeout_secs == 0 || self.init_timeout_secs == 0 {
            return Err(DgeError::InvalidInput {
                reason: "timeouts must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LinkageMethod;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AnalysisConfig::from_json_str(
            r#"{"thresholds": {"padj": 0.01}, "cluster": {"method": "average"}, "gsea": {"permutations": 200}}"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.padj, 0.01);
        assert_eq!(config.thresholds.log2fc, 1.0);
        assert_eq!(config.cluster.method, LinkageMethod::Average);
        assert_eq!(config.gsea.permutations, 200);
        assert_eq!(config.gsea.min_size, 10);
        assert_eq!(config.translation.batch_size, 1000);
        assert_eq!(config.init_timeout_secs, 600);
    }

    #[test]
    fn test_file_round_trip_and_validation() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&AnalysisConfig::default()).unwrap()).unwrap();
        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.thresholds, Thresholds::default());

        assert!(AnalysisConfig::from_json_str(r#"{"thresholds": {"padj": 1.5}}"#).is_err());
        assert!(AnalysisConfig::from_json_str(r#"{"init_timeout_secs": 0}"#).is_err());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AnalysisConfig::from_json_file(file.path()),
            Err(DgeError::Parse { .. })
        ));
    }
}
