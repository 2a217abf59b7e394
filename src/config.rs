use crate::filler::StoringType;
use crate::flanking::FlankingCoverage;
use anyhow::{ensure, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const META_FLANKING_RANGE: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Number of k-mers at each edge end averaged into the flanking coverage.
    pub flanking_range: usize,
    pub storing: StoringType,
    /// Worker threads for the fill, 0 for one per core.
    pub threads: usize,
    pub meta: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            flanking_range: 50,
            storing: StoringType::Simple,
            threads: 0,
            meta: false,
        }
    }
}

impl CoverageConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid coverage config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.flanking_range > 0, "flanking_range must be positive");
        Ok(())
    }

    /// Meta mode always averages over 30 k-mers.
    pub fn effective_flanking_range(&self) -> usize {
        if self.meta {
            info!("Flanking range overwritten to {META_FLANKING_RANGE} for meta mode");
            META_FLANKING_RANGE
        } else {
            self.flanking_range
        }
    }

    pub fn flanking(&self) -> Result<FlankingCoverage> {
        self.validate()?;
        FlankingCoverage::new(self.effective_flanking_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = CoverageConfig::from_json(r#"{"storing": "invertible"}"#).unwrap();
        assert_eq!(
            config,
            CoverageConfig {
                storing: StoringType::Invertible,
                ..Default::default()
            }
        );
        assert_eq!(config.flanking().unwrap().averaging_range(), 50);
    }

    #[test]
    fn meta_mode_overrides_range() {
        let config = CoverageConfig::from_json(r#"{"flanking_range": 12, "meta": true}"#).unwrap();
        assert_eq!(config.flanking_range, 12);
        assert_eq!(config.effective_flanking_range(), 30);
        assert_eq!(config.flanking().unwrap().averaging_range(), 30);
    }

    #[test]
    fn zero_range_is_rejected() {
        assert!(CoverageConfig::from_json(r#"{"flanking_range": 0}"#).is_err());
        assert!(CoverageConfig::from_json(r#"{"storing": "both"}"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"flanking_range": 7, "threads": 2}}"#).unwrap();
        let config = CoverageConfig::load(file.path()).unwrap();
        assert_eq!(config.flanking_range, 7);
        assert_eq!(config.threads, 2);
        assert!(CoverageConfig::load(file.path().with_extension("missing")).is_err());
    }
}
