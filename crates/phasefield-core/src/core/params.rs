use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Interface parameters of one phase pair as stored in a parameter file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PairEntry {
    pub phases: [usize; 2],
    /// Interface energy.
    pub energy: f64,
    /// Interface mobility.
    pub mobility: f64,
    /// Driving-force limit as a fraction of the maximum interface energy.
    pub limit: Option<f64>,
}

/// Per-phase-pair table loaded from TOML:
///
/// ```toml
/// [[pair]]
/// phases = [0, 1]
/// energy = 0.24
/// mobility = 4.0e-9
/// limit = 0.9
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PairParameters {
    #[serde(default, rename = "pair")]
    pub pairs: Vec<PairEntry>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

impl PairParameters {
    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Entry for an unordered phase pair.
    pub fn get(&self, a: usize, b: usize) -> Option<&PairEntry> {
        self.pairs
            .iter()
            .find(|p| p.phases == [a, b] || p.phases == [b, a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_succeeds_with_valid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairs.toml");
        fs::write(
            &path,
            r#"
            [[pair]]
            phases = [0, 0]
            energy = 0.24
            mobility = 4.0e-9

            [[pair]]
            phases = [0, 1]
            energy = 0.5
            mobility = 1.0e-9
            limit = 0.8
            "#,
        )
        .unwrap();

        let params = PairParameters::load(&path).unwrap();
        assert_eq!(params.pairs.len(), 2);
        let cross = params.get(1, 0).unwrap();
        assert_eq!(cross.energy, 0.5);
        assert_eq!(cross.limit, Some(0.8));
        assert_eq!(params.get(0, 0).unwrap().limit, None);
        assert!(params.get(1, 1).is_none());
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = PairParameters::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ParamLoadError::Io { .. })));
    }

    #[test]
    fn load_fails_for_malformed_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("malformed.toml");
        fs::write(&path, "this is not toml").unwrap();
        let result = PairParameters::load(&path);
        assert!(matches!(result, Err(ParamLoadError::Toml { .. })));
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typo.toml");
        fs::write(
            &path,
            "[[pair]]\nphases = [0, 1]\nenergy = 1.0\nmobility = 1.0\nmobilty = 2.0\n",
        )
        .unwrap();
        let result = PairParameters::load(&path);
        assert!(matches!(result, Err(ParamLoadError::Toml { .. })));
    }
}
