use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::LoadError;

/// Class names indexed by the model's output position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Vec<String>);

#[derive(Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
}

impl Labels {
    /// Builds the mapping from an `id2label` object. Keys must be the integers
    /// `0..n` with no gaps.
    pub fn from_id2label(id2label: HashMap<String, String>) -> Result<Self, LoadError> {
        if id2label.is_empty() {
            return Err(LoadError::Labels("id2label is empty".to_string()));
        }

        let mut ordered = BTreeMap::new();
        for (key, label) in id2label {
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| LoadError::Labels(format!("key {:?} is not an index", key)))?;
            ordered.insert(index, label);
        }

        for (expected, index) in ordered.keys().enumerate() {
            if *index != expected {
                return Err(LoadError::Labels(format!("missing label for index {}", expected)));
            }
        }

        Ok(Labels(ordered.into_values().collect()))
    }

    /// Reads `id2label` from a Hugging Face style `config.json`.
    pub fn from_model_config(path: &Path) -> Result<Self, LoadError> {
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ModelConfig = serde_json::from_str(&raw).map_err(|source| LoadError::Json {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_id2label(config.id2label)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn orders_labels_by_numeric_index() {
        let labels = Labels::from_id2label(map(&[
            ("10", "k"),
            ("2", "c"),
            ("0", "a"),
            ("1", "b"),
            ("3", "d"),
            ("4", "e"),
            ("5", "f"),
            ("6", "g"),
            ("7", "h"),
            ("8", "i"),
            ("9", "j"),
        ]))
        .unwrap();
        assert_eq!(labels.len(), 11);
        assert_eq!(labels.get(2), Some("c"));
        assert_eq!(labels.get(10), Some("k"));
        assert_eq!(labels.get(11), None);
    }

    #[test]
    fn rejects_empty_gapped_and_non_numeric_maps() {
        assert!(matches!(
            Labels::from_id2label(HashMap::new()),
            Err(LoadError::Labels(_))
        ));
        assert!(matches!(
            Labels::from_id2label(map(&[("0", "a"), ("2", "c")])),
            Err(LoadError::Labels(_))
        ));
        assert!(matches!(
            Labels::from_id2label(map(&[("0", "a"), ("one", "b")])),
            Err(LoadError::Labels(_))
        ));
    }

    #[test]
    fn reads_id2label_from_model_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"architectures": ["MobileNetV2ForImageClassification"],
                "id2label": {{"0": "Apple Scab", "1": "healthy"}}}}"#
        )
        .unwrap();

        let labels = Labels::from_model_config(file.path()).unwrap();
        assert_eq!(labels.get(0), Some("Apple Scab"));
        assert_eq!(labels.get(1), Some("healthy"));
    }

    #[test]
    fn missing_config_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Labels::from_model_config(&dir.path().join("config.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
