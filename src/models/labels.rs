use crate::utils::error::VisionError;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Index → class name mapping for one model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    names: BTreeMap<usize, String>,
}

impl LabelMap {
    pub fn new(names: BTreeMap<usize, String>) -> Self {
        Self { names }
    }

    /// Load a `{"class name": index}` JSON file as written at fine-tuning time
    pub fn from_class_index_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VisionError::ModelLoad(format!("Failed to read label mapping {}: {}", path.display(), e))
        })?;
        let class_to_idx: HashMap<String, usize> = serde_json::from_str(&content)?;

        let names = class_to_idx
            .into_iter()
            .map(|(name, idx)| (idx, name))
            .collect();

        Ok(Self { names })
    }

    /// Load a plain label list, one class per line; line number is the index
    pub fn from_label_list(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VisionError::ModelLoad(format!("Failed to read label list {}: {}", path.display(), e))
        })?;

        let names = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        Ok(Self { names })
    }

    /// Parse the Ultralytics `names` metadata value, e.g. `{0: 'crop', 1: 'weed'}`
    pub fn from_ultralytics_names(raw: &str) -> Result<Self> {
        let body = raw
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| VisionError::ModelLoad(format!("Malformed names metadata: {}", raw)))?;

        let mut names = BTreeMap::new();
        let mut rest = body.trim();

        while !rest.is_empty() {
            let (key, after_key) = rest
                .split_once(':')
                .ok_or_else(|| VisionError::ModelLoad(format!("Malformed names entry: {}", rest)))?;
            let idx: usize = key.trim().parse().map_err(|_| {
                VisionError::ModelLoad(format!("Non-numeric class index '{}'", key.trim()))
            })?;

            let after_key = after_key.trim_start();
            let quote = after_key
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| VisionError::ModelLoad(format!("Unquoted class name for {}", idx)))?;
            let value = &after_key[1..];
            let end = value
                .find(quote)
                .ok_or_else(|| VisionError::ModelLoad(format!("Unterminated class name for {}", idx)))?;

            names.insert(idx, value[..end].to_string());

            rest = value[end + 1..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        Ok(Self { names })
    }

    /// Name for a class index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    /// Mapped name, or the index itself when the mapping has no entry
    pub fn label_or_index(&self, index: usize) -> String {
        self.get(index)
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn class_index_json_is_inverted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rice": 1, "wheat": 0, "maize": 2}}"#).unwrap();

        let labels = LabelMap::from_class_index_json(file.path()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("wheat"));
        assert_eq!(labels.get(2), Some("maize"));
    }

    #[test]
    fn label_list_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tench\n\ngoldfish\ngreat white shark").unwrap();

        let labels = LabelMap::from_label_list(file.path()).unwrap();
        assert_eq!(labels.get(1), Some("goldfish"));
        assert_eq!(labels.label_or_index(2), "great white shark");
    }

    #[test]
    fn missing_entries_fall_back_to_index() {
        let labels = LabelMap::default();
        assert_eq!(labels.label_or_index(7), "7");
    }

    #[test]
    fn ultralytics_names_are_parsed() {
        let labels = LabelMap::from_ultralytics_names("{0: 'crop', 1: 'weed', 2: \"broadleaf weed\"}").unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("crop"));
        assert_eq!(labels.get(2), Some("broadleaf weed"));
    }

    #[test]
    fn ultralytics_names_with_commas_inside_quotes() {
        let labels = LabelMap::from_ultralytics_names("{0: 'weed, grass', 1: 'crop'}").unwrap();
        assert_eq!(labels.get(0), Some("weed, grass"));
        assert_eq!(labels.get(1), Some("crop"));
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(LabelMap::from_ultralytics_names("[crop, weed]").is_err());
        assert!(LabelMap::from_ultralytics_names("{zero: 'crop'}").is_err());
        assert!(LabelMap::from_ultralytics_names("{0: 'crop}").is_err());
    }
}
