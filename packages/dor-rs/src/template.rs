use crate::error::{DorError, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

const PLACEHOLDER_PATTERN: &str = r"<(\w+?)>";

/// Message template with `<NAME>` placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    text: String,
    pattern: Regex,
    placeholders: Vec<String>,
}

impl Template {
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let pattern = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| DorError::Config(format!("invalid placeholder pattern: {}", e)))?;

        let placeholders: BTreeSet<String> = pattern
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect();

        Ok(Self {
            text,
            pattern,
            placeholders: placeholders.into_iter().collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DorError::FileNotFound(path.display().to_string()));
        }
        Self::parse(std::fs::read_to_string(path)?)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholder names, sorted
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Replace every placeholder. Fails on the first name (in sorted order)
    /// that `values` does not provide.
    pub fn fill(&self, values: &HashMap<String, String>) -> Result<String> {
        if let Some(missing) = self.placeholders.iter().find(|p| !values.contains_key(*p)) {
            return Err(DorError::MissingPlaceholder(missing.clone()));
        }

        let filled = self.pattern.replace_all(&self.text, |caps: &regex::Captures| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(filled.into_owned())
    }

    /// Fill once per value map; nothing is returned unless every fill succeeds.
    pub fn fill_all(&self, windows: &[HashMap<String, String>]) -> Result<Vec<String>> {
        windows.iter().map(|values| self.fill(values)).collect()
    }
}
