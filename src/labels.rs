//! Label map: class id to human-readable name.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Read-only mapping from class id to label text.
#[derive(Clone, Debug, Default)]
pub struct LabelMap {
    labels: HashMap<u32, String>,
}

fn pair_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[:\s]+").expect("static regex"))
}

impl LabelMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a label file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let labels = Self::parse(&raw);
        log::debug!("loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Parse label text.
    ///
    /// Each line is either `<id><sep><label>` where `<sep>` is any run of colons
    /// and whitespace, or a bare label keyed by its zero-based line number.
    pub fn parse(raw: &str) -> Self {
        let mut labels = HashMap::new();
        for (row, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut pair = pair_separator().splitn(line, 2);
            let head = pair.next().unwrap_or_default();
            let tail = pair.next();
            match (head.parse::<u32>(), tail) {
                (Ok(id), Some(text)) if head.bytes().all(|b| b.is_ascii_digit()) => {
                    labels.insert(id, text.trim().to_string());
                }
                _ => {
                    labels.insert(row as u32, line.to_string());
                }
            }
        }
        Self { labels }
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Label for `id`, falling back to the decimal id when unmapped.
    pub fn resolve(&self, id: u32) -> String {
        match self.get(id) {
            Some(label) => label.to_string(),
            None => id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(u32, String)> for LabelMap {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}
