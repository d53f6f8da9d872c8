//! Layer: a named, typed bitmap label (spec.md §3).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// The reserved name of the tree root; not a regular layer name.
pub const ROOT_NAME: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Universe,
    Workspace,
    Canvas,
    Context,
    Label,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: LayerType,
    pub name: String,
    pub label: String,
    pub description: String,
    pub color: Option<String>,
    pub locked: bool,
    pub locked_by: HashSet<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Layer {
    pub fn new(kind: LayerType, name: impl Into<String>) -> Layer {
        let name = name.into();
        Layer {
            id: Uuid::new_v4(),
            kind,
            label: name.clone(),
            name,
            description: String::new(),
            color: None,
            locked: false,
            locked_by: HashSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn root() -> Layer {
        let mut root = Layer::new(LayerType::Universe, ROOT_NAME);
        root.label = "universe".to_string();
        root
    }

    pub fn normalized_name(&self) -> String {
        normalize_layer_name(&self.name)
    }

    pub fn is_root(&self) -> bool {
        self.normalized_name() == normalize_layer_name(ROOT_NAME)
    }

    pub fn lock(&mut self, by: impl Into<String>) {
        self.locked_by.insert(by.into());
        self.locked = !self.locked_by.is_empty();
    }

    pub fn unlock(&mut self, by: &str) {
        self.locked_by.remove(by);
        self.locked = !self.locked_by.is_empty();
    }
}

/// Normalizes a layer name for *comparison* only; the original casing is
/// kept on the stored [`Layer`]. NFKC-normalizes, trims, collapses
/// whitespace, lowercases, replaces any character outside
/// `letters/digits/marks/space/. + - _ @` with `_`, then collapses runs of
/// `_` down to one.
pub fn normalize_layer_name(name: &str) -> String {
    if name.is_empty() {
        return ROOT_NAME.to_string();
    }

    let nfkc: String = name.nfkc().collect();
    let trimmed = nfkc.trim();
    if trimmed == ROOT_NAME {
        return ROOT_NAME.to_string();
    }

    let mut collapsed_whitespace = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                collapsed_whitespace.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed_whitespace.push(ch);
            last_was_space = false;
        }
    }

    let lowered = collapsed_whitespace.to_lowercase();

    let mut replaced = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let allowed = ch.is_alphanumeric()
            || matches!(ch, ' ' | '.' | '+' | '-' | '_' | '@');
        replaced.push(if allowed { ch } else { '_' });
    }

    let mut result = String::with_capacity(replaced.len());
    let mut last_was_underscore = false;
    for ch in replaced.chars() {
        if ch == '_' {
            if !last_was_underscore {
                result.push('_');
            }
            last_was_underscore = true;
        } else {
            result.push(ch);
            last_was_underscore = false;
        }
    }

    if result.is_empty() {
        ROOT_NAME.to_string()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let inputs = ["  Reports  ", "Report/s!!", "café", "Work   Stuff", "/"];
        for input in inputs {
            let once = normalize_layer_name(input);
            let twice = normalize_layer_name(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_layer_name("  Reports  Weekly  "), "reports weekly");
    }

    #[test]
    fn replaces_invalid_characters_and_collapses_underscores() {
        assert_eq!(normalize_layer_name("report!!s"), "report_s");
    }

    #[test]
    fn empty_and_root_normalize_to_root() {
        assert_eq!(normalize_layer_name(""), ROOT_NAME);
        assert_eq!(normalize_layer_name("/"), ROOT_NAME);
    }
}
