//! Rights registry: independent facts the evaluator consults.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::patterns::{PhraseSet, KNOWN_TRADEMARK_PATTERNS};

/// Facts about references maintained outside the pipeline: which
/// public-domain claims are independently confirmed, which references are
/// blocked outright, and which trademark names are always flagged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightsRegistry {
    #[serde(default)]
    public_domain_confirmed: HashSet<String>,
    /// reference id -> reason
    #[serde(default)]
    blocked: HashMap<String, String>,
    /// Compiled once; matched against every usage context
    #[serde(default)]
    trademark_patterns: PhraseSet,
}

impl RightsRegistry {
    /// Empty registry with the built-in trademark list.
    pub fn with_known_trademarks() -> Self {
        Self {
            trademark_patterns: PhraseSet::new(KNOWN_TRADEMARK_PATTERNS),
            ..Default::default()
        }
    }

    pub fn confirm_public_domain(&mut self, reference_id: impl Into<String>) -> &mut Self {
        self.public_domain_confirmed.insert(reference_id.into());
        self
    }

    pub fn block(&mut self, reference_id: impl Into<String>, reason: impl Into<String>) -> &mut Self {
        self.blocked.insert(reference_id.into(), reason.into());
        self
    }

    pub fn add_trademark(&mut self, name: impl Into<String>) -> &mut Self {
        let name: String = name.into();
        self.trademark_patterns.insert(&name);
        self
    }

    pub fn is_public_domain_confirmed(&self, reference_id: &str) -> bool {
        self.public_domain_confirmed.contains(reference_id)
    }

    pub fn block_reason(&self, reference_id: &str) -> Option<&str> {
        self.blocked.get(reference_id).map(String::as_str)
    }

    pub fn trademark_patterns(&self) -> impl Iterator<Item = &str> {
        self.trademark_patterns.iter()
    }

    pub fn trademarks(&self) -> &PhraseSet {
        &self.trademark_patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_trademarks_loaded() {
        let reg = RightsRegistry::with_known_trademarks();
        assert!(reg.trademark_patterns().any(|p| p == "tanjiro"));
        assert!(reg.trademark_patterns().any(|p| p == "demon slayer"));
    }

    #[test]
    fn confirmations_and_blocks() {
        let mut reg = RightsRegistry::default();
        reg.confirm_public_domain("starry-night")
            .block("leaked-still", "unreleased footage");
        assert!(reg.is_public_domain_confirmed("starry-night"));
        assert!(!reg.is_public_domain_confirmed("leaked-still"));
        assert_eq!(reg.block_reason("leaked-still"), Some("unreleased footage"));
    }

    #[test]
    fn registry_loads_from_json() {
        let reg: RightsRegistry = serde_json::from_value(serde_json::json!({
            "public_domain_confirmed": ["pd-1"],
            "trademark_patterns": ["acme"]
        }))
        .unwrap();
        assert!(reg.is_public_domain_confirmed("pd-1"));
        assert_eq!(reg.trademark_patterns().collect::<Vec<_>>(), vec!["acme"]);
    }

    #[test]
    fn trademarks_compile_once_and_survive_reload() {
        let mut reg = RightsRegistry::default();
        reg.add_trademark("C++ Guru").add_trademark("  c++ guru ");
        assert_eq!(reg.trademarks().len(), 1);
        assert!(reg.trademarks().matches("merch for every c++ guru!"));

        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["trademark_patterns"], serde_json::json!(["c++ guru"]));
        let reloaded: RightsRegistry = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded, reg);
        assert!(reloaded.trademarks().matches("C++ GURU sticker"));
        assert!(!reloaded.trademarks().matches("c++ gurus"));
    }
}
