//! Text rules shared by the rights handlers and by reference mapping:
//! element detection, element stripping, commentary framing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Trademarked names that must never appear in style-only usage, matched in
/// addition to each reference's own flagged elements.
pub const KNOWN_TRADEMARK_PATTERNS: &[&str] = &[
    "mario",
    "luigi",
    "pokemon",
    "pikachu",
    "naruto",
    "sasuke",
    "goku",
    "vegeta",
    "spider-man",
    "spiderman",
    "batman",
    "superman",
    "iron man",
    "ironman",
    "captain america",
    "thor",
    "hulk",
    "mickey mouse",
    "disney",
    "marvel",
    "dc comics",
    "tanjiro",
    "nezuko",
    "demon slayer",
    "jujutsu kaisen",
    "one piece",
    "luffy",
    "zoro",
];

/// Phrases that frame text as review or commentary.
pub const COMMENTARY_MARKERS: &[&str] = &[
    "review",
    "reviewing",
    "commentary",
    "critique",
    "analysis",
    "breakdown",
    "reaction",
    "thoughts on",
    "compared to",
    "my take on",
];

/// Phrases that present content as coming from, or endorsed by, the
/// rights holder.
pub const IMPERSONATION_MARKERS: &[&str] = &[
    "official",
    "endorsed by",
    "approved by",
    "in partnership with",
    "brought to you by",
    "licensed by",
    "as seen in",
    "collab with",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive match on `phrase` as a whole word. A word boundary is
/// required only at an edge that is itself a word character, so "#Hokage"
/// and "Believe it!" match where they appear.
fn phrase_regex(phrase: &str) -> Option<Regex> {
    let phrase = phrase.trim();
    let (first, last) = (phrase.chars().next()?, phrase.chars().last()?);
    let left = if is_word_char(first) { r"\b" } else { "" };
    let right = if is_word_char(last) { r"\b" } else { "" };
    let pattern = format!("{left}{}{right}", regex::escape(phrase));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// A set of phrases compiled once, keyed by their lowercase spelling.
///
/// Serializes as a plain list of phrases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PhraseSet {
    phrases: BTreeMap<String, Regex>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for p in phrases {
            set.insert(p.as_ref());
        }
        set
    }

    /// `false` for blank or already present phrases.
    pub fn insert(&mut self, phrase: &str) -> bool {
        let key = phrase.trim().to_lowercase();
        if key.is_empty() || self.phrases.contains_key(&key) {
            return false;
        }
        match phrase_regex(&key) {
            Some(re) => {
                self.phrases.insert(key, re);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.phrases.keys().map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.phrases.values().any(|re| re.is_match(text))
    }

    /// Phrases occurring in `text`, spelled as found there.
    pub fn find_in(&self, text: &str) -> BTreeSet<String> {
        find_across(text, [self])
    }

    fn collect(&self, text: &str, found: &mut BTreeMap<String, String>) {
        for re in self.phrases.values() {
            if let Some(m) = re.find(text) {
                found
                    .entry(m.as_str().to_lowercase())
                    .or_insert_with(|| m.as_str().to_string());
            }
        }
    }

    fn strip(&self, text: &str) -> String {
        let mut out = text.to_string();
        for re in self.phrases.values() {
            out = re.replace_all(&out, "").into_owned();
        }
        collapse_whitespace(&out)
    }
}

impl PartialEq for PhraseSet {
    fn eq(&self, other: &Self) -> bool {
        self.phrases.keys().eq(other.phrases.keys())
    }
}

impl Eq for PhraseSet {}

impl From<Vec<String>> for PhraseSet {
    fn from(phrases: Vec<String>) -> Self {
        Self::new(phrases)
    }
}

impl From<PhraseSet> for Vec<String> {
    fn from(set: PhraseSet) -> Self {
        set.phrases.into_keys().collect()
    }
}

/// Matches from several sets, one entry per distinct element regardless of
/// case.
pub fn find_across<'s, I>(text: &str, sets: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'s PhraseSet>,
{
    let mut found = BTreeMap::new();
    for set in sets {
        set.collect(text, &mut found);
    }
    found.into_values().collect()
}

fn commentary_markers() -> &'static PhraseSet {
    static SET: OnceLock<PhraseSet> = OnceLock::new();
    SET.get_or_init(|| PhraseSet::new(COMMENTARY_MARKERS))
}

fn impersonation_markers() -> &'static PhraseSet {
    static SET: OnceLock<PhraseSet> = OnceLock::new();
    SET.get_or_init(|| PhraseSet::new(IMPERSONATION_MARKERS))
}

pub fn is_commentary(text: &str) -> bool {
    commentary_markers().matches(text)
}

pub fn is_impersonation(text: &str) -> bool {
    impersonation_markers().matches(text)
}

/// Candidates that occur in `text` as whole words, case-insensitively.
///
/// Returned names use the spelling found in `text`, one entry per distinct
/// element regardless of case.
pub fn find_elements<I, S>(text: &str, candidates: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    PhraseSet::new(candidates).find_in(text)
}

/// Remove every whole-word occurrence of `elements` and tidy whitespace.
pub fn strip_elements(text: &str, elements: &[String]) -> String {
    PhraseSet::new(elements).strip(text)
}

/// Drop impersonation phrasing and lead with an explicit commentary frame.
pub fn reframe_as_commentary(text: &str) -> String {
    let body = impersonation_markers().strip(text);
    if is_commentary(&body) {
        body
    } else {
        format!("Independent review and commentary: {body}")
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_whole_words_case_insensitively() {
        let found = find_elements(
            "A cozy scene with TANJIRO vibes and a spider-man mug",
            KNOWN_TRADEMARK_PATTERNS.iter().copied(),
        );
        assert!(found.contains("TANJIRO"));
        assert!(found.contains("spider-man"));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn same_element_from_two_lists_counted_once() {
        let found = find_elements("Tanjiro at dawn", ["Tanjiro", "tanjiro"]);
        assert_eq!(found.len(), 1);
        assert!(found.contains("Tanjiro"));
    }

    #[test]
    fn does_not_match_inside_words() {
        let found = find_elements("Thorough cleaning routine", ["thor"]);
        assert!(found.is_empty());
    }

    #[test]
    fn punctuated_phrases_match_at_their_edges() {
        let found = find_elements(
            "Bright ink style, catchphrase Believe it! and tag #Hokage, written in C++",
            ["Believe it!", "#Hokage", "c++"],
        );
        assert_eq!(found.len(), 3);
        assert!(found.contains("Believe it!"));
        assert!(found.contains("#Hokage"));
        assert!(found.contains("C++"));
        // word edges still need a boundary
        assert!(find_elements("#Hokagesama", ["#hokage"]).is_empty());
    }

    #[test]
    fn phrase_set_round_trips_as_a_list() {
        let set = PhraseSet::new(["Acme", " acme ", "", "Globex"]);
        assert_eq!(set.len(), 2);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!(["acme", "globex"]));
        let back: PhraseSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
        assert!(back.matches("ACME anvils"));
    }

    #[test]
    fn strip_removes_elements_and_tidies() {
        let out = strip_elements(
            "Watercolor in the style of Tanjiro with soft light",
            &["tanjiro".to_string()],
        );
        assert_eq!(out, "Watercolor in the style of with soft light");
        assert!(find_elements(&out, ["tanjiro"]).is_empty());
    }

    #[test]
    fn reframe_removes_impersonation() {
        let out = reframe_as_commentary("Official merch drop for the show");
        assert!(!is_impersonation(&out));
        assert!(is_commentary(&out));
    }

    #[test]
    fn reframe_keeps_existing_commentary_frame() {
        let text = "My review of the season finale";
        assert_eq!(reframe_as_commentary(text), text);
    }
}
