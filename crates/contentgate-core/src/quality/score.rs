//! Structural quality score, 0-100.

use serde::{Deserialize, Serialize};

use super::disclosure::has_disclosure;
use crate::domain::ContentPackage;

pub const HOOK_WEIGHT: u8 = 30;
pub const ASSET_WEIGHT: u8 = 30;
pub const CAPTION_WEIGHT: u8 = 25;
pub const DISCLOSURE_WEIGHT: u8 = 15;

/// Captions shorter than this do not count as complete.
const MIN_CAPTION_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub hook: u8,
    pub assets: u8,
    pub captions: u8,
    pub disclosure: u8,
    pub total: u8,
}

fn hook_strength(hook: &str) -> u8 {
    let words: Vec<&str> = hook.split_whitespace().collect();
    match words.len() {
        0 => 0,
        1 | 2 => 10,
        _ => {
            let lower = hook.to_lowercase();
            let cue = hook.chars().any(|c| c.is_ascii_digit() || c == '?' || c == '!')
                || words
                    .iter()
                    .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
                    .any(|w| w.eq_ignore_ascii_case("how") || w.eq_ignore_ascii_case("why"))
                || lower.starts_with("stop ");
            if cue {
                HOOK_WEIGHT
            } else {
                HOOK_WEIGHT / 2
            }
        }
    }
}

pub fn score(package: &ContentPackage) -> QualityScore {
    let hook = hook_strength(&package.hook);
    let assets = if package.assets.is_empty() { 0 } else { ASSET_WEIGHT };

    let for_destination = package
        .captions
        .iter()
        .any(|c| c.platform == package.destination);
    let captions = if package.captions.is_empty() || !for_destination {
        0
    } else {
        let complete = package
            .captions
            .iter()
            .filter(|c| c.text.trim().chars().count() > MIN_CAPTION_CHARS)
            .count();
        (usize::from(CAPTION_WEIGHT) * complete / package.captions.len()) as u8
    };

    let disclosure = if !package.captions.is_empty()
        && package
            .captions
            .iter()
            .all(|c| has_disclosure(&c.text, &c.platform))
    {
        DISCLOSURE_WEIGHT
    } else {
        0
    };

    QualityScore {
        hook,
        assets,
        captions,
        disclosure,
        total: hook + assets + captions + disclosure,
    }
}
