//! Affiliate disclosure rules per destination.

use regex::{Regex, RegexBuilder};

/// Phrasing that presents paid content as an organic find.
pub const DECEPTIVE_PATTERNS: &[&str] = &[
    "just found this gem",
    "stumbled upon this",
    "my honest opinion",
    "not sponsored",
    "organic find",
    "randomly found",
];

const BASE_MARKERS: &[&str] = &["#ad", "#affiliate", "#sponsored"];
const INSTAGRAM_MARKERS: &[&str] = &["#ad", "#affiliate", "#sponsored", "paid partnership"];
/// Accepted for destinations without their own rule.
const GENERIC_MARKERS: &[&str] = &[
    "#ad",
    "#affiliate",
    "#sponsored",
    "affiliate link",
    "commission",
    "paid partnership",
    "sponsored",
];

const LONG_DISCLOSURE: &str =
    "\n\n#ad #affiliate This post contains affiliate links. I may earn a commission at no extra cost to you.";
const SHORT_DISCLOSURE: &str = " #ad #affiliate";
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureRule {
    pub markers: &'static [&'static str],
    pub max_caption_length: usize,
    /// Appended when no marker is present
    pub insertion: &'static str,
}

pub fn rule_for(platform: &str) -> DisclosureRule {
    match platform {
        "tiktok" => DisclosureRule {
            markers: BASE_MARKERS,
            max_caption_length: 2_200,
            insertion: LONG_DISCLOSURE,
        },
        "instagram" => DisclosureRule {
            markers: INSTAGRAM_MARKERS,
            max_caption_length: 2_200,
            insertion: LONG_DISCLOSURE,
        },
        "x" => DisclosureRule {
            markers: BASE_MARKERS,
            max_caption_length: 280,
            insertion: SHORT_DISCLOSURE,
        },
        "pinterest" => DisclosureRule {
            markers: BASE_MARKERS,
            max_caption_length: 500,
            insertion: LONG_DISCLOSURE,
        },
        _ => DisclosureRule {
            markers: GENERIC_MARKERS,
            max_caption_length: 2_200,
            insertion: LONG_DISCLOSURE,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptionIssue {
    #[error("caption is empty")]
    Empty,
    #[error("missing affiliate disclosure for {platform}")]
    MissingDisclosure { platform: String },
    #[error("deceptive phrasing '{pattern}'")]
    Deceptive { pattern: &'static str },
    #[error("caption for {platform} is {len} characters, limit {max}")]
    TooLong {
        platform: String,
        len: usize,
        max: usize,
    },
}

fn marker_regex(marker: &str) -> Option<Regex> {
    // `\b` cannot anchor before '#', so hashtags need a non-word guard
    let pattern = if marker.starts_with('#') {
        format!(r"(?:^|\W){}\b", regex::escape(marker))
    } else {
        format!(r"\b{}\b", regex::escape(marker))
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

pub fn has_disclosure(text: &str, platform: &str) -> bool {
    rule_for(platform)
        .markers
        .iter()
        .filter_map(|m| marker_regex(m))
        .any(|re| re.is_match(text))
}

pub fn deceptive_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    DECEPTIVE_PATTERNS.iter().copied().find(|p| lower.contains(p))
}

/// Full check of one caption variant.
pub fn validate_caption(text: &str, platform: &str) -> Result<(), CaptionIssue> {
    if text.trim().is_empty() {
        return Err(CaptionIssue::Empty);
    }
    if !has_disclosure(text, platform) {
        return Err(CaptionIssue::MissingDisclosure {
            platform: platform.to_string(),
        });
    }
    if let Some(pattern) = deceptive_phrase(text) {
        return Err(CaptionIssue::Deceptive { pattern });
    }
    let rule = rule_for(platform);
    let len = text.chars().count();
    if len > rule.max_caption_length {
        return Err(CaptionIssue::TooLong {
            platform: platform.to_string(),
            len,
            max: rule.max_caption_length,
        });
    }
    Ok(())
}

/// Append the destination's disclosure, trimming the body so the result fits
/// the length limit. Captions that already disclose come back unchanged.
pub fn add_disclosure(text: &str, platform: &str) -> String {
    if has_disclosure(text, platform) {
        return text.to_string();
    }
    let rule = rule_for(platform);
    let body = text.trim_end();
    let room = rule
        .max_caption_length
        .saturating_sub(rule.insertion.chars().count());

    let body = if body.chars().count() > room {
        let keep = room.saturating_sub(ELLIPSIS.len());
        let cut: String = body.chars().take(keep).collect();
        format!("{}{ELLIPSIS}", cut.trim_end())
    } else {
        body.to_string()
    };
    format!("{body}{}", rule.insertion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtag_marker_needs_a_boundary() {
        assert!(has_disclosure("Great lamp #ad", "tiktok"));
        assert!(has_disclosure("#Ad great lamp", "tiktok"));
        assert!(!has_disclosure("Weekend #adventure vibes", "tiktok"));
    }

    #[test]
    fn paid_partnership_counts_only_on_instagram() {
        assert!(has_disclosure("Paid partnership with Acme", "instagram"));
        assert!(!has_disclosure("Paid partnership with Acme", "tiktok"));
    }

    #[test]
    fn deceptive_phrasing_fails_even_with_marker() {
        let err = validate_caption("Just found this gem! #ad", "tiktok").unwrap_err();
        assert_eq!(
            err,
            CaptionIssue::Deceptive {
                pattern: "just found this gem"
            }
        );
    }

    #[test]
    fn insertion_is_idempotent() {
        let once = add_disclosure("Desk lamp that changed my mornings", "instagram");
        assert!(validate_caption(&once, "instagram").is_ok());
        assert_eq!(add_disclosure(&once, "instagram"), once);
    }

    #[test]
    fn x_insertion_truncates_to_fit() {
        let long = "a".repeat(300);
        let out = add_disclosure(&long, "x");
        assert_eq!(out.chars().count(), 280);
        assert!(out.ends_with("... #ad #affiliate"));
        assert!(validate_caption(&out, "x").is_ok());
    }

    #[test]
    fn empty_caption_is_its_own_issue() {
        assert_eq!(validate_caption("  ", "x"), Err(CaptionIssue::Empty));
    }
}
