//! Content packages produced by the generation collaborator.

use contentgate_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_of;
use crate::domain::error::Result;

/// One caption, written for a specific platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionVariant {
    pub platform: String,
    pub text: String,
}

impl CaptionVariant {
    pub fn new(platform: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
    Audio,
    Thumbnail,
}

/// A media asset. The orchestrator treats the URI as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    pub uri: String,
}

/// A finished content package bound for one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPackage {
    pub package_id: String,
    pub unit_id: String,
    pub destination: String,
    /// Opening line meant to stop the scroll
    pub hook: String,
    pub captions: Vec<CaptionVariant>,
    pub assets: Vec<Asset>,
    /// References the package was built from
    #[serde(default)]
    pub reference_ids: Vec<String>,
}

impl ContentPackage {
    /// Digest over what the audience sees: destination, hook, captions and
    /// assets. Ids are excluded so identical content from two units collides.
    pub fn content_hash(&self) -> Result<ContentDigest> {
        digest_of(&serde_json::json!({
            "destination": self.destination,
            "hook": self.hook,
            "captions": self.captions,
            "assets": self.assets,
        }))
    }
}
