//! Gift targets and target-list files.

use serde::{Deserialize, Serialize};
use snipe_wire::Request;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Target-list loading errors
#[derive(Error, Debug)]
pub enum TargetError {
    /// File could not be read
    #[error("failed to read target list {path}: {source}")]
    Io {
        /// Path of the file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// File is not a valid target list
    #[error("invalid target list: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A received gift to upgrade and the price expected for it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GiftTarget {
    /// Received-gift identifier
    pub id: String,
    /// Expected upgrade price in stars
    pub price: i64,
}

impl GiftTarget {
    /// Create a target
    pub fn new(id: impl Into<String>, price: i64) -> Self {
        Self { id: id.into(), price }
    }

    /// Channel chat id for gifts held by a channel (`-100<digits>_<suffix>`)
    pub fn channel_owner(&self) -> Option<i64> {
        let (chat, suffix) = self.id.split_once('_')?;
        let digits = chat.strip_prefix("-100")?;
        if digits.is_empty() || suffix.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        chat.parse().ok()
    }

    /// Upgrade request for this target
    pub fn upgrade_request(&self) -> Request {
        Request::upgrade(self.id.clone(), self.price)
    }
}

/// Ordered list of targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetList(Vec<GiftTarget>);

impl TargetList {
    /// Wrap a vector of targets
    pub fn new(targets: Vec<GiftTarget>) -> Self {
        Self(targets)
    }

    /// Parse a JSON array of `{"id": .., "price": ..}`; any bad entry fails the whole list
    pub fn from_json(json: &str) -> Result<Self, TargetError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a target list file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TargetError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| TargetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Targets in order
    pub fn as_slice(&self) -> &[GiftTarget] {
        &self.0
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distinct channel owners referenced by the targets
    pub fn channel_owners(&self) -> BTreeSet<i64> {
        self.0.iter().filter_map(GiftTarget::channel_owner).collect()
    }

    /// Unwrap into the target vector
    pub fn into_inner(self) -> Vec<GiftTarget> {
        self.0
    }
}

impl From<Vec<GiftTarget>> for TargetList {
    fn from(targets: Vec<GiftTarget>) -> Self {
        Self(targets)
    }
}
