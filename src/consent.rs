//! Sources of consent-eligible user ids.
//!
//! A [`ConsentSource`] is asked once per run for the set of users who have
//! opted in to AI training. The result feeds
//! [`ConsentFilter`](embedding_pipeline_core::consent::ConsentFilter).
//!
//! | Source | Input |
//! |--------|-------|
//! | [`FileConsentSource`] | JSON-lines export of consent records |
//! | [`StaticConsentSource`] | A fixed set, for tests and one-off runs |

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait ConsentSource: Send + Sync {
    /// User ids that have consented to AI training.
    async fn eligible_user_ids(&self) -> Result<HashSet<String>>;
}

/// One line of a consent export.
///
/// Fields other than the user id and the training flag are ignored.
#[derive(Debug, Deserialize)]
struct ConsentRecord {
    user_id: String,
    #[serde(default)]
    consent_ai_training: bool,
}

/// Reads a JSON-lines consent export.
///
/// Each non-blank line must be an object with a `user_id`. A user is
/// eligible when `consent_ai_training` is `true`. A later line for the same
/// user overrides an earlier one, so an export that appends consent changes
/// resolves to the latest decision. Any malformed line fails the whole
/// read: guessing at consent is not acceptable.
#[derive(Debug, Clone)]
pub struct FileConsentSource {
    path: PathBuf,
}

impl FileConsentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConsentSource for FileConsentSource {
    async fn eligible_user_ids(&self) -> Result<HashSet<String>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read consent file: {}", self.path.display()))?;
        parse_consent_records(&content)
            .with_context(|| format!("Invalid consent file: {}", self.path.display()))
    }
}

fn parse_consent_records(content: &str) -> Result<HashSet<String>> {
    let mut eligible = HashSet::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ConsentRecord = serde_json::from_str(line)
            .with_context(|| format!("line {} is not a valid consent record", idx + 1))?;
        if record.user_id.is_empty() {
            bail!("line {} has an empty user_id", idx + 1);
        }
        if record.consent_ai_training {
            eligible.insert(record.user_id);
        } else {
            eligible.remove(&record.user_id);
        }
    }
    Ok(eligible)
}

/// A fixed set of eligible users.
#[derive(Debug, Clone, Default)]
pub struct StaticConsentSource {
    users: HashSet<String>,
}

impl StaticConsentSource {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ConsentSource for StaticConsentSource {
    async fn eligible_user_ids(&self) -> Result<HashSet<String>> {
        Ok(self.users.clone())
    }
}
