//! Core domain model for the lexicon feed importer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lexi-core";

pub type CollectionId = i64;
pub type EntryId = i64;
pub type ContributorId = i64;
pub type MappingId = i64;
pub type MediaId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
}

/// Canonical dictionary record. `name` is unique within `collection_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub collection_id: CollectionId,
    pub name: String,
    pub secondary_name: Option<String>,
    pub external_id: Option<String>,
    pub contributor_id: Option<ContributorId>,
    pub created_by: String,
    pub exclude_from_export: bool,
}

/// Insert payload for an entry whose id has not been generated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub collection_id: CollectionId,
    pub name: String,
    pub secondary_name: Option<String>,
    pub external_id: Option<String>,
    pub created_by: String,
    pub exclude_from_export: bool,
}

/// Second-pass update applied once the generated id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFinalize {
    pub entry_id: EntryId,
    pub name: String,
    pub secondary_name: Option<String>,
    pub contributor_id: Option<ContributorId>,
}

/// One row of the external-id index: an existing entry carrying `external_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdMatch {
    pub external_id: String,
    pub entry_id: EntryId,
    pub media_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorIdentity {
    pub id: ContributorId,
    pub name: String,
    pub code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContributor {
    pub name: String,
    pub code: i32,
}

/// Canonical category within a mapping domain (e.g. `semantic_field`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub id: MappingId,
    pub domain: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub entry_id: EntryId,
    pub language: String,
    pub text: String,
    pub secondary_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub entry_id: EntryId,
    pub author: String,
    pub body: String,
    pub is_public: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationCount {
    pub entry_id: EntryId,
    pub agrees: i32,
    pub disagrees: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldAssociation {
    pub entry_id: EntryId,
    pub mapping_id: MappingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagAssociation {
    pub entry_id: EntryId,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaVariant {
    Main,
    Illustration,
    UsageExample(u32),
}

impl MediaVariant {
    /// Video type label recorded alongside stored media. Illustrations are filed as main media.
    pub fn video_type(&self) -> String {
        match self {
            MediaVariant::Main | MediaVariant::Illustration => "main".to_string(),
            MediaVariant::UsageExample(n) => format!("finalexample{n}"),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(MediaVariant::Main),
            "illustration" => Some(MediaVariant::Illustration),
            other => other
                .strip_prefix("usage_example_")
                .and_then(|n| n.parse().ok())
                .map(MediaVariant::UsageExample),
        }
    }
}

impl fmt::Display for MediaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaVariant::Main => f.write_str("main"),
            MediaVariant::Illustration => f.write_str("illustration"),
            MediaVariant::UsageExample(n) => write!(f, "usage_example_{n}"),
        }
    }
}

/// Remote media to retrieve and attach to an entry after the import commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub file_name: String,
    pub entry_id: EntryId,
    pub variant: MediaVariant,
    pub ordinal: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStoredMedia {
    pub entry_id: EntryId,
    pub file_path: String,
    pub variant: MediaVariant,
    pub ordinal: i32,
    pub content_hash: String,
    pub byte_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMedia {
    pub id: MediaId,
    pub entry_id: EntryId,
    pub file_path: String,
    pub variant: MediaVariant,
    pub ordinal: i32,
    pub content_hash: String,
    pub byte_size: i64,
    pub is_public: bool,
}

/// Answer to the survey question "have you seen or used this sign".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignSeen {
    Yes,
    No,
    NotSure,
}

impl SignSeen {
    /// Parses a raw survey answer. Blank answers yield `Ok(None)`.
    pub fn parse_answer(raw: &str) -> Result<Option<Self>, String> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "" => Ok(None),
            "yes" => Ok(Some(SignSeen::Yes)),
            "no" => Ok(Some(SignSeen::No)),
            "not sure" | "not_sure" => Ok(Some(SignSeen::NotSure)),
            _ => Err(format!("unrecognised answer {raw:?}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignSeen::Yes => "yes",
            SignSeen::No => "no",
            SignSeen::NotSure => "not_sure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub entry_id: EntryId,
    pub sign_seen: SignSeen,
    pub response_id: String,
    pub respondent_first_name: String,
    pub respondent_last_name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAggregation {
    pub entry_id: EntryId,
    pub group: String,
    pub sign_seen_yes: i32,
    pub sign_seen_no: i32,
    pub sign_seen_not_sure: i32,
    pub comments: String,
}
