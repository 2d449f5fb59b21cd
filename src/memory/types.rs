//! Core record type definitions.
//!
//! Defines [`Source`] (where a piece of content came from), [`MetadataValue`]
//! (the closed set of JSON-safe metadata values), [`ContentRecord`] (a full
//! stored record), [`VectorRecord`], [`StoreRequest`] (the ingestion payload)
//! and [`RankedResult`] (what every query returns).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a piece of content was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// Copied to the system clipboard.
    Clipboard,
    /// Text recognized from a screen capture of `app`.
    ScreenCapture { app: String },
    /// An email message.
    Email {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    /// A browser page.
    Browser {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// A meeting transcript.
    Meeting {
        #[serde(default)]
        participants: Vec<String>,
    },
    /// Entered directly by the user.
    Manual,
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Clipboard => SourceKind::Clipboard,
            Self::ScreenCapture { .. } => SourceKind::ScreenCapture,
            Self::Email { .. } => SourceKind::Email,
            Self::Browser { .. } => SourceKind::Browser,
            Self::Meeting { .. } => SourceKind::Meeting,
            Self::Manual => SourceKind::Manual,
        }
    }
}

/// The discriminant of a [`Source`], used for filtering and histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Clipboard,
    ScreenCapture,
    Email,
    Browser,
    Meeting,
    Manual,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        Self::Clipboard,
        Self::ScreenCapture,
        Self::Email,
        Self::Browser,
        Self::Meeting,
        Self::Manual,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clipboard => "clipboard",
            Self::ScreenCapture => "screen_capture",
            Self::Email => "email",
            Self::Browser => "browser",
            Self::Meeting => "meeting",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown source kind: {s}"))
    }
}

/// A JSON-safe metadata value. `null` is deliberately not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// String-keyed metadata map attached to a record.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A stored content record, matching the `content` table plus its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Opaque unique identifier (UUID v7 when generated by the engine).
    pub id: String,
    /// The raw captured text.
    pub text: String,
    /// Where the text came from.
    pub source: Source,
    /// Semantic labels such as `urgent_action` or `commitment`.
    pub tags: BTreeSet<String>,
    /// Arbitrary JSON-safe metadata.
    pub metadata: Metadata,
    /// When the underlying event happened.
    pub timestamp: DateTime<Utc>,
    /// Records the user created directly survive the retention sweep.
    pub user_created: bool,
    /// Number of times this record was returned by a ranked query.
    pub access_count: u32,
    /// RFC 3339 timestamp of the last ranked retrieval, if any.
    pub last_accessed: Option<String>,
    /// RFC 3339 store time.
    pub created_at: String,
    /// RFC 3339 last write time.
    pub updated_at: String,
}

/// A stored embedding with its cached L2 norm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub dimension: usize,
    pub embedding: Vec<f32>,
    pub magnitude: f32,
}

/// Ingestion payload for [`crate::memory::store::store_content`].
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Caller-chosen id. A fresh UUID v7 is generated when `None`; an existing id is replaced.
    pub id: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source: Source,
    pub tags: BTreeSet<String>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    pub user_created: bool,
}

impl StoreRequest {
    /// A request with no tags or metadata, timestamped now.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>, source: Source) -> Self {
        Self {
            id: None,
            text: text.into(),
            embedding,
            user_created: matches!(source, Source::Manual),
            source,
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_created(mut self, user_created: bool) -> Self {
        self.user_created = user_created;
        self
    }
}

/// A text-only ingestion payload; the engine embeds it with its provider.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub id: Option<String>,
    pub text: String,
    pub source: Source,
    pub tags: BTreeSet<String>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    pub user_created: bool,
}

impl TextRequest {
    pub fn new(text: impl Into<String>, source: Source) -> Self {
        Self {
            id: None,
            text: text.into(),
            user_created: matches!(source, Source::Manual),
            source,
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach an embedding, producing a full [`StoreRequest`].
    pub fn into_store_request(self, embedding: Vec<f32>) -> StoreRequest {
        StoreRequest {
            id: self.id,
            text: self.text,
            embedding,
            source: self.source,
            tags: self.tags,
            metadata: self.metadata,
            timestamp: self.timestamp,
            user_created: self.user_created,
        }
    }
}

/// A single query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub text: String,
    pub source: Source,
    pub tags: BTreeSet<String>,
    /// Cosine similarity in `[0, 1]`, fused RRF score, or `1.0` for exact filter matches.
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

impl RankedResult {
    pub(crate) fn from_record(record: ContentRecord, score: f64) -> Self {
        Self {
            id: record.id,
            text: record.text,
            source: record.source,
            tags: record.tags,
            score,
            timestamp: record.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_tagged_json() {
        let source = Source::Email {
            sender: Some("ana@example.com".into()),
            subject: None,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "email", "sender": "ana@example.com"}));
        let back: Source = serde_json::from_value(json).unwrap();
        assert_eq!(back, source);
        assert_eq!(back.kind(), SourceKind::Email);
    }

    #[test]
    fn source_kind_parses_every_variant() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("fax".parse::<SourceKind>().is_err());
    }

    #[test]
    fn metadata_rejects_null() {
        let ok: Metadata = serde_json::from_value(serde_json::json!({
            "count": 3, "flag": true, "names": ["a", "b"], "nested": {"k": "v"}
        }))
        .unwrap();
        assert_eq!(ok.get("count"), Some(&MetadataValue::Number(3.0)));
        assert_eq!(ok.get("flag"), Some(&MetadataValue::Bool(true)));

        let bad: Result<Metadata, _> = serde_json::from_value(serde_json::json!({"gone": null}));
        assert!(bad.is_err());
    }

    #[test]
    fn manual_source_defaults_to_user_created() {
        assert!(StoreRequest::new("note", vec![1.0], Source::Manual).user_created);
        assert!(!StoreRequest::new("copied", vec![1.0], Source::Clipboard).user_created);
    }
}
