//! Wire protocol types and JSON codec.
//!
//! Every message is a JSON object carrying a `type` discriminant plus the
//! fields of its variant:
//!
//! ```text
//! {"type":"read","locator":"/sdcard/DCIM/a.jpg","offset":0,"length":262144,"reqId":"r1"}
//! {"type":"read_chunk","reqId":"r1","offset":0,"len":262144,"eof":false}
//! <binary frame: 262144 bytes>
//! ```
//!
//! Inbound messages decode into [`Command`], outbound messages are [`Reply`]
//! values. `read_chunk` (when `len > 0`) and `thumb_meta` are each followed by
//! exactly one binary frame on the same connection.
//!
//! Decoding happens in two steps: the discriminant is read from the raw JSON
//! value first so an unknown `type` is reported as such, then the variant's
//! fields are validated by serde.

// Rust guideline compliant 2026-02

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Value reported in the `hello` message when the config does not override it.
pub const DEFAULT_SDK: u32 = 1;

/// Media collection addressed by a `list` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still images.
    #[serde(alias = "IMAGES")]
    Images,
    /// Video files.
    #[serde(alias = "VIDEOS")]
    Videos,
}

/// Catalog entry describing one media resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Stable numeric identifier assigned by the catalog.
    pub id: u64,
    /// Locator to pass back in `read`, `thumb`, `stat` and `hash` commands.
    pub locator: String,
    /// Human-readable file name.
    pub display_name: Option<String>,
    /// MIME type, when known.
    pub mime: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time in epoch seconds.
    pub modified_time: i64,
    /// Pixel width, when known.
    pub width: Option<u32>,
    /// Pixel height, when known.
    pub height: Option<u32>,
    /// `true` for video resources.
    pub is_video: bool,
}

/// Commands sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Page through a media collection, newest first.
    #[serde(rename = "list", rename_all = "camelCase")]
    ListMedia {
        /// Collection to list.
        kind: MediaKind,
        /// Only items modified strictly after this epoch-seconds value.
        after_modified: Option<i64>,
        /// Maximum number of items.
        limit: u32,
    },

    /// Look up a single item.
    #[serde(rename = "stat", rename_all = "camelCase")]
    StatItem {
        /// Resource locator.
        locator: String,
    },

    /// Read one chunk of a resource.
    #[serde(rename = "read", rename_all = "camelCase")]
    ReadChunk {
        /// Resource locator.
        locator: String,
        /// Byte offset to start at.
        offset: u64,
        /// Requested length, capped at [`crate::transfer::CHUNK_CAP`].
        length: u32,
        /// Correlation token echoed in the reply.
        req_id: String,
    },

    /// Produce a JPEG thumbnail.
    #[serde(rename = "thumb", rename_all = "camelCase")]
    Thumb {
        /// Resource locator.
        locator: String,
        /// Maximum thumbnail width.
        max_w: u32,
        /// Maximum thumbnail height.
        max_h: u32,
        /// Correlation token echoed in the reply.
        req_id: String,
    },

    /// Items of either kind modified after a timestamp.
    #[serde(rename = "find_new", rename_all = "camelCase")]
    FindNewSince {
        /// Lower bound in epoch milliseconds (exclusive).
        since_epoch_ms: i64,
        /// Maximum number of items.
        limit: u32,
    },

    /// SHA-256 of a whole resource.
    #[serde(rename = "hash", rename_all = "camelCase")]
    Hash {
        /// Resource locator.
        locator: String,
        /// Correlation token for logging.
        req_id: String,
    },
}

/// Messages sent by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    /// First message on every new connection.
    #[serde(rename = "hello")]
    Hello {
        /// Platform level of this agent.
        sdk: u32,
    },

    /// Response to `list`.
    #[serde(rename = "list_result")]
    ListMediaResult {
        /// Matching items.
        items: Vec<MediaItem>,
    },

    /// Response to `stat`.
    #[serde(rename = "stat_result")]
    StatResult {
        /// The item, or `null` when the locator is unknown.
        item: Option<MediaItem>,
    },

    /// Metadata preceding a chunk payload.
    #[serde(rename = "read_chunk", rename_all = "camelCase")]
    ReadChunkMeta {
        /// Correlation token from the `read` command.
        req_id: String,
        /// Offset of the first payload byte.
        offset: u64,
        /// Payload length; no binary frame follows when zero.
        len: u32,
        /// `true` when the chunk reaches the end of the resource.
        eof: bool,
    },

    /// Metadata preceding a JPEG thumbnail payload.
    #[serde(rename = "thumb_meta", rename_all = "camelCase")]
    ThumbMeta {
        /// Correlation token from the `thumb` command.
        req_id: String,
        /// Payload length.
        len: u32,
    },

    /// Response to `find_new`.
    #[serde(rename = "find_new_result")]
    FindNewSinceResult {
        /// Matching items.
        items: Vec<MediaItem>,
    },

    /// Response to `hash`.
    #[serde(rename = "hash_result")]
    HashResult {
        /// Locator that was hashed.
        locator: String,
        /// Lowercase hex digest, `null` when the resource could not be read.
        sha256: Option<String>,
    },

    /// Failure report for a command.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        /// Correlation token, when the command carried one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        /// Stable machine-readable code (`read_failed`, `no_thumb`, ...).
        code: String,
        /// Human-readable detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Reply {
    /// Build an `error` reply.
    pub fn error(req_id: Option<&str>, code: &str, message: Option<String>) -> Self {
        Self::Error {
            req_id: req_id.map(str::to_string),
            code: code.to_string(),
            message,
        }
    }
}

/// A message type that travels as tagged JSON.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Every discriminant this type can decode.
    const DISCRIMINANTS: &'static [&'static str];

    /// Discriminant of this value.
    fn discriminant(&self) -> &'static str;
}

impl WireMessage for Command {
    const DISCRIMINANTS: &'static [&'static str] =
        &["list", "stat", "read", "thumb", "find_new", "hash"];

    fn discriminant(&self) -> &'static str {
        match self {
            Self::ListMedia { .. } => "list",
            Self::StatItem { .. } => "stat",
            Self::ReadChunk { .. } => "read",
            Self::Thumb { .. } => "thumb",
            Self::FindNewSince { .. } => "find_new",
            Self::Hash { .. } => "hash",
        }
    }
}

impl WireMessage for Reply {
    const DISCRIMINANTS: &'static [&'static str] = &[
        "hello",
        "list_result",
        "stat_result",
        "read_chunk",
        "thumb_meta",
        "find_new_result",
        "hash_result",
        "error",
    ];

    fn discriminant(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::ListMediaResult { .. } => "list_result",
            Self::StatResult { .. } => "stat_result",
            Self::ReadChunkMeta { .. } => "read_chunk",
            Self::ThumbMeta { .. } => "thumb_meta",
            Self::FindNewSinceResult { .. } => "find_new_result",
            Self::HashResult { .. } => "hash_result",
            Self::Error { .. } => "error",
        }
    }
}

/// Reasons an inbound message is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a JSON object.
    Malformed(String),
    /// Object has no string `type` field.
    MissingDiscriminant,
    /// `type` names no known variant.
    UnknownDiscriminant(String),
    /// Known variant with missing or ill-typed fields.
    InvalidFields {
        /// Discriminant that was being decoded.
        discriminant: String,
        /// Serde's description of the problem.
        reason: String,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed message: {msg}"),
            Self::MissingDiscriminant => write!(f, "Message has no type field"),
            Self::UnknownDiscriminant(t) => write!(f, "Unknown message type: {t}"),
            Self::InvalidFields {
                discriminant,
                reason,
            } => write!(f, "Invalid '{discriminant}' message: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encode a message as JSON text.
pub fn encode<T: WireMessage>(value: &T) -> String {
    // Derived Serialize on these types only produces maps of strings, numbers
    // and bools, which serde_json cannot fail on.
    serde_json::to_string(value).unwrap_or_default()
}

/// Decode JSON text into a message, validating the discriminant and fields.
pub fn decode<T: WireMessage>(text: &str) -> Result<T, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    }

    let discriminant = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingDiscriminant)?
        .to_string();

    if !T::DISCRIMINANTS.contains(&discriminant.as_str()) {
        return Err(DecodeError::UnknownDiscriminant(discriminant));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
        discriminant,
        reason: e.to_string(),
    })
}
