//! Memory records, attachments, and the inputs used to create them.
//!
//! Field names and encodings match the on-disk index: camelCase keys,
//! ISO-8601 UTC timestamps, visibility as an integer code, attachment kind
//! as a lowercase string.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Who can see a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Visibility {
    Everyone,
    Private,
    Scheduled,
}

impl From<Visibility> for u8 {
    fn from(v: Visibility) -> Self {
        match v {
            Visibility::Everyone => 0,
            Visibility::Private => 1,
            Visibility::Scheduled => 2,
        }
    }
}

impl TryFrom<u8> for Visibility {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Visibility::Everyone),
            1 => Ok(Visibility::Private),
            2 => Ok(Visibility::Scheduled),
            other => Err(format!("unknown visibility code {}", other)),
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Everyone => write!(f, "everyone"),
            Visibility::Private => write!(f, "private"),
            Visibility::Scheduled => write!(f, "scheduled"),
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "everyone" => Ok(Visibility::Everyone),
            "private" => Ok(Visibility::Private),
            "scheduled" => Ok(Visibility::Scheduled),
            _ => Err(Error::InvalidMemory(format!("Unknown visibility: {}", s))),
        }
    }
}

/// Attachment media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentKind::Image => write!(f, "image"),
            AttachmentKind::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(AttachmentKind::Image),
            "audio" => Ok(AttachmentKind::Audio),
            _ => Err(Error::InvalidMemory(format!("Unknown attachment kind: {}", s))),
        }
    }
}

/// Where an attachment's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentLocation<'a> {
    /// Generated filename inside the attachments folder
    Local(&'a str),
    /// Remote URL with no local file
    Remote(&'a str),
}

/// One image or audio asset referenced by a memory.
///
/// `filename` is either a store-generated local name or a literal
/// `http(s)://` URL; see [`Attachment::location`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub filename: String,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, filename: impl Into<String>) -> Self {
        Self {
            kind,
            filename: filename.into(),
        }
    }

    pub fn image(filename: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, filename)
    }

    pub fn audio(filename: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Audio, filename)
    }

    pub fn is_remote(&self) -> bool {
        is_remote_reference(&self.filename)
    }

    pub fn location(&self) -> AttachmentLocation<'_> {
        if self.is_remote() {
            AttachmentLocation::Remote(&self.filename)
        } else {
            AttachmentLocation::Local(&self.filename)
        }
    }

    /// Local filename, if this attachment is backed by a file the store may touch.
    ///
    /// Names that could escape the attachments folder are never returned.
    pub fn local_filename(&self) -> Option<&str> {
        match self.location() {
            AttachmentLocation::Local(name) if is_plain_filename(name) => Some(name),
            _ => None,
        }
    }
}

/// Case-insensitive `http://` / `https://` prefix check
pub fn is_remote_reference(reference: &str) -> bool {
    let lower = reference.trim_start().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// A user-authored memory, as stored in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub visibility: Visibility,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso8601::option"
    )]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Build a memory from validated input
    pub fn from_new(new: NewMemory, id: String, created_at: DateTime<Utc>) -> Result<Self> {
        let new = new.validated()?;
        Ok(Self {
            id,
            owner_id: new.owner_id,
            title: new.title,
            body: new.body,
            category: new.category,
            attachments: new.attachments,
            visibility: new.visibility,
            scheduled_for: new.scheduled_for,
            created_at,
        })
    }

    /// Filenames of attachments backed by local files
    pub fn local_filenames(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().filter_map(Attachment::local_filename)
    }
}

/// Input for creating a memory
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub owner_id: String,
    pub title: String,
    pub body: Option<String>,
    pub category: Option<String>,
    pub attachments: Vec<Attachment>,
    pub visibility: Visibility,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            title: title.into(),
            body: None,
            category: None,
            attachments: Vec::new(),
            visibility: Visibility::Everyone,
            scheduled_for: None,
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn scheduled_for(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(when);
        self
    }

    /// Check the title and schedule; drop a schedule that has no meaning
    pub fn validated(mut self) -> Result<Self> {
        validate_title(&self.title)?;
        match self.visibility {
            Visibility::Scheduled if self.scheduled_for.is_none() => {
                return Err(Error::InvalidMemory(
                    "scheduled memories need a scheduled time".to_string(),
                ));
            }
            Visibility::Scheduled => {}
            _ => self.scheduled_for = None,
        }
        Ok(self)
    }
}

/// Replacement values for an existing memory
#[derive(Debug, Clone)]
pub struct MemoryUpdate {
    pub title: String,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MemoryUpdate {
    pub fn validated(self) -> Result<Self> {
        validate_title(&self.title)?;
        Ok(self)
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidMemory("title must not be empty".to_string()));
    }
    Ok(())
}

/// An audio recording handed to the store
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub path: PathBuf,
    pub duration: Duration,
}

impl AudioInput {
    pub fn new(path: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }
}

/// Raw media for the richer create path
#[derive(Debug, Clone, Default)]
pub struct MediaInput {
    pub images: Vec<image::DynamicImage>,
    pub audio: Vec<AudioInput>,
    /// Remote URL or local asset name, used only when no image is provided
    pub fallback_image: Option<String>,
}

mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => super::serialize(dt, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
