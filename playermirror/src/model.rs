use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::fingerprint::Fingerprint;

/// Value meaning "whatever is active right now" for playlist and entry ids.
pub const ACTIVE_SENTINEL: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaylistId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl PlaylistId {
    pub const ACTIVE: PlaylistId = PlaylistId(ACTIVE_SENTINEL);

    pub fn is_active_sentinel(&self) -> bool {
        self.0 == ACTIVE_SENTINEL
    }
}

impl EntryId {
    pub const ACTIVE: EntryId = EntryId(ACTIVE_SENTINEL);

    pub fn is_active_sentinel(&self) -> bool {
        self.0 == ACTIVE_SENTINEL
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One playlist container as mirrored from the player.
///
/// `entry_count` always matches the number of entries the repository holds
/// for this playlist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub title: String,
    pub entry_count: usize,
    /// Total duration in milliseconds.
    pub duration: i64,
    /// Total size in bytes.
    pub size: i64,
    pub position_index: usize,
    pub fingerprint: Option<Fingerprint>,
}

/// Tracked fields of one playlist entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryFields {
    pub album: String,
    pub artist: String,
    pub date: String,
    pub filename: String,
    pub genre: String,
    pub title: String,
    pub bitrate: u32,
    pub channel_count: u32,
    pub duration_ms: u64,
    pub file_size: u64,
    pub rating: u32,
    pub sample_rate: u32,
}

impl EntryFields {
    /// Returns the fields with a non-empty title.
    ///
    /// An empty title is replaced by the filename's base name without its
    /// extension, or by the whole filename when that is empty too.
    pub fn normalized(mut self) -> Self {
        if self.title.is_empty() {
            let stem = base_name(&self.filename);
            self.title = if stem.is_empty() {
                self.filename.clone()
            } else {
                stem.to_string()
            };
        }
        self
    }

    pub fn source_kind(&self) -> SourceKind {
        if self.duration_ms == 0 {
            SourceKind::Radio
        } else {
            SourceKind::File
        }
    }
}

/// Last path component without its extension. Slashes and backslashes both
/// separate components.
fn base_name(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Upper-case extension of the last path component, without the dot.
pub(crate) fn extension_upper(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(dot) => name[dot + 1..].to_uppercase(),
        None => String::new(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Radio,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub playlist_id: PlaylistId,
    pub entry_id: EntryId,
    pub order_index: usize,
    #[serde(flatten)]
    pub fields: EntryFields,
    pub fingerprint: Fingerprint,
}

impl Entry {
    pub fn source_kind(&self) -> SourceKind {
        self.fields.source_kind()
    }

    pub fn field(&self, field: EntryField) -> FieldValue {
        let f = &self.fields;
        match field {
            EntryField::Id => FieldValue::Integer(self.entry_id.0),
            EntryField::PlaylistId => FieldValue::Integer(self.playlist_id.0),
            EntryField::Album => FieldValue::Text(f.album.clone()),
            EntryField::Artist => FieldValue::Text(f.artist.clone()),
            EntryField::Date => FieldValue::Text(f.date.clone()),
            EntryField::Filename => FieldValue::Text(f.filename.clone()),
            EntryField::Genre => FieldValue::Text(f.genre.clone()),
            EntryField::Title => FieldValue::Text(f.title.clone()),
            EntryField::Bitrate => FieldValue::Integer(f.bitrate.into()),
            EntryField::ChannelsCount => FieldValue::Integer(f.channel_count.into()),
            EntryField::Duration => FieldValue::Integer(saturating_i64(f.duration_ms)),
            EntryField::Filesize => FieldValue::Integer(saturating_i64(f.file_size)),
            EntryField::Rating => FieldValue::Integer(f.rating.into()),
            EntryField::Samplerate => FieldValue::Integer(f.sample_rate.into()),
        }
    }
}

/// One slot of the playback queue, pointing back at the entry it was
/// enqueued from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub queue_index: usize,
    pub playlist_id: PlaylistId,
    pub entry_id: EntryId,
    #[serde(flatten)]
    pub fields: EntryFields,
    pub fingerprint: Fingerprint,
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Projected value of a single field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryField {
    Id,
    PlaylistId,
    Album,
    Artist,
    Date,
    Filename,
    Genre,
    Title,
    Bitrate,
    ChannelsCount,
    Duration,
    Filesize,
    Rating,
    Samplerate,
}

impl EntryField {
    pub const ALL: [EntryField; 14] = [
        EntryField::Id,
        EntryField::PlaylistId,
        EntryField::Album,
        EntryField::Artist,
        EntryField::Date,
        EntryField::Filename,
        EntryField::Genre,
        EntryField::Title,
        EntryField::Bitrate,
        EntryField::ChannelsCount,
        EntryField::Duration,
        EntryField::Filesize,
        EntryField::Rating,
        EntryField::Samplerate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntryField::Id => "id",
            EntryField::PlaylistId => "playlist_id",
            EntryField::Album => "album",
            EntryField::Artist => "artist",
            EntryField::Date => "date",
            EntryField::Filename => "filename",
            EntryField::Genre => "genre",
            EntryField::Title => "title",
            EntryField::Bitrate => "bitrate",
            EntryField::ChannelsCount => "channels_count",
            EntryField::Duration => "duration",
            EntryField::Filesize => "filesize",
            EntryField::Rating => "rating",
            EntryField::Samplerate => "samplerate",
        }
    }
}

impl FromStr for EntryField {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| MirrorError::UnknownField(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaylistField {
    Id,
    Title,
    Duration,
    EntriesCount,
    SizeOfEntries,
}

impl PlaylistField {
    pub fn name(&self) -> &'static str {
        match self {
            PlaylistField::Id => "id",
            PlaylistField::Title => "title",
            PlaylistField::Duration => "duration",
            PlaylistField::EntriesCount => "entries_count",
            PlaylistField::SizeOfEntries => "size_of_entries",
        }
    }
}

impl FromStr for PlaylistField {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(PlaylistField::Id),
            "title" => Ok(PlaylistField::Title),
            "duration" => Ok(PlaylistField::Duration),
            "entries_count" => Ok(PlaylistField::EntriesCount),
            "size_of_entries" => Ok(PlaylistField::SizeOfEntries),
            other => Err(MirrorError::UnknownField(other.to_string())),
        }
    }
}

impl Playlist {
    pub fn field(&self, field: PlaylistField) -> FieldValue {
        match field {
            PlaylistField::Id => FieldValue::Integer(self.id.0),
            PlaylistField::Title => FieldValue::Text(self.title.clone()),
            PlaylistField::Duration => FieldValue::Integer(self.duration),
            PlaylistField::EntriesCount => {
                FieldValue::Integer(i64::try_from(self.entry_count).unwrap_or(i64::MAX))
            }
            PlaylistField::SizeOfEntries => FieldValue::Integer(self.size),
        }
    }
}
