//! Content fingerprints for entries, playlists and the queue.
//!
//! Every tracked field contributes one 64-bit member value: text fields are
//! digested over their UTF-8 bytes (an empty text is the constant 0), numeric
//! fields are taken by value and the file size is digested. The ordered
//! member list is then digested into the fingerprint. Playlist fingerprints
//! digest the ordered entry fingerprints followed by the playlist metadata.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::EntryFields;

/// Member value used for zero-length text fields.
pub const EMPTY_TEXT: u64 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Playlist-level fields folded into the playlist fingerprint.
#[derive(Clone, Copy, Debug)]
pub struct PlaylistMetadataFields<'a> {
    pub title: &'a str,
    pub duration: i64,
    pub size: i64,
    pub entry_count: usize,
    pub position_index: usize,
}

fn digest_u64(hasher: Sha256) -> u64 {
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

fn text_member(text: &str) -> u64 {
    if text.is_empty() {
        return EMPTY_TEXT;
    }
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    digest_u64(hasher)
}

fn bytes_member(bytes: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    digest_u64(hasher)
}

pub fn fingerprint_entry(fields: &EntryFields) -> Fingerprint {
    let members: [u64; 12] = [
        text_member(&fields.album),
        text_member(&fields.artist),
        text_member(&fields.date),
        text_member(&fields.filename),
        text_member(&fields.genre),
        text_member(&fields.title),
        u64::from(fields.bitrate),
        u64::from(fields.channel_count),
        fields.duration_ms,
        bytes_member(&fields.file_size.to_le_bytes()),
        u64::from(fields.rating),
        u64::from(fields.sample_rate),
    ];

    let mut hasher = Sha256::new();
    for member in members {
        hasher.update(member.to_le_bytes());
    }
    Fingerprint(digest_u64(hasher))
}

pub fn fingerprint_playlist<I>(entry_fingerprints: I, metadata: PlaylistMetadataFields<'_>) -> Fingerprint
where
    I: IntoIterator<Item = Fingerprint>,
{
    let mut hasher = Sha256::new();
    let mut count: u64 = 0;
    for fingerprint in entry_fingerprints {
        hasher.update(fingerprint.0.to_le_bytes());
        count += 1;
    }
    // separates the entry list from the metadata members
    hasher.update(count.to_le_bytes());
    hasher.update(text_member(metadata.title).to_le_bytes());
    hasher.update(metadata.duration.to_le_bytes());
    hasher.update(metadata.size.to_le_bytes());
    hasher.update((metadata.entry_count as u64).to_le_bytes());
    hasher.update((metadata.position_index as u64).to_le_bytes());
    Fingerprint(digest_u64(hasher))
}

/// Fingerprint of the whole queue: the ordered entry fingerprints together
/// with the back-references they point at.
pub fn fingerprint_queue<I>(items: I) -> Fingerprint
where
    I: IntoIterator<Item = (i64, i64, Fingerprint)>,
{
    let mut hasher = Sha256::new();
    for (playlist_id, entry_id, fingerprint) in items {
        hasher.update(playlist_id.to_le_bytes());
        hasher.update(entry_id.to_le_bytes());
        hasher.update(fingerprint.0.to_le_bytes());
    }
    Fingerprint(digest_u64(hasher))
}

/// An uninitialized old fingerprint always counts as a change.
pub fn has_changed(old: Option<Fingerprint>, new: Fingerprint) -> bool {
    old != Some(new)
}
