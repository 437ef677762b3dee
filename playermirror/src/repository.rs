//! The mirror itself.
//!
//! Every playlist lives in one immutable [`PlaylistSlot`] holding its
//! metadata and its complete entry set. Writers build a new slot and swap it
//! in under the write lock, so a reader always gets a metadata/entries pair
//! from the same completed reload.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::fingerprint::Fingerprint;
use crate::model::{Entry, EntryField, EntryId, FieldValue, Playlist, PlaylistField, PlaylistId, QueueEntry};
use crate::query::{self, EntryPage, EntryQuery};

struct PlaylistSlot {
    playlist: Playlist,
    entries: Arc<Vec<Entry>>,
    positions: HashMap<EntryId, usize>,
    revision: u64,
}

impl PlaylistSlot {
    fn new(mut playlist: Playlist, entries: Arc<Vec<Entry>>, revision: u64) -> Self {
        playlist.entry_count = entries.len();
        let positions = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.entry_id, pos))
            .collect();
        Self {
            playlist,
            entries,
            positions,
            revision,
        }
    }
}

struct QueueSlot {
    entries: Arc<Vec<QueueEntry>>,
    fingerprint: Option<Fingerprint>,
}

/// Write counters. Unchanged reloads leave them untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub playlist_writes: u64,
    pub entry_set_writes: u64,
    pub queue_writes: u64,
    pub removals: u64,
}

#[derive(Default)]
struct Counters {
    playlist_writes: AtomicU64,
    entry_set_writes: AtomicU64,
    queue_writes: AtomicU64,
    removals: AtomicU64,
}

/// Result of [`Repository::commit_reload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Written,
    Unchanged,
    /// An older reload than the one already stored.
    Stale,
}

pub struct Repository {
    playlists: RwLock<HashMap<PlaylistId, Arc<PlaylistSlot>>>,
    queue: RwLock<QueueSlot>,
    counters: Counters,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    pub fn new() -> Self {
        Self {
            playlists: RwLock::new(HashMap::new()),
            queue: RwLock::new(QueueSlot {
                entries: Arc::new(Vec::new()),
                fingerprint: None,
            }),
            counters: Counters::default(),
        }
    }

    fn slot(&self, id: PlaylistId) -> Result<Arc<PlaylistSlot>> {
        self.playlists
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| MirrorError::playlist_not_found(id))
    }

    /// Inserts or overwrites the playlist metadata, keeping its entries.
    ///
    /// `entry_count` is always taken from the stored entry set.
    pub fn upsert_playlist(&self, record: Playlist) {
        let mut playlists = self.playlists.write();
        let (entries, revision) = match playlists.get(&record.id) {
            Some(slot) => (Arc::clone(&slot.entries), slot.revision),
            None => (Arc::new(Vec::new()), 0),
        };
        if record.entry_count != entries.len() {
            debug!(
                playlist = record.id.0,
                reported = record.entry_count,
                stored = entries.len(),
                "Playlist entry count follows the stored entries"
            );
        }
        let id = record.id;
        playlists.insert(id, Arc::new(PlaylistSlot::new(record, entries, revision)));
        self.counters.playlist_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the whole entry set of a playlist in one swap.
    pub fn replace_entries(&self, playlist_id: PlaylistId, entries: Vec<Entry>) -> Result<()> {
        let mut playlists = self.playlists.write();
        let slot = playlists
            .get(&playlist_id)
            .ok_or_else(|| MirrorError::playlist_not_found(playlist_id))?;
        let playlist = slot.playlist.clone();
        let revision = slot.revision;
        playlists.insert(
            playlist_id,
            Arc::new(PlaylistSlot::new(playlist, Arc::new(entries), revision)),
        );
        self.counters.entry_set_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stores the result of one reload.
    ///
    /// With `entries` the entry set and the metadata are swapped together;
    /// without, only the metadata changes. Nothing is written when the
    /// fingerprint and metadata match what is stored, or when `revision` is
    /// older than the stored one.
    pub fn commit_reload(&self, record: Playlist, entries: Option<Vec<Entry>>, revision: u64) -> CommitOutcome {
        let mut playlists = self.playlists.write();
        let existing = playlists.get(&record.id).cloned();

        if let Some(slot) = &existing {
            if revision < slot.revision {
                return CommitOutcome::Stale;
            }
            let same_metadata = slot.playlist.title == record.title
                && slot.playlist.duration == record.duration
                && slot.playlist.size == record.size
                && slot.playlist.position_index == record.position_index
                && slot.playlist.fingerprint == record.fingerprint;
            // entry ids change when the player hands out new entry handles
            let same_entries = entries.as_ref().is_none_or(|fresh| {
                fresh.len() == slot.entries.len()
                    && fresh
                        .iter()
                        .zip(slot.entries.iter())
                        .all(|(new, old)| new.entry_id == old.entry_id)
            });
            if same_metadata && same_entries && record.fingerprint.is_some() {
                return CommitOutcome::Unchanged;
            }
        }

        let id = record.id;
        let slot = match (entries, existing) {
            (Some(fresh), _) => {
                self.counters.entry_set_writes.fetch_add(1, Ordering::Relaxed);
                PlaylistSlot::new(record, Arc::new(fresh), revision)
            }
            (None, Some(slot)) => PlaylistSlot::new(record, Arc::clone(&slot.entries), revision),
            (None, None) => PlaylistSlot::new(record, Arc::new(Vec::new()), revision),
        };
        playlists.insert(id, Arc::new(slot));
        self.counters.playlist_writes.fetch_add(1, Ordering::Relaxed);
        CommitOutcome::Written
    }

    /// Deletes the playlist, its entries and any queued entry pointing at it.
    pub fn remove_playlist(&self, id: PlaylistId) -> Result<()> {
        let mut playlists = self.playlists.write();
        if playlists.remove(&id).is_none() {
            return Err(MirrorError::playlist_not_found(id));
        }

        let mut queue = self.queue.write();
        if queue.entries.iter().any(|q| q.playlist_id == id) {
            let kept: Vec<QueueEntry> = queue
                .entries
                .iter()
                .filter(|q| q.playlist_id != id)
                .cloned()
                .enumerate()
                .map(|(index, mut q)| {
                    q.queue_index = index;
                    q
                })
                .collect();
            queue.entries = Arc::new(kept);
            // the native queue will be re-read, force the next commit through
            queue.fingerprint = None;
            self.counters.queue_writes.fetch_add(1, Ordering::Relaxed);
        }

        self.counters.removals.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn replace_queue(&self, entries: Vec<QueueEntry>) {
        let mut queue = self.queue.write();
        queue.entries = Arc::new(entries);
        queue.fingerprint = None;
        self.counters.queue_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the queue unless `fingerprint` matches the stored one.
    /// Returns whether anything was written.
    pub fn commit_queue(&self, entries: Vec<QueueEntry>, fingerprint: Fingerprint) -> bool {
        let mut queue = self.queue.write();
        if queue.fingerprint == Some(fingerprint) {
            return false;
        }
        queue.entries = Arc::new(entries);
        queue.fingerprint = Some(fingerprint);
        self.counters.queue_writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn contains_playlist(&self, id: PlaylistId) -> bool {
        self.playlists.read().contains_key(&id)
    }

    pub fn get_playlist(&self, id: PlaylistId) -> Result<Playlist> {
        Ok(self.slot(id)?.playlist.clone())
    }

    pub fn get_playlist_field(&self, id: PlaylistId, field: PlaylistField) -> Result<FieldValue> {
        Ok(self.slot(id)?.playlist.field(field))
    }

    /// Metadata and entries of one playlist, from the same reload.
    pub fn playlist_snapshot(&self, id: PlaylistId) -> Result<(Playlist, Arc<Vec<Entry>>)> {
        let slot = self.slot(id)?;
        Ok((slot.playlist.clone(), Arc::clone(&slot.entries)))
    }

    pub fn entries(&self, id: PlaylistId) -> Result<Arc<Vec<Entry>>> {
        Ok(Arc::clone(&self.slot(id)?.entries))
    }

    pub fn get_entry(&self, playlist_id: PlaylistId, entry_id: EntryId) -> Result<Entry> {
        let slot = self.slot(playlist_id)?;
        slot.positions
            .get(&entry_id)
            .map(|pos| slot.entries[*pos].clone())
            .ok_or_else(|| MirrorError::entry_not_found(playlist_id, entry_id))
    }

    pub fn get_entry_field(&self, playlist_id: PlaylistId, entry_id: EntryId, field: EntryField) -> Result<FieldValue> {
        let slot = self.slot(playlist_id)?;
        slot.positions
            .get(&entry_id)
            .map(|pos| slot.entries[*pos].field(field))
            .ok_or_else(|| MirrorError::entry_not_found(playlist_id, entry_id))
    }

    /// Playlists in native order.
    pub fn list_playlists(&self) -> Vec<Playlist> {
        let mut playlists: Vec<Playlist> = self
            .playlists
            .read()
            .values()
            .map(|slot| slot.playlist.clone())
            .collect();
        playlists.sort_by_key(|p| (p.position_index, p.id));
        playlists
    }

    pub fn list_queue(&self) -> Vec<QueueEntry> {
        self.queue.read().entries.as_ref().clone()
    }

    pub fn query_entries(&self, playlist_id: PlaylistId, query: &EntryQuery) -> Result<EntryPage> {
        let entries = self.entries(playlist_id)?;
        Ok(query::run(&entries, query))
    }

    /// Index of `entry_id` in the filtered and ordered view of `query`.
    pub fn entry_position(&self, playlist_id: PlaylistId, entry_id: EntryId, query: &EntryQuery) -> Result<usize> {
        let entries = self.entries(playlist_id)?;
        query::position_of(&entries, entry_id, query)
            .ok_or_else(|| MirrorError::entry_not_found(playlist_id, entry_id))
    }

    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            playlist_writes: self.counters.playlist_writes.load(Ordering::Relaxed),
            entry_set_writes: self.counters.entry_set_writes.load(Ordering::Relaxed),
            queue_writes: self.counters.queue_writes.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
        }
    }
}
