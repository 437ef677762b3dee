//! Stable ids for volatile native handles.
//!
//! Handles are keys into resolver-owned tables: the first sighting of a
//! handle allocates the next id, and the pair lives until the handle is
//! released. Playlist ids are global; entry ids are scoped to their playlist.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::adapter::{NativeAdapter, NativeHandle, SentinelFallback};
use crate::error::{MirrorError, Result};
use crate::model::{ACTIVE_SENTINEL, EntryId, PlaylistId};

#[derive(Debug, Default)]
struct HandleTable {
    by_handle: HashMap<NativeHandle, i64>,
    by_id: HashMap<i64, NativeHandle>,
    next_id: i64,
}

impl HandleTable {
    fn starting_at(first_id: i64) -> Self {
        Self {
            next_id: first_id,
            ..Default::default()
        }
    }

    fn intern(&mut self, handle: NativeHandle) -> i64 {
        if let Some(id) = self.by_handle.get(&handle) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_handle.insert(handle, id);
        self.by_id.insert(id, handle);
        id
    }

    fn release(&mut self, handle: NativeHandle) -> Option<i64> {
        let id = self.by_handle.remove(&handle)?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// Which kind of "-1" is being resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentinelKind {
    Playlist,
    Entry,
}

pub struct IdentityResolver {
    adapter: Arc<dyn NativeAdapter>,
    fallback: SentinelFallback,
    playlists: RwLock<HandleTable>,
    entries: RwLock<HashMap<PlaylistId, HandleTable>>,
}

impl IdentityResolver {
    pub fn new(adapter: Arc<dyn NativeAdapter>, fallback: SentinelFallback) -> Self {
        Self {
            adapter,
            fallback,
            // playlist ids start at 1 so that no id collides with the sentinel or 0
            playlists: RwLock::new(HandleTable::starting_at(1)),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn fallback(&self) -> SentinelFallback {
        self.fallback
    }

    /// Stable id for `handle`, allocated on first sight.
    pub fn to_stable_id(&self, handle: NativeHandle) -> PlaylistId {
        if let Some(id) = self.playlists.read().by_handle.get(&handle) {
            return PlaylistId(*id);
        }
        PlaylistId(self.playlists.write().intern(handle))
    }

    pub fn lookup_playlist(&self, handle: NativeHandle) -> Option<PlaylistId> {
        self.playlists
            .read()
            .by_handle
            .get(&handle)
            .map(|id| PlaylistId(*id))
    }

    pub fn to_native_handle(&self, id: PlaylistId) -> Result<NativeHandle> {
        self.playlists
            .read()
            .by_id
            .get(&id.0)
            .copied()
            .ok_or_else(|| MirrorError::playlist_not_found(id))
    }

    /// Forgets a removed playlist together with its entry handles.
    pub fn release_playlist(&self, handle: NativeHandle) -> Option<PlaylistId> {
        let id = PlaylistId(self.playlists.write().release(handle)?);
        self.entries.write().remove(&id);
        Some(id)
    }

    pub fn known_playlists(&self) -> Vec<(PlaylistId, NativeHandle)> {
        let table = self.playlists.read();
        let mut known: Vec<_> = table
            .by_id
            .iter()
            .map(|(id, handle)| (PlaylistId(*id), *handle))
            .collect();
        known.sort();
        known
    }

    pub fn to_stable_entry_id(&self, playlist: PlaylistId, handle: NativeHandle) -> EntryId {
        if let Some(table) = self.entries.read().get(&playlist) {
            if let Some(id) = table.by_handle.get(&handle) {
                return EntryId(*id);
            }
        }
        let mut entries = self.entries.write();
        EntryId(entries.entry(playlist).or_default().intern(handle))
    }

    pub fn to_native_entry_handle(&self, playlist: PlaylistId, id: EntryId) -> Result<NativeHandle> {
        self.entries
            .read()
            .get(&playlist)
            .and_then(|table| table.by_id.get(&id.0).copied())
            .ok_or_else(|| MirrorError::entry_not_found(playlist, id))
    }

    /// Drops entry handles of `playlist` that are not in `live`.
    pub fn retain_entry_handles(&self, playlist: PlaylistId, live: &[NativeHandle]) {
        let mut entries = self.entries.write();
        let Some(table) = entries.get_mut(&playlist) else {
            return;
        };
        let live: HashSet<&NativeHandle> = live.iter().collect();
        let stale: Vec<NativeHandle> = table
            .by_handle
            .keys()
            .filter(|handle| !live.contains(handle))
            .copied()
            .collect();
        for handle in stale {
            table.release(handle);
        }
    }

    /// Entry id for the entry at `index`, keyed by handle when the adapter
    /// provides one and by index otherwise.
    fn entry_id_at(&self, playlist: PlaylistId, handle: NativeHandle, index: usize) -> Result<EntryId> {
        match self.adapter.entry_handle(handle, index)? {
            Some(entry_handle) => Ok(self.to_stable_entry_id(playlist, entry_handle)),
            None => Ok(EntryId(index as i64)),
        }
    }

    /// Returns `id` unchanged unless it is the "-1" sentinel, in which case
    /// the active playlist (or the playing entry) is queried from the player.
    pub fn resolve_sentinel(&self, id: i64, kind: SentinelKind) -> Result<i64> {
        if id != ACTIVE_SENTINEL {
            return Ok(id);
        }
        match kind {
            SentinelKind::Playlist => Ok(self.resolve_playlist(PlaylistId::ACTIVE)?.0),
            SentinelKind::Entry => {
                let (_, entry) = self.resolve_entry(PlaylistId::ACTIVE, EntryId::ACTIVE)?;
                Ok(entry.0)
            }
        }
    }

    pub fn resolve_playlist(&self, id: PlaylistId) -> Result<PlaylistId> {
        if !id.is_active_sentinel() {
            return Ok(id);
        }
        let handle = self.adapter.active_playlist()?;
        self.lookup_playlist(handle).ok_or_else(|| {
            MirrorError::NotFound(format!("active playlist {} is not mirrored yet", handle))
        })
    }

    /// Resolves a `(playlist, entry)` pair where either side may be "-1".
    ///
    /// An active entry is only reported for the active playlist: asking for
    /// the playing entry of another playlist is `NotFound`.
    pub fn resolve_entry(&self, playlist: PlaylistId, entry: EntryId) -> Result<(PlaylistId, EntryId)> {
        if !entry.is_active_sentinel() {
            return Ok((self.resolve_playlist(playlist)?, entry));
        }

        let active_handle = self.adapter.active_playlist()?;
        let active_id = self.lookup_playlist(active_handle).ok_or_else(|| {
            MirrorError::NotFound(format!("active playlist {} is not mirrored yet", active_handle))
        })?;

        if !playlist.is_active_sentinel() && playlist != active_id {
            return Err(MirrorError::NotFound(format!(
                "no active entry in playlist {}",
                playlist
            )));
        }

        let index = match self.adapter.active_entry_index(active_handle)? {
            Some(index) => index,
            None => match self.fallback {
                SentinelFallback::FirstEntryOfActivePlaylist => {
                    let metadata = self.adapter.playlist_metadata(active_handle)?;
                    if metadata.entry_count == 0 {
                        return Err(MirrorError::NotFound(format!(
                            "active playlist {} is empty",
                            active_id
                        )));
                    }
                    debug!(playlist = active_id.0, "Nothing playing, falling back to first entry");
                    0
                }
                SentinelFallback::None => {
                    return Err(MirrorError::NotFound("no entry is playing".to_string()));
                }
            },
        };

        Ok((active_id, self.entry_id_at(active_id, active_handle, index)?))
    }
}
