//! In-memory [`NativeAdapter`] for tests and demos.
//!
//! The scripted player holds playlists, a queue and the active state behind
//! one mutex. Changes made through its setters are silent: callers fire the
//! matching notification themselves (`notify_*`), or rely on polling.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::adapter::{
    ChangeFlags, NativeAdapter, NativeEntry, NativeHandle, NativePlaylistMetadata, NativePlaylistRef,
    NativeQueueItem, NativeSink, SentinelFallback, WatchStrategy,
};
use crate::error::{MirrorError, Result};
use crate::events::TranslationTable;
use crate::model::EntryFields;

/// Entry fields of a plain three-minute MP3 titled `title`.
pub fn track(title: &str) -> EntryFields {
    EntryFields {
        title: title.to_string(),
        artist: "Various".to_string(),
        filename: format!("/music/{}.mp3", title),
        bitrate: 192,
        channel_count: 2,
        duration_ms: 180_000,
        file_size: 4_320_000,
        sample_rate: 44_100,
        ..Default::default()
    }
}

/// Number of adapter calls made so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulatedCalls {
    pub list_playlists: u64,
    pub playlist_metadata: u64,
    pub entry_metadata: u64,
    pub active_playlist: u64,
    pub active_entry_index: u64,
    pub queue: u64,
}

struct SimEntry {
    handle: NativeHandle,
    fields: EntryFields,
}

struct SimPlaylist {
    handle: NativeHandle,
    title: String,
    entries: Vec<SimEntry>,
}

#[derive(Default)]
struct SimState {
    playlists: Vec<SimPlaylist>,
    active: Option<(NativeHandle, Option<usize>)>,
    queue: Vec<NativeQueueItem>,
    failing_entries: HashMap<NativeHandle, usize>,
    misreported_counts: HashMap<NativeHandle, usize>,
    fail_listing: bool,
    next_entry_handle: u64,
    calls: SimulatedCalls,
    reads_in_flight: HashMap<NativeHandle, usize>,
    max_parallel_reads: HashMap<NativeHandle, usize>,
}

impl SimState {
    fn playlist(&self, handle: NativeHandle) -> Result<&SimPlaylist> {
        self.playlists
            .iter()
            .find(|p| p.handle == handle)
            .ok_or_else(|| MirrorError::native_query_failed("playlist", format!("unknown handle {}", handle)))
    }

    fn make_entries(&mut self, fields: Vec<EntryFields>) -> Vec<SimEntry> {
        fields
            .into_iter()
            .map(|fields| {
                self.next_entry_handle += 1;
                SimEntry {
                    handle: NativeHandle(0x10_0000 + self.next_entry_handle),
                    fields,
                }
            })
            .collect()
    }
}

pub struct SimulatedPlayer {
    name: String,
    strategy: WatchStrategy,
    table: TranslationTable,
    fallback: SentinelFallback,
    entry_handles: bool,
    read_delay: Mutex<Duration>,
    state: Mutex<SimState>,
    sink: Mutex<Option<NativeSink>>,
}

impl SimulatedPlayer {
    fn with_strategy(name: &str, strategy: WatchStrategy, table: TranslationTable) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            table,
            fallback: SentinelFallback::None,
            entry_handles: false,
            read_delay: Mutex::new(Duration::ZERO),
            state: Mutex::new(SimState::default()),
            sink: Mutex::new(None),
        }
    }

    /// A player reporting every change through its sink.
    pub fn push() -> Self {
        Self::with_strategy("simulated-push", WatchStrategy::Push, TranslationTable::callback_generation())
    }

    /// A player without change notifications.
    pub fn polling(interval_ms: u64) -> Self {
        Self::with_strategy(
            "simulated-polling",
            WatchStrategy::Polling { interval_ms },
            TranslationTable::message_generation(),
        )
    }

    pub fn with_fallback(mut self, fallback: SentinelFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Entries get their own native handles instead of being keyed by index.
    pub fn with_entry_handles(mut self) -> Self {
        self.entry_handles = true;
        self
    }

    /// Inserts a playlist at the end, or replaces the one with `handle`.
    pub fn insert_playlist(&self, handle: NativeHandle, title: &str, entries: Vec<EntryFields>) {
        let mut state = self.state.lock();
        let entries = state.make_entries(entries);
        let playlist = SimPlaylist {
            handle,
            title: title.to_string(),
            entries,
        };
        match state.playlists.iter().position(|p| p.handle == handle) {
            Some(pos) => state.playlists[pos] = playlist,
            None => state.playlists.push(playlist),
        }
    }

    pub fn remove_playlist(&self, handle: NativeHandle) {
        let mut state = self.state.lock();
        state.playlists.retain(|p| p.handle != handle);
        state.queue.retain(|q| q.playlist != handle);
        if state.active.is_some_and(|(active, _)| active == handle) {
            state.active = None;
        }
    }

    pub fn rename_playlist(&self, handle: NativeHandle, title: &str) {
        let mut state = self.state.lock();
        if let Some(playlist) = state.playlists.iter_mut().find(|p| p.handle == handle) {
            playlist.title = title.to_string();
        }
    }

    pub fn set_entries(&self, handle: NativeHandle, entries: Vec<EntryFields>) {
        let mut state = self.state.lock();
        let entries = state.make_entries(entries);
        if let Some(playlist) = state.playlists.iter_mut().find(|p| p.handle == handle) {
            playlist.entries = entries;
        }
    }

    pub fn update_entry(&self, handle: NativeHandle, index: usize, fields: EntryFields) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .playlists
            .iter_mut()
            .find(|p| p.handle == handle)
            .and_then(|p| p.entries.get_mut(index))
        {
            entry.fields = fields;
        }
    }

    pub fn set_active(&self, handle: NativeHandle, playing: Option<usize>) {
        self.state.lock().active = Some((handle, playing));
    }

    pub fn set_queue(&self, items: Vec<(NativeHandle, usize)>) {
        self.state.lock().queue = items
            .into_iter()
            .map(|(playlist, index)| NativeQueueItem { playlist, index })
            .collect();
    }

    /// Reading entry `index` of `handle` fails until cleared with `None`.
    pub fn fail_entry_at(&self, handle: NativeHandle, index: Option<usize>) {
        let mut state = self.state.lock();
        match index {
            Some(index) => state.failing_entries.insert(handle, index),
            None => state.failing_entries.remove(&handle),
        };
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    /// The next metadata read of `handle` reports `count` entries.
    pub fn misreport_next_count(&self, handle: NativeHandle, count: usize) {
        self.state.lock().misreported_counts.insert(handle, count);
    }

    /// Every entry read sleeps this long.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    pub fn calls(&self) -> SimulatedCalls {
        self.state.lock().calls
    }

    /// Highest number of concurrent entry reads seen for `handle`.
    pub fn max_parallel_reads(&self, handle: NativeHandle) -> usize {
        self.state
            .lock()
            .max_parallel_reads
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn with_sink(&self, f: impl FnOnce(&NativeSink)) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => {
                f(&sink);
                true
            }
            None => false,
        }
    }

    pub fn notify_added(&self, handle: NativeHandle) -> bool {
        self.with_sink(|sink| sink.playlist_added(handle))
    }

    pub fn notify_removed(&self, handle: NativeHandle) -> bool {
        self.with_sink(|sink| sink.playlist_removed(handle))
    }

    pub fn notify_changed(&self, handle: NativeHandle, flags: ChangeFlags) -> bool {
        self.with_sink(|sink| sink.playlist_changed(handle, flags))
    }

    pub fn notify_queue(&self) -> bool {
        self.with_sink(|sink| sink.queue_changed())
    }

    pub fn notify_catalog(&self) -> bool {
        self.with_sink(|sink| sink.catalog_changed())
    }

    pub fn fire_event(&self, code: u32, param: i64) -> bool {
        self.with_sink(|sink| sink.player_event(code, param))
    }

    fn end_read(&self, handle: NativeHandle) {
        let mut state = self.state.lock();
        if let Some(count) = state.reads_in_flight.get_mut(&handle) {
            *count = count.saturating_sub(1);
        }
    }
}

impl NativeAdapter for SimulatedPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch_strategy(&self) -> WatchStrategy {
        self.strategy.clone()
    }

    fn translation_table(&self) -> &TranslationTable {
        &self.table
    }

    fn sentinel_fallback(&self) -> SentinelFallback {
        self.fallback
    }

    fn list_playlists(&self) -> Result<Vec<NativePlaylistRef>> {
        let mut state = self.state.lock();
        state.calls.list_playlists += 1;
        if state.fail_listing {
            return Err(MirrorError::native_query_failed("list_playlists", "player busy"));
        }
        Ok(state
            .playlists
            .iter()
            .enumerate()
            .map(|(index, p)| NativePlaylistRef {
                handle: p.handle,
                index,
            })
            .collect())
    }

    fn playlist_metadata(&self, playlist: NativeHandle) -> Result<NativePlaylistMetadata> {
        let mut state = self.state.lock();
        state.calls.playlist_metadata += 1;
        let misreported = state.misreported_counts.remove(&playlist);
        let p = state.playlist(playlist)?;
        Ok(NativePlaylistMetadata {
            title: p.title.clone(),
            duration: p.entries.iter().map(|e| e.fields.duration_ms as i64).sum(),
            size: p.entries.iter().map(|e| e.fields.file_size as i64).sum(),
            entry_count: misreported.unwrap_or(p.entries.len()),
        })
    }

    fn entry_metadata(&self, playlist: NativeHandle, index: usize) -> Result<NativeEntry> {
        {
            let mut state = self.state.lock();
            state.calls.entry_metadata += 1;
            let in_flight = {
                let count = state.reads_in_flight.entry(playlist).or_insert(0);
                *count += 1;
                *count
            };
            let max = state.max_parallel_reads.entry(playlist).or_insert(0);
            *max = (*max).max(in_flight);
        }

        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = {
            let state = self.state.lock();
            if state.failing_entries.get(&playlist) == Some(&index) {
                Err(MirrorError::native_query_failed(
                    "entry_metadata",
                    format!("entry {} of {} unreadable", index, playlist),
                ))
            } else {
                state.playlist(playlist).and_then(|p| {
                    p.entries
                        .get(index)
                        .map(|entry| NativeEntry {
                            handle: self.entry_handles.then_some(entry.handle),
                            fields: entry.fields.clone(),
                        })
                        .ok_or_else(|| {
                            MirrorError::native_query_failed(
                                "entry_metadata",
                                format!("index {} out of range", index),
                            )
                        })
                })
            }
        };
        self.end_read(playlist);
        result
    }

    fn entry_handle(&self, playlist: NativeHandle, index: usize) -> Result<Option<NativeHandle>> {
        if !self.entry_handles {
            return Ok(None);
        }
        let state = self.state.lock();
        let p = state.playlist(playlist)?;
        Ok(p.entries.get(index).map(|entry| entry.handle))
    }

    fn active_playlist(&self) -> Result<NativeHandle> {
        let mut state = self.state.lock();
        state.calls.active_playlist += 1;
        match state.active {
            Some((handle, _)) => Ok(handle),
            None => state
                .playlists
                .first()
                .map(|p| p.handle)
                .ok_or_else(|| MirrorError::native_query_failed("active_playlist", "no playlist")),
        }
    }

    fn active_entry_index(&self, playlist: NativeHandle) -> Result<Option<usize>> {
        let mut state = self.state.lock();
        state.calls.active_entry_index += 1;
        Ok(match state.active {
            Some((handle, playing)) if handle == playlist => playing,
            _ => None,
        })
    }

    fn queue(&self) -> Result<Vec<NativeQueueItem>> {
        let mut state = self.state.lock();
        state.calls.queue += 1;
        Ok(state.queue.clone())
    }

    fn subscribe(&self, sink: NativeSink) -> Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.sink.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_catalog() {
        let player = SimulatedPlayer::push();
        player.insert_playlist(NativeHandle(1), "A", vec![track("x"), track("y")]);
        player.insert_playlist(NativeHandle(2), "B", vec![]);

        let refs = player.list_playlists().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1], NativePlaylistRef { handle: NativeHandle(2), index: 1 });

        let meta = player.playlist_metadata(NativeHandle(1)).unwrap();
        assert_eq!(meta.entry_count, 2);
        assert_eq!(meta.duration, 360_000);
        assert_eq!(player.entry_metadata(NativeHandle(1), 1).unwrap().fields.title, "y");
        assert!(player.entry_metadata(NativeHandle(1), 2).is_err());
        assert_eq!(player.calls().entry_metadata, 2);
    }

    #[test]
    fn test_failure_injection() {
        let player = SimulatedPlayer::push();
        player.insert_playlist(NativeHandle(1), "A", vec![track("x"), track("y")]);
        player.fail_entry_at(NativeHandle(1), Some(1));
        assert!(matches!(
            player.entry_metadata(NativeHandle(1), 1),
            Err(MirrorError::NativeQueryFailed(..))
        ));
        player.fail_entry_at(NativeHandle(1), None);
        assert!(player.entry_metadata(NativeHandle(1), 1).is_ok());

        player.misreport_next_count(NativeHandle(1), 5);
        assert_eq!(player.playlist_metadata(NativeHandle(1)).unwrap().entry_count, 5);
        assert_eq!(player.playlist_metadata(NativeHandle(1)).unwrap().entry_count, 2);
    }

    #[test]
    fn test_entry_handles_are_optional() {
        let by_index = SimulatedPlayer::push();
        by_index.insert_playlist(NativeHandle(1), "A", vec![track("x")]);
        assert_eq!(by_index.entry_handle(NativeHandle(1), 0).unwrap(), None);

        let by_handle = SimulatedPlayer::push().with_entry_handles();
        by_handle.insert_playlist(NativeHandle(1), "A", vec![track("x")]);
        let handle = by_handle.entry_handle(NativeHandle(1), 0).unwrap();
        assert!(handle.is_some());
        assert_eq!(by_handle.entry_metadata(NativeHandle(1), 0).unwrap().handle, handle);
    }

    #[test]
    fn test_removal_clears_queue_and_active() {
        let player = SimulatedPlayer::polling(100);
        player.insert_playlist(NativeHandle(1), "A", vec![track("x")]);
        player.insert_playlist(NativeHandle(2), "B", vec![track("y")]);
        player.set_queue(vec![(NativeHandle(1), 0), (NativeHandle(2), 0)]);
        player.set_active(NativeHandle(1), Some(0));

        player.remove_playlist(NativeHandle(1));
        assert_eq!(player.queue().unwrap().len(), 1);
        assert_eq!(player.active_playlist().unwrap(), NativeHandle(2));
        assert!(!player.notify_queue());
    }
}
