//! Boundary with the native player.
//!
//! A [`NativeAdapter`] wraps one player generation's own API. The mirror only
//! ever calls it from reload workers and from sentinel resolution; the
//! adapter reports changes back through the [`NativeSink`] it receives in
//! [`NativeAdapter::subscribe`].

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::debug;

use crate::error::Result;
use crate::events::TranslationTable;
use crate::model::EntryFields;
use crate::reconciler::{Activity, Command};

/// Opaque native handle (pointer or native id). Only meaningful while the
/// player keeps the object alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.0)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativePlaylistRef {
    pub handle: NativeHandle,
    pub index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NativePlaylistMetadata {
    pub title: String,
    pub duration: i64,
    pub size: i64,
    pub entry_count: usize,
}

/// Entry as read from the player. Adapters that key entries by index leave
/// `handle` empty and the entry id becomes the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeEntry {
    pub handle: Option<NativeHandle>,
    pub fields: EntryFields,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeQueueItem {
    pub playlist: NativeHandle,
    pub index: usize,
}

/// How an adapter reports playlist changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchStrategy {
    /// The player tells what changed through the sink.
    Push,

    /// No change notifications: the catalog is re-checked periodically.
    Polling { interval_ms: u64 },
}

impl WatchStrategy {
    /// Returns the polling interval if this strategy involves polling.
    pub fn polling_interval(&self) -> Option<Duration> {
        match self {
            WatchStrategy::Polling { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            WatchStrategy::Push => None,
        }
    }
}

/// What to answer when "-1" is asked for and nothing is playing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SentinelFallback {
    #[default]
    None,
    FirstEntryOfActivePlaylist,
}

/// Native change flags for one playlist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChangeFlags(u32);

impl ChangeFlags {
    pub const NAME: ChangeFlags = ChangeFlags(1);
    pub const ENTRY_INFO: ChangeFlags = ChangeFlags(1 << 1);
    pub const STATISTICS: ChangeFlags = ChangeFlags(1 << 2);
    pub const CONTENT: ChangeFlags = ChangeFlags(1 << 3);

    pub const fn empty() -> Self {
        ChangeFlags(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        ChangeFlags(bits)
    }

    pub const fn contains(&self, other: ChangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: ChangeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangeFlags {
    type Output = ChangeFlags;

    fn bitor(self, rhs: ChangeFlags) -> ChangeFlags {
        ChangeFlags(self.0 | rhs.0)
    }
}

/// One player generation's API.
///
/// Every query may be slow and may fail; failures are reported as
/// `MirrorError::NativeQueryFailed`.
pub trait NativeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed for the adapter's lifetime.
    fn watch_strategy(&self) -> WatchStrategy;

    fn translation_table(&self) -> &TranslationTable;

    fn sentinel_fallback(&self) -> SentinelFallback {
        SentinelFallback::None
    }

    fn list_playlists(&self) -> Result<Vec<NativePlaylistRef>>;

    fn playlist_metadata(&self, playlist: NativeHandle) -> Result<NativePlaylistMetadata>;

    fn entry_metadata(&self, playlist: NativeHandle, index: usize) -> Result<NativeEntry>;

    /// Handle of the entry at `index`, for adapters keying entries by handle.
    fn entry_handle(&self, _playlist: NativeHandle, _index: usize) -> Result<Option<NativeHandle>> {
        Ok(None)
    }

    fn active_playlist(&self) -> Result<NativeHandle>;

    /// `None` when nothing is playing.
    fn active_entry_index(&self, playlist: NativeHandle) -> Result<Option<usize>>;

    fn queue(&self) -> Result<Vec<NativeQueueItem>> {
        Ok(Vec::new())
    }

    /// Starts delivering native notifications into `sink`. Polling adapters
    /// may keep the sink for player events only.
    fn subscribe(&self, sink: NativeSink) -> Result<()>;

    fn unsubscribe(&self);
}

/// Entry point for callbacks arriving on foreign threads.
///
/// Every method only posts a message to the reconciliation context; nothing
/// runs in place.
#[derive(Clone)]
pub struct NativeSink {
    commands: Sender<Command>,
    activity: Arc<Activity>,
}

impl NativeSink {
    pub(crate) fn new(commands: Sender<Command>, activity: Arc<Activity>) -> Self {
        Self { commands, activity }
    }

    fn post(&self, command: Command) {
        self.activity.posted();
        if self.commands.send(command).is_err() {
            self.activity.handled();
            debug!("Reconciliation context stopped, dropping native notification");
        }
    }

    pub fn playlist_added(&self, playlist: NativeHandle) {
        self.post(Command::PlaylistAdded(playlist));
    }

    pub fn playlist_removed(&self, playlist: NativeHandle) {
        self.post(Command::PlaylistRemoved(playlist));
    }

    pub fn playlist_changed(&self, playlist: NativeHandle, flags: ChangeFlags) {
        self.post(Command::PlaylistChanged(playlist, flags));
    }

    pub fn queue_changed(&self) {
        self.post(Command::QueueChanged);
    }

    /// "Something changed, go check": re-reads the playlist catalog.
    pub fn catalog_changed(&self) {
        self.post(Command::CatalogChanged);
    }

    pub fn player_event(&self, code: u32, param: i64) {
        self.post(Command::PlayerEvent { code, param });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_flags() {
        let flags = ChangeFlags::NAME | ChangeFlags::CONTENT;
        assert!(flags.contains(ChangeFlags::NAME));
        assert!(flags.intersects(ChangeFlags::CONTENT | ChangeFlags::ENTRY_INFO));
        assert!(!flags.contains(ChangeFlags::STATISTICS));
        assert!(ChangeFlags::empty().is_empty());
        assert_eq!(ChangeFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn test_watch_strategy_polling_interval() {
        let polling = WatchStrategy::Polling { interval_ms: 5000 };
        assert_eq!(polling.polling_interval(), Some(Duration::from_secs(5)));
        assert_eq!(WatchStrategy::Push.polling_interval(), None);
    }

    #[test]
    fn test_handle_formatting() {
        assert_eq!(NativeHandle(0xa1).to_string(), "0xa1");
        assert_eq!(format!("{:?}", NativeHandle(0xa1)), "NativeHandle(0xa1)");
    }
}
