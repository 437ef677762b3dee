//! # playermirror - stable-id mirror of a media player's playlists
//!
//! This crate keeps an in-process copy of an external player's playlists,
//! entries and playback queue, addressed by stable integer ids, and keeps it
//! up to date as the player changes behind its back:
//! - players with change notifications push them through a [`NativeSink`]
//! - players without are polled, and content fingerprints avoid rewriting
//!   what did not change
//! - bursts of change signals are debounced into one reload per playlist
//! - native event codes are translated into a small set of
//!   [`SemanticEvent`]s fanned out to listeners
//!
//! # Architecture
//!
//! - **NativeAdapter**: one player generation's API (implemented outside
//!   this crate, [`simulated::SimulatedPlayer`] is an in-memory one)
//! - **IdentityResolver**: native handles to stable ids, `-1` sentinels
//! - **Repository**: the mirror, readable from any thread
//! - **ReloadScheduler**: per-playlist debounce and polling deadlines
//! - **Reconciliation context**: the one thread writing the repository and
//!   firing listeners, fed by reload workers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use playermirror::{MirrorSettings, NativeHandle, PlayerMirror};
//! use playermirror::simulated::{SimulatedPlayer, track};
//!
//! let player = Arc::new(SimulatedPlayer::push());
//! player.insert_playlist(NativeHandle(0xa1), "Morning", vec![track("intro")]);
//!
//! let mirror = PlayerMirror::start(player.clone(), MirrorSettings::default())?;
//! mirror.listeners().register_listener(|event| println!("{:?}", event));
//! mirror.wait_idle(Duration::from_secs(1));
//!
//! for playlist in mirror.list_playlists() {
//!     println!("{} ({} entries)", playlist.title, playlist.entry_count);
//! }
//! mirror.shutdown();
//! # Ok::<(), playermirror::MirrorError>(())
//! ```

pub mod adapter;
pub mod config_ext;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod format;
pub mod identity;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod query;
mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod simulated;

pub use adapter::{
    ChangeFlags, NativeAdapter, NativeEntry, NativeHandle, NativePlaylistMetadata, NativePlaylistRef,
    NativeQueueItem, NativeSink, SentinelFallback, WatchStrategy,
};
pub use config_ext::{MirrorConfigExt, MirrorSettings};
pub use error::{MirrorError, Result};
pub use events::{EventKind, ListenerRegistry, SemanticEvent, TranslationTable};
pub use fingerprint::Fingerprint;
pub use format::format_entry_title;
pub use identity::{IdentityResolver, SentinelKind};
pub use mirror::PlayerMirror;
pub use model::{
    ACTIVE_SENTINEL, Entry, EntryField, EntryFields, EntryId, FieldValue, Playlist, PlaylistField, PlaylistId,
    QueueEntry, SourceKind,
};
pub use query::{EntryPage, EntryQuery, SortDirection, SortKey};
pub use repository::{CommitOutcome, Repository, RepositoryStats};
pub use scheduler::{ReloadScheduler, ReloadScope, ReloadTarget};
