//! Engine facade: wires an adapter to the resolver, the repository, the
//! listener registry and the reconciliation context.

use std::sync::Arc;
use std::time::Duration;

use mirrorconfig::Config;
use tracing::{debug, info};

use crate::adapter::NativeAdapter;
use crate::config_ext::{MirrorConfigExt, MirrorSettings};
use crate::error::Result;
use crate::events::ListenerRegistry;
use crate::format::format_entry_title;
use crate::identity::IdentityResolver;
use crate::model::{Entry, EntryField, EntryId, FieldValue, Playlist, PlaylistField, PlaylistId, QueueEntry};
use crate::query::{EntryPage, EntryQuery};
use crate::reconciler::{Command, ContextHandle, ContextOptions, spawn_context};
use crate::repository::Repository;

pub struct PlayerMirror {
    adapter: Arc<dyn NativeAdapter>,
    resolver: Arc<IdentityResolver>,
    repository: Arc<Repository>,
    listeners: Arc<ListenerRegistry>,
    context: ContextHandle,
}

impl PlayerMirror {
    /// Starts the engine and schedules the initial load of every playlist
    /// and of the queue. Returns once the adapter is subscribed; use
    /// [`wait_idle`](Self::wait_idle) to wait for the load itself.
    pub fn start(adapter: Arc<dyn NativeAdapter>, settings: MirrorSettings) -> Result<Self> {
        let fallback = settings
            .sentinel_fallback
            .unwrap_or_else(|| adapter.sentinel_fallback());
        let poll_interval = adapter
            .watch_strategy()
            .polling_interval()
            .map(|native| settings.poll_interval.unwrap_or(native));

        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&adapter), fallback));
        let repository = Arc::new(Repository::new());
        let listeners = Arc::new(ListenerRegistry::new());

        let context = spawn_context(
            Arc::clone(&adapter),
            Arc::clone(&resolver),
            Arc::clone(&repository),
            Arc::clone(&listeners),
            ContextOptions {
                min_reload_interval: settings.min_reload_interval,
                poll_interval,
                reload_workers: settings.reload_workers,
            },
        )?;

        if let Err(err) = adapter.subscribe(context.sink()) {
            context.shutdown();
            return Err(err);
        }

        info!(
            adapter = adapter.name(),
            polling_ms = poll_interval.map(|p| p.as_millis() as u64),
            sentinel_fallback = ?fallback,
            "Player mirror started"
        );

        let mirror = Self {
            adapter,
            resolver,
            repository,
            listeners,
            context,
        };
        mirror.request_full_reload()?;
        Ok(mirror)
    }

    /// Starts the engine with the `mirror:` settings of `config`.
    pub fn from_config(adapter: Arc<dyn NativeAdapter>, config: &Config) -> Result<Self> {
        let settings = config.mirror_settings()?;
        Self::start(adapter, settings)
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn adapter(&self) -> &Arc<dyn NativeAdapter> {
        &self.adapter
    }

    /// Re-enumerates the catalog: every playlist and the queue are re-read.
    pub fn request_full_reload(&self) -> Result<()> {
        self.context.post(Command::CatalogChanged)
    }

    /// Waits until every notification posted so far has been reconciled.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.context.wait_idle(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    pub fn shutdown(&self) {
        if !self.context.is_running() {
            return;
        }
        self.adapter.unsubscribe();
        self.context.shutdown();
        info!(adapter = self.adapter.name(), "Player mirror stopped");
    }

    /// `-1` selects the active playlist.
    pub fn playlist(&self, id: i64) -> Result<Playlist> {
        let id = self.resolver.resolve_playlist(PlaylistId(id))?;
        self.repository.get_playlist(id)
    }

    pub fn playlist_field(&self, id: i64, field: &str) -> Result<FieldValue> {
        let field: PlaylistField = field.parse()?;
        let id = self.resolver.resolve_playlist(PlaylistId(id))?;
        self.repository.get_playlist_field(id, field)
    }

    /// Either id may be `-1`; an active entry only exists in the active
    /// playlist.
    pub fn entry(&self, playlist: i64, entry: i64) -> Result<Entry> {
        let (playlist, entry) = self.resolver.resolve_entry(PlaylistId(playlist), EntryId(entry))?;
        self.repository.get_entry(playlist, entry)
    }

    pub fn entry_field(&self, playlist: i64, entry: i64, field: &str) -> Result<FieldValue> {
        let field: EntryField = field.parse()?;
        let (playlist, entry) = self.resolver.resolve_entry(PlaylistId(playlist), EntryId(entry))?;
        self.repository.get_entry_field(playlist, entry, field)
    }

    pub fn formatted_title(&self, playlist: i64, entry: i64, format: &str) -> Result<String> {
        let entry = self.entry(playlist, entry)?;
        format_entry_title(&entry, format)
    }

    pub fn query_entries(&self, playlist: i64, query: &EntryQuery) -> Result<EntryPage> {
        let id = self.resolver.resolve_playlist(PlaylistId(playlist))?;
        self.repository.query_entries(id, query)
    }

    pub fn list_playlists(&self) -> Vec<Playlist> {
        self.repository.list_playlists()
    }

    pub fn list_queue(&self) -> Vec<QueueEntry> {
        self.repository.list_queue()
    }
}

impl Drop for PlayerMirror {
    fn drop(&mut self) {
        if self.context.is_running() {
            debug!("Player mirror dropped while running, shutting down");
            self.shutdown();
        }
    }
}
