//! The reconciliation context.
//!
//! One thread owns the [`ReloadScheduler`], applies every repository write
//! and fires every listener. Native notifications reach it as [`Command`]s
//! posted by the [`NativeSink`]. Adapter queries run on a small pool of
//! reload workers; their results come back as [`JobOutcome`]s and are only
//! committed by the context.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::adapter::{ChangeFlags, NativeAdapter, NativeHandle, NativePlaylistRef, NativeSink};
use crate::error::{MirrorError, Result};
use crate::events::{ListenerRegistry, SemanticEvent};
use crate::fingerprint::{Fingerprint, PlaylistMetadataFields, fingerprint_entry, fingerprint_playlist, fingerprint_queue};
use crate::identity::IdentityResolver;
use crate::model::{Entry, EntryId, Playlist, PlaylistId, QueueEntry};
use crate::repository::{CommitOutcome, Repository};
use crate::scheduler::{Decision, ReloadScheduler, ReloadScope, ReloadTarget};

/// Longest the context sleeps when no deadline is pending.
const IDLE_WAIT_MILLIS: u64 = 250;

/// Messages handled by the reconciliation context.
#[derive(Debug)]
pub(crate) enum Command {
    PlaylistAdded(NativeHandle),
    PlaylistRemoved(NativeHandle),
    PlaylistChanged(NativeHandle, ChangeFlags),
    QueueChanged,
    CatalogChanged,
    PlayerEvent { code: u32, param: i64 },
    Shutdown,
}

#[derive(Default)]
struct ActivityState {
    outstanding: usize,
    deferred: bool,
}

/// Counts posted commands and running jobs, so callers can wait until the
/// mirror has caught up with everything posted so far.
#[derive(Default)]
pub(crate) struct Activity {
    state: Mutex<ActivityState>,
    idle: Condvar,
}

impl Activity {
    pub(crate) fn posted(&self) {
        self.state.lock().outstanding += 1;
    }

    pub(crate) fn handled(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 && !state.deferred {
            self.idle.notify_all();
        }
    }

    /// Marks whether a debounced reload is still waiting for its timer.
    fn set_deferred(&self, deferred: bool) {
        let mut state = self.state.lock();
        state.deferred = deferred;
        if state.outstanding == 0 && !deferred {
            self.idle.notify_all();
        }
    }

    /// Blocks until nothing is queued, running or debounced. Returns false
    /// on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.outstanding > 0 || state.deferred {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.outstanding == 0 && !state.deferred;
            }
        }
        true
    }
}

#[derive(Debug)]
enum Job {
    Playlist {
        handle: NativeHandle,
        id: PlaylistId,
        scope: ReloadScope,
        revision: u64,
    },
    Queue {
        revision: u64,
    },
    Catalog,
}

enum PlaylistReload {
    Loaded {
        record: Playlist,
        entries: Option<Vec<Entry>>,
        live_handles: Vec<NativeHandle>,
    },
    /// The player no longer lists the playlist.
    Gone,
}

struct QueueReload {
    entries: Vec<QueueEntry>,
    fingerprint: Fingerprint,
}

enum JobOutcome {
    Playlist {
        handle: NativeHandle,
        id: PlaylistId,
        revision: u64,
        result: Result<PlaylistReload>,
    },
    Queue {
        revision: u64,
        result: Result<QueueReload>,
    },
    Catalog {
        result: Result<Vec<NativePlaylistRef>>,
    },
}

/// Timing and sizing of the context.
#[derive(Clone, Debug)]
pub(crate) struct ContextOptions {
    pub min_reload_interval: Duration,
    pub poll_interval: Option<Duration>,
    pub reload_workers: usize,
}

/// Queries the player on behalf of the context. Workers never write to the
/// repository.
#[derive(Clone)]
struct ReloadWorker {
    adapter: Arc<dyn NativeAdapter>,
    resolver: Arc<IdentityResolver>,
    repository: Arc<Repository>,
}

impl ReloadWorker {
    fn run(self, jobs: Receiver<Job>, outcomes: Sender<JobOutcome>) {
        for job in jobs.iter() {
            trace!(?job, "Reload job picked up");
            let outcome = match job {
                Job::Playlist {
                    handle,
                    id,
                    scope,
                    revision,
                } => JobOutcome::Playlist {
                    handle,
                    id,
                    revision,
                    result: self.reload_playlist(handle, id, scope),
                },
                Job::Queue { revision } => JobOutcome::Queue {
                    revision,
                    result: self.reload_queue(),
                },
                Job::Catalog => JobOutcome::Catalog {
                    result: self.adapter.list_playlists(),
                },
            };
            if outcomes.send(outcome).is_err() {
                debug!("Reconciliation context gone, discarding reload result");
            }
        }
    }

    fn entry_id(&self, playlist: PlaylistId, handle: Option<NativeHandle>, index: usize) -> EntryId {
        match handle {
            Some(handle) => self.resolver.to_stable_entry_id(playlist, handle),
            None => EntryId(index as i64),
        }
    }

    fn fetch_entries(&self, handle: NativeHandle, id: PlaylistId, count: usize) -> Result<(Vec<Entry>, Vec<NativeHandle>)> {
        let mut entries = Vec::with_capacity(count);
        let mut live_handles = Vec::new();
        for index in 0..count {
            let native = self.adapter.entry_metadata(handle, index)?;
            live_handles.extend(native.handle);
            let fields = native.fields.normalized();
            entries.push(Entry {
                playlist_id: id,
                entry_id: self.entry_id(id, native.handle, index),
                order_index: index,
                fingerprint: fingerprint_entry(&fields),
                fields,
            });
        }
        Ok((entries, live_handles))
    }

    fn reload_playlist(&self, handle: NativeHandle, id: PlaylistId, scope: ReloadScope) -> Result<PlaylistReload> {
        let Some(position_index) = self
            .adapter
            .list_playlists()?
            .into_iter()
            .find(|r| r.handle == handle)
            .map(|r| r.index)
        else {
            return Ok(PlaylistReload::Gone);
        };

        let metadata = self.adapter.playlist_metadata(handle)?;
        let stored = self.repository.entries(id).ok();

        // a metadata reload is only enough when the entry count still matches
        let keep_entries = scope == ReloadScope::Metadata
            && stored
                .as_ref()
                .is_some_and(|entries| entries.len() == metadata.entry_count);

        let (metadata, fresh, live_handles) = if keep_entries {
            (metadata, None, Vec::new())
        } else {
            let (entries, live_handles) = self.fetch_entries(handle, id, metadata.entry_count)?;
            let check = self.adapter.playlist_metadata(handle)?;
            if check.entry_count != entries.len() {
                return Err(MirrorError::inconsistent(format!(
                    "playlist {} reports {} entries, {} fetched",
                    id,
                    check.entry_count,
                    entries.len()
                )));
            }
            (check, Some(entries), live_handles)
        };

        let entry_fingerprints: Vec<Fingerprint> = match (&fresh, &stored) {
            (Some(entries), _) => entries.iter().map(|e| e.fingerprint).collect(),
            (None, Some(entries)) => entries.iter().map(|e| e.fingerprint).collect(),
            (None, None) => Vec::new(),
        };
        let fingerprint = fingerprint_playlist(
            entry_fingerprints,
            PlaylistMetadataFields {
                title: &metadata.title,
                duration: metadata.duration,
                size: metadata.size,
                entry_count: metadata.entry_count,
                position_index,
            },
        );

        Ok(PlaylistReload::Loaded {
            record: Playlist {
                id,
                title: metadata.title,
                entry_count: metadata.entry_count,
                duration: metadata.duration,
                size: metadata.size,
                position_index,
                fingerprint: Some(fingerprint),
            },
            entries: fresh,
            live_handles,
        })
    }

    fn reload_queue(&self) -> Result<QueueReload> {
        let items = self.adapter.queue()?;
        let mut entries: Vec<QueueEntry> = Vec::with_capacity(items.len());

        for item in items {
            let Some(playlist_id) = self.resolver.lookup_playlist(item.playlist) else {
                debug!(handle = %item.playlist, "Queued entry of an unknown playlist skipped");
                continue;
            };

            let stored = self
                .repository
                .entries(playlist_id)
                .ok()
                .and_then(|stored| stored.get(item.index).cloned());
            let (entry_id, fields, fingerprint) = match stored {
                Some(entry) => (entry.entry_id, entry.fields, entry.fingerprint),
                None => {
                    let native = self.adapter.entry_metadata(item.playlist, item.index)?;
                    let fields = native.fields.normalized();
                    let fingerprint = fingerprint_entry(&fields);
                    (self.entry_id(playlist_id, native.handle, item.index), fields, fingerprint)
                }
            };

            entries.push(QueueEntry {
                queue_index: entries.len(),
                playlist_id,
                entry_id,
                fields,
                fingerprint,
            });
        }

        let fingerprint = fingerprint_queue(
            entries
                .iter()
                .map(|q| (q.playlist_id.0, q.entry_id.0, q.fingerprint)),
        );
        Ok(QueueReload { entries, fingerprint })
    }
}

#[derive(Default)]
struct CatalogState {
    in_flight: bool,
    again: bool,
}

struct ReconciliationContext {
    adapter: Arc<dyn NativeAdapter>,
    resolver: Arc<IdentityResolver>,
    repository: Arc<Repository>,
    listeners: Arc<ListenerRegistry>,
    scheduler: ReloadScheduler,
    activity: Arc<Activity>,
    jobs: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    catalog: CatalogState,
}

impl ReconciliationContext {
    fn run(mut self, commands: Receiver<Command>, outcomes: Receiver<JobOutcome>) {
        info!(
            adapter = self.adapter.name(),
            workers = self.workers.len(),
            "Reconciliation context started"
        );

        loop {
            let now = Instant::now();
            let timeout = self
                .scheduler
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(IDLE_WAIT_MILLIS))
                .min(Duration::from_millis(IDLE_WAIT_MILLIS));

            select! {
                recv(commands) -> msg => {
                    let Ok(command) = msg else { break };
                    if matches!(command, Command::Shutdown) {
                        self.activity.handled();
                        break;
                    }
                    self.handle_command(command);
                    self.settle();
                }
                recv(outcomes) -> msg => {
                    let Ok(outcome) = msg else { break };
                    self.handle_outcome(outcome);
                    self.settle();
                }
                default(timeout) => {}
            }

            self.run_timers(Instant::now());
        }

        self.stop();
    }

    /// Publishes the debounce state, then accounts for one handled message.
    fn settle(&mut self) {
        self.activity.set_deferred(self.scheduler.has_pending());
        self.activity.handled();
    }

    fn run_timers(&mut self, now: Instant) {
        for due in self.scheduler.due(now) {
            self.start(due.target, due.scope, due.revision);
        }
        if self.scheduler.poll_due(now) {
            debug!("Polling the player catalog");
            self.check_catalog();
        }
        self.activity.set_deferred(self.scheduler.has_pending());
    }

    fn stop(self) {
        let ReconciliationContext {
            repository,
            jobs,
            workers,
            ..
        } = self;
        drop(jobs);
        for worker in workers {
            if worker.join().is_err() {
                warn!("A reload worker panicked");
            }
        }
        info!(stats = ?repository.stats(), "Reconciliation context stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::PlaylistAdded(handle) => {
                let id = self.resolver.to_stable_id(handle);
                debug!(playlist = id.0, %handle, "Playlist added");
                self.request(ReloadTarget::Playlist(id), ReloadScope::Entries, now);
            }
            Command::PlaylistRemoved(handle) => self.remove_playlist(handle, now),
            Command::PlaylistChanged(handle, flags) => {
                let Some(scope) = ReloadScope::from_flags(flags) else {
                    debug!(%handle, flags = flags.bits(), "Change without reload scope ignored");
                    return;
                };
                let id = self.resolver.to_stable_id(handle);
                self.request(ReloadTarget::Playlist(id), scope, now);
            }
            Command::QueueChanged => self.request(ReloadTarget::Queue, ReloadScope::Entries, now),
            Command::CatalogChanged => self.check_catalog(),
            Command::PlayerEvent { code, param } => {
                if let Some(event) = self.adapter.translation_table().translate(code, param) {
                    self.listeners.emit(event);
                }
            }
            Command::Shutdown => {}
        }
    }

    fn request(&mut self, target: ReloadTarget, scope: ReloadScope, now: Instant) {
        let decision = self.scheduler.request(target, scope, now);
        self.apply(target, decision);
    }

    fn apply(&mut self, target: ReloadTarget, decision: Decision) {
        match decision {
            Decision::Start { scope, revision } => self.start(target, scope, revision),
            Decision::Deferred { due } => {
                let delay = due.saturating_duration_since(Instant::now());
                trace!(?target, ?delay, "Reload debounced");
            }
            Decision::Merged => {}
        }
    }

    fn start(&mut self, target: ReloadTarget, scope: ReloadScope, revision: u64) {
        let job = match target {
            ReloadTarget::Playlist(id) => match self.resolver.to_native_handle(id) {
                Ok(handle) => Job::Playlist {
                    handle,
                    id,
                    scope,
                    revision,
                },
                Err(_) => {
                    debug!(playlist = id.0, "Reload of a released playlist dropped");
                    self.scheduler.forget(target);
                    return;
                }
            },
            ReloadTarget::Queue => Job::Queue { revision },
        };
        self.dispatch(job);
    }

    fn dispatch(&mut self, job: Job) {
        self.activity.posted();
        if self.jobs.send(job).is_err() {
            self.activity.handled();
            warn!("No reload worker left, job dropped");
        }
    }

    fn check_catalog(&mut self) {
        if self.catalog.in_flight {
            self.catalog.again = true;
            return;
        }
        self.catalog.in_flight = true;
        self.dispatch(Job::Catalog);
    }

    fn notify(&self, event: SemanticEvent) {
        self.listeners.emit(event);
    }

    fn remove_playlist(&mut self, handle: NativeHandle, now: Instant) {
        let Some(id) = self.resolver.release_playlist(handle) else {
            debug!(%handle, "Removal of an unknown playlist ignored");
            return;
        };
        self.scheduler.forget(ReloadTarget::Playlist(id));
        match self.repository.remove_playlist(id) {
            Ok(()) => {
                info!(playlist = id.0, "Playlist removed");
                self.notify(SemanticEvent::content_changed(Some(id)));
            }
            Err(err) => debug!(playlist = id.0, error = %err, "Removed playlist was never loaded"),
        }
        self.request(ReloadTarget::Queue, ReloadScope::Entries, now);
    }

    fn handle_outcome(&mut self, outcome: JobOutcome) {
        let now = Instant::now();
        match outcome {
            JobOutcome::Playlist {
                handle,
                id,
                revision,
                result,
            } => {
                let target = ReloadTarget::Playlist(id);
                if !self.scheduler.is_current(target, revision) {
                    debug!(playlist = id.0, revision, "Outdated reload result discarded");
                    return;
                }
                let succeeded = match result {
                    Ok(PlaylistReload::Gone) => {
                        self.remove_playlist(handle, now);
                        return;
                    }
                    Ok(PlaylistReload::Loaded {
                        record,
                        entries,
                        live_handles,
                    }) => {
                        let fetched_entries = entries.is_some();
                        match self.repository.commit_reload(record, entries, revision) {
                            CommitOutcome::Written => {
                                debug!(playlist = id.0, "Playlist reloaded");
                                self.notify(SemanticEvent::content_changed(Some(id)));
                            }
                            CommitOutcome::Unchanged => trace!(playlist = id.0, "Playlist unchanged"),
                            CommitOutcome::Stale => debug!(playlist = id.0, revision, "Stale reload not committed"),
                        }
                        if fetched_entries {
                            self.resolver.retain_entry_handles(id, &live_handles);
                        }
                        true
                    }
                    Err(err) => {
                        warn!(playlist = id.0, error = %err, "Playlist reload failed, keeping previous content");
                        false
                    }
                };
                if let Some(decision) = self.scheduler.finish(target, now, succeeded) {
                    self.apply(target, decision);
                }
            }
            JobOutcome::Queue { revision, result } => {
                let target = ReloadTarget::Queue;
                if !self.scheduler.is_current(target, revision) {
                    debug!(revision, "Outdated queue result discarded");
                    return;
                }
                let succeeded = match result {
                    Ok(QueueReload { entries, fingerprint }) => {
                        if self.repository.commit_queue(entries, fingerprint) {
                            debug!("Queue reloaded");
                            self.notify(SemanticEvent::content_changed(None));
                        }
                        true
                    }
                    Err(err) => {
                        warn!(error = %err, "Queue reload failed, keeping previous content");
                        false
                    }
                };
                if let Some(decision) = self.scheduler.finish(target, now, succeeded) {
                    self.apply(target, decision);
                }
            }
            JobOutcome::Catalog { result } => {
                self.catalog.in_flight = false;
                match result {
                    Ok(refs) => self.reconcile_catalog(refs, now),
                    Err(err) => warn!(error = %err, "Playlist enumeration failed"),
                }
                if std::mem::take(&mut self.catalog.again) {
                    self.check_catalog();
                }
            }
        }
    }

    /// Loads new playlists, re-checks known ones, drops vanished ones and
    /// re-reads the queue.
    fn reconcile_catalog(&mut self, refs: Vec<NativePlaylistRef>, now: Instant) {
        let live: HashSet<NativeHandle> = refs.iter().map(|r| r.handle).collect();
        for (_, handle) in self.resolver.known_playlists() {
            if !live.contains(&handle) {
                self.remove_playlist(handle, now);
            }
        }

        for r in refs {
            if self.resolver.lookup_playlist(r.handle).is_none() {
                debug!(handle = %r.handle, index = r.index, "New playlist found");
            }
            let id = self.resolver.to_stable_id(r.handle);
            self.request(ReloadTarget::Playlist(id), ReloadScope::Entries, now);
        }

        self.request(ReloadTarget::Queue, ReloadScope::Entries, now);
    }
}

/// Running context: its command channel and thread.
pub(crate) struct ContextHandle {
    commands: Sender<Command>,
    activity: Arc<Activity>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ContextHandle {
    pub(crate) fn sink(&self) -> NativeSink {
        NativeSink::new(self.commands.clone(), Arc::clone(&self.activity))
    }

    pub(crate) fn post(&self, command: Command) -> Result<()> {
        self.activity.posted();
        self.commands.send(command).map_err(|_| {
            self.activity.handled();
            MirrorError::ContextStopped
        })
    }

    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        self.activity.wait_idle(timeout)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Stops the context and joins it. Later calls do nothing.
    pub(crate) fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if self.post(Command::Shutdown).is_err() {
            debug!("Reconciliation context already stopped");
        }
        if thread.join().is_err() {
            warn!("Reconciliation context panicked");
        }
    }
}

/// Starts the reload workers and the context thread.
pub(crate) fn spawn_context(
    adapter: Arc<dyn NativeAdapter>,
    resolver: Arc<IdentityResolver>,
    repository: Arc<Repository>,
    listeners: Arc<ListenerRegistry>,
    options: ContextOptions,
) -> Result<ContextHandle> {
    let (commands_tx, commands_rx) = unbounded::<Command>();
    let (jobs_tx, jobs_rx) = unbounded::<Job>();
    let (outcomes_tx, outcomes_rx) = unbounded::<JobOutcome>();
    let activity = Arc::new(Activity::default());

    let worker = ReloadWorker {
        adapter: Arc::clone(&adapter),
        resolver: Arc::clone(&resolver),
        repository: Arc::clone(&repository),
    };
    let mut workers = Vec::with_capacity(options.reload_workers.max(1));
    for index in 0..options.reload_workers.max(1) {
        let worker = worker.clone();
        let jobs = jobs_rx.clone();
        let outcomes = outcomes_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("playermirror-reload-{}", index))
            .spawn(move || worker.run(jobs, outcomes))
            .map_err(|err| MirrorError::Other(anyhow::Error::new(err).context("Failed to spawn reload worker")))?;
        workers.push(handle);
    }
    drop(outcomes_tx);

    let context = ReconciliationContext {
        scheduler: ReloadScheduler::new(options.min_reload_interval, options.poll_interval, Instant::now()),
        adapter,
        resolver,
        repository,
        listeners,
        activity: Arc::clone(&activity),
        jobs: jobs_tx,
        workers,
        catalog: CatalogState::default(),
    };

    let thread = thread::Builder::new()
        .name("playermirror-context".into())
        .spawn(move || context.run(commands_rx, outcomes_rx))
        .map_err(|err| MirrorError::Other(anyhow::Error::new(err).context("Failed to spawn reconciliation context")))?;

    Ok(ContextHandle {
        commands: commands_tx,
        activity,
        thread: Mutex::new(Some(thread)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_waits_for_outstanding_work() {
        let activity = Arc::new(Activity::default());
        assert!(activity.wait_idle(Duration::from_millis(1)));

        activity.posted();
        assert!(!activity.wait_idle(Duration::from_millis(20)));

        let waiter = {
            let activity = Arc::clone(&activity);
            thread::spawn(move || activity.wait_idle(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        activity.handled();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_activity_counts_debounced_work() {
        let activity = Activity::default();
        activity.set_deferred(true);
        assert!(!activity.wait_idle(Duration::from_millis(10)));
        activity.set_deferred(false);
        assert!(activity.wait_idle(Duration::from_millis(10)));
    }
}
