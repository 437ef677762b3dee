#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use playermirror::simulated::SimulatedPlayer;
use playermirror::{EventKind, MirrorSettings, NativeHandle, PlayerMirror, PlaylistId, SemanticEvent};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn settings(min_reload_interval_ms: u64) -> MirrorSettings {
    MirrorSettings::default()
        .with_min_reload_interval(Duration::from_millis(min_reload_interval_ms))
        .with_reload_workers(2)
}

/// Starts a mirror and waits for the initial load.
pub fn start(player: &Arc<SimulatedPlayer>, settings: MirrorSettings) -> PlayerMirror {
    let mirror = PlayerMirror::start(player.clone(), settings).unwrap();
    assert!(mirror.wait_idle(WAIT), "initial load did not settle");
    mirror
}

pub fn id_of(mirror: &PlayerMirror, handle: NativeHandle) -> PlaylistId {
    mirror
        .resolver()
        .lookup_playlist(handle)
        .unwrap_or_else(|| panic!("{:?} is not mirrored", handle))
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Records every event fired by `mirror`.
pub fn record_events(mirror: &PlayerMirror) -> Arc<Mutex<Vec<SemanticEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    mirror
        .listeners()
        .register_listener(move |event| sink.lock().push(*event));
    events
}

pub fn content_changes(events: &Mutex<Vec<SemanticEvent>>, playlist: Option<PlaylistId>) -> usize {
    events
        .lock()
        .iter()
        .filter(|e| e.kind == EventKind::PlaylistsContentChanged && e.playlist_id == playlist)
        .count()
}
