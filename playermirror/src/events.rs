//! Semantic events and their fan-out.
//!
//! Each adapter brings a [`TranslationTable`] turning its native
//! notification codes into the small fixed [`EventKind`] set. Translated
//! events are fired by the reconciliation context through the
//! [`ListenerRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::model::{EntryId, PlaylistId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    PlayerStateChanged,
    TrackChanged,
    VolumeChanged,
    MuteChanged,
    ShuffleChanged,
    RepeatChanged,
    TrackPositionChanged,
    PlaylistsContentChanged,
    EqualizerChanged,
    RadioCaptureChanged,
    PlayerQuitting,
}

/// Event delivered to listeners, optionally naming what it is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SemanticEvent {
    pub kind: EventKind,
    pub playlist_id: Option<PlaylistId>,
    pub entry_id: Option<EntryId>,
}

impl SemanticEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            playlist_id: None,
            entry_id: None,
        }
    }

    pub fn for_playlist(kind: EventKind, playlist_id: PlaylistId) -> Self {
        Self {
            kind,
            playlist_id: Some(playlist_id),
            entry_id: None,
        }
    }

    /// `PlaylistsContentChanged` for one playlist, or for the queue when
    /// `playlist_id` is `None`.
    pub fn content_changed(playlist_id: Option<PlaylistId>) -> Self {
        Self {
            kind: EventKind::PlaylistsContentChanged,
            playlist_id,
            entry_id: None,
        }
    }
}

/// Native notification codes of the stock tables.
pub mod codes {
    /// Players reporting through a registered callback.
    pub mod callback {
        pub const STATUS_CHANGE: u32 = 1;
        pub const PLAY_FILE: u32 = 2;
        pub const INFO_UPDATE: u32 = 5;
        pub const PLAYER_STATE: u32 = 11;
        pub const EFFECT_CHANGED: u32 = 12;
        pub const EQ_CHANGED: u32 = 13;
        pub const TRACK_POS_CHANGED: u32 = 14;

        /// Parameter of `STATUS_CHANGE`.
        pub mod status {
            pub const SHUFFLE: i64 = 1;
            pub const REPEAT: i64 = 2;
            pub const VOLUME: i64 = 3;
            pub const MUTE: i64 = 4;
            pub const POSITION: i64 = 5;
            pub const RADIO_CAPTURE: i64 = 6;
        }
    }

    /// Players posting window messages.
    pub mod message {
        pub const CMD_QUIT: u32 = 9;

        pub const EVENT_BASE: u32 = 0x2000;
        pub const EVENT_STREAM_START: u32 = EVENT_BASE + 3;
        pub const EVENT_PLAYER_STATE: u32 = EVENT_BASE + 6;
        pub const EVENT_PROPERTY_VALUE: u32 = EVENT_BASE + 7;

        /// Parameter of `EVENT_PROPERTY_VALUE`.
        pub mod property {
            pub const PROPERTY_BASE: i64 = 0x1000;
            pub const VOLUME: i64 = PROPERTY_BASE + 1;
            pub const MUTE: i64 = PROPERTY_BASE + 2;
            pub const EQUALIZER: i64 = PROPERTY_BASE + 14;
            pub const EQUALIZER_BAND: i64 = PROPERTY_BASE + 15;
            pub const PLAYER_POSITION: i64 = PROPERTY_BASE + 17;
            pub const REPEAT: i64 = PROPERTY_BASE + 20;
            pub const SHUFFLE: i64 = PROPERTY_BASE + 21;
            pub const RADIOCAP: i64 = PROPERTY_BASE + 29;
        }
    }
}

#[derive(Clone, Debug)]
enum Mapping {
    Fixed(EventKind),
    ByParam(HashMap<i64, EventKind>),
}

/// Native `(code, param)` to semantic event mapping of one adapter.
#[derive(Clone, Debug, Default)]
pub struct TranslationTable {
    name: String,
    mappings: HashMap<u32, Mapping>,
}

impl TranslationTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mappings: HashMap::new(),
        }
    }

    /// Maps every occurrence of `code` to `kind`.
    pub fn map(mut self, code: u32, kind: EventKind) -> Self {
        self.mappings.insert(code, Mapping::Fixed(kind));
        self
    }

    /// Maps `code` to `kind` only when it carries `param`.
    pub fn map_param(mut self, code: u32, param: i64, kind: EventKind) -> Self {
        if let Some(Mapping::ByParam(by_param)) = self.mappings.get_mut(&code) {
            by_param.insert(param, kind);
        } else {
            // replaces a fixed mapping of the same code
            let mut by_param = HashMap::new();
            by_param.insert(param, kind);
            self.mappings.insert(code, Mapping::ByParam(by_param));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn translate(&self, code: u32, param: i64) -> Option<SemanticEvent> {
        let kind = match self.mappings.get(&code) {
            Some(Mapping::Fixed(kind)) => Some(*kind),
            Some(Mapping::ByParam(by_param)) => by_param.get(&param).copied(),
            None => None,
        };
        if kind.is_none() {
            debug!(table = %self.name, code, param, "Unmapped native event code dropped");
        }
        kind.map(SemanticEvent::new)
    }

    /// Table of players reporting through a registered callback.
    pub fn callback_generation() -> Self {
        use codes::callback::*;

        // EFFECT_CHANGED has no semantic counterpart
        TranslationTable::new("callback")
            .map(TRACK_POS_CHANGED, EventKind::TrackPositionChanged)
            .map(PLAY_FILE, EventKind::TrackChanged)
            .map(INFO_UPDATE, EventKind::TrackChanged)
            .map(PLAYER_STATE, EventKind::PlayerStateChanged)
            .map(EQ_CHANGED, EventKind::EqualizerChanged)
            .map_param(STATUS_CHANGE, status::SHUFFLE, EventKind::ShuffleChanged)
            .map_param(STATUS_CHANGE, status::REPEAT, EventKind::RepeatChanged)
            .map_param(STATUS_CHANGE, status::VOLUME, EventKind::VolumeChanged)
            .map_param(STATUS_CHANGE, status::MUTE, EventKind::MuteChanged)
            .map_param(STATUS_CHANGE, status::POSITION, EventKind::TrackPositionChanged)
            .map_param(STATUS_CHANGE, status::RADIO_CAPTURE, EventKind::RadioCaptureChanged)
    }

    /// Table of players posting window messages.
    pub fn message_generation() -> Self {
        use codes::message::*;

        TranslationTable::new("message")
            .map(CMD_QUIT, EventKind::PlayerQuitting)
            .map(EVENT_PLAYER_STATE, EventKind::PlayerStateChanged)
            .map(EVENT_STREAM_START, EventKind::TrackChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::VOLUME, EventKind::VolumeChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::MUTE, EventKind::MuteChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::EQUALIZER, EventKind::EqualizerChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::EQUALIZER_BAND, EventKind::EqualizerChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::PLAYER_POSITION, EventKind::TrackPositionChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::REPEAT, EventKind::RepeatChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::SHUFFLE, EventKind::ShuffleChanged)
            .map_param(EVENT_PROPERTY_VALUE, property::RADIOCAP, EventKind::RadioCaptureChanged)
    }
}

type Listener = Arc<dyn Fn(&SemanticEvent) + Send + Sync>;

/// Registered listeners, called in registration order.
///
/// Listeners run on the reconciliation context and must not block.
pub struct ListenerRegistry {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    subscribers: Mutex<Vec<Sender<SemanticEvent>>>,
    counter: AtomicU64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
        }
    }

    /// Returns a token for [`unregister_listener`](Self::unregister_listener).
    pub fn register_listener<F>(&self, listener: F) -> u64
    where
        F: Fn(&SemanticEvent) + Send + Sync + 'static,
    {
        let token = self.counter.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().insert(token, Arc::new(listener));
        token
    }

    /// Returns whether the token was registered.
    pub fn unregister_listener(&self, token: u64) -> bool {
        self.listeners.write().remove(&token).is_some()
    }

    /// Channel receiving every event fired after this call. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<SemanticEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn emit(&self, event: SemanticEvent) {
        // listeners may (un)register from inside the call
        let listeners: Vec<Listener> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }

        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}
