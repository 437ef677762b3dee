//! Mirrors a scripted player and prints what the mirror sees.
//!
//! ```bash
//! RUST_LOG=playermirror=debug cargo run -p playermirror --example simulated_player
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mirrorconfig::Config;
use playermirror::logging::init_tracing;
use playermirror::simulated::{SimulatedPlayer, track};
use playermirror::{ChangeFlags, MirrorConfigExt, NativeHandle, PlayerMirror};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = Config::defaults()?;
    let settings = config.mirror_settings()?;
    init_tracing(&settings.log_level);

    let morning = NativeHandle(0xa1);
    let evening = NativeHandle(0xb2);

    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(morning, "Morning", vec![track("Sunrise"), track("Coffee")]);
    player.insert_playlist(evening, "Evening", vec![track("Dusk")]);
    player.set_active(morning, Some(1));
    player.set_queue(vec![(evening, 0)]);

    let mirror = PlayerMirror::start(player.clone(), settings)?;
    mirror.listeners().register_listener(|event| info!(?event, "Mirror event"));
    mirror.wait_idle(Duration::from_secs(5));

    for playlist in mirror.list_playlists() {
        info!(
            id = playlist.id.0,
            title = %playlist.title,
            entries = playlist.entry_count,
            "Playlist"
        );
    }
    info!(now_playing = %mirror.formatted_title(-1, -1, "%a - %T (%L)")?, "Active entry");

    // a burst of edits: one reload once the debounce expires
    for take in 1..=5 {
        player.update_entry(morning, 0, track(&format!("Sunrise (take {})", take)));
        player.notify_changed(morning, ChangeFlags::CONTENT);
        thread::sleep(Duration::from_millis(20));
    }
    mirror.wait_idle(Duration::from_secs(5));
    info!(title = %mirror.entry_field(-1, 0, "title")?, "First entry after the edits");

    player.remove_playlist(evening);
    player.notify_removed(evening);
    mirror.wait_idle(Duration::from_secs(5));
    info!(
        playlists = mirror.list_playlists().len(),
        queued = mirror.list_queue().len(),
        stats = ?mirror.repository().stats(),
        "After removal"
    );

    mirror.shutdown();
    Ok(())
}
