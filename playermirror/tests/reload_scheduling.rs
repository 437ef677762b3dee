mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::{WAIT, id_of, settings, start, wait_until};
use playermirror::simulated::{SimulatedPlayer, track};
use playermirror::{ChangeFlags, MirrorSettings, NativeHandle};

const A1: NativeHandle = NativeHandle(0xa1);
const B2: NativeHandle = NativeHandle(0xb2);

#[test]
fn test_burst_of_changes_coalesces_into_one_reload() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", vec![track("one"), track("two")]);
    let mirror = start(&player, settings(1000));
    let id = id_of(&mirror, A1);

    // a first reload sets the debounce reference
    player.update_entry(A1, 0, track("first"));
    player.notify_changed(A1, ChangeFlags::CONTENT);
    assert!(mirror.wait_idle(WAIT));
    let metadata_reads = player.calls().playlist_metadata;

    for i in 0..10 {
        player.update_entry(A1, 1, track(&format!("edit {}", i)));
        assert!(player.notify_changed(A1, ChangeFlags::CONTENT));
    }
    assert!(mirror.wait_idle(WAIT));

    // an entries reload reads the metadata twice
    assert_eq!((player.calls().playlist_metadata - metadata_reads) / 2, 1);
    let entries = mirror.repository().entries(id).unwrap();
    assert_eq!(entries[0].fields.title, "first");
    assert_eq!(entries[1].fields.title, "edit 9");
}

#[test]
fn test_reloads_of_one_playlist_never_overlap() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Slow", vec![track("a"), track("b"), track("c")]);
    let mirror = start(&player, settings(0).with_reload_workers(4));
    let id = id_of(&mirror, A1);

    player.set_read_delay(Duration::from_millis(20));
    for i in 0..5 {
        player.update_entry(A1, 2, track(&format!("take {}", i)));
        player.notify_changed(A1, ChangeFlags::CONTENT);
        thread::sleep(Duration::from_millis(5));
    }
    assert!(mirror.wait_idle(WAIT));

    assert_eq!(player.max_parallel_reads(A1), 1);
    assert_eq!(mirror.repository().entries(id).unwrap()[2].fields.title, "take 4");
}

#[test]
fn test_metadata_change_keeps_entries() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", vec![track("one"), track("two")]);
    let mirror = start(&player, settings(0));
    let id = id_of(&mirror, A1);
    let entry_reads = player.calls().entry_metadata;

    player.rename_playlist(A1, "Dawn");
    player.notify_changed(A1, ChangeFlags::NAME);
    assert!(mirror.wait_idle(WAIT));

    assert_eq!(mirror.repository().get_playlist(id).unwrap().title, "Dawn");
    assert_eq!(player.calls().entry_metadata, entry_reads);
}

#[test]
fn test_polling_detects_add_edit_and_remove() {
    let player = Arc::new(SimulatedPlayer::polling(50));
    player.insert_playlist(A1, "Morning", vec![track("one"), track("two")]);
    let mirror = start(&player, settings(0));
    let a1 = id_of(&mirror, A1);

    player.insert_playlist(B2, "Evening", vec![track("late")]);
    assert!(wait_until(WAIT, || mirror
        .resolver()
        .lookup_playlist(B2)
        .is_some_and(|id| mirror.repository().contains_playlist(id))));

    player.update_entry(A1, 1, track("edited"));
    assert!(wait_until(WAIT, || mirror
        .repository()
        .entries(a1)
        .is_ok_and(|entries| entries[1].fields.title == "edited")));

    player.remove_playlist(A1);
    assert!(wait_until(WAIT, || !mirror.repository().contains_playlist(a1)));
    assert!(mirror.resolver().lookup_playlist(A1).is_none());
}

#[test]
fn test_quiet_polling_writes_nothing() {
    let player = Arc::new(SimulatedPlayer::polling(20));
    player.insert_playlist(A1, "Morning", vec![track("one"), track("two")]);
    player.set_queue(vec![(A1, 1)]);
    let mirror = start(&player, settings(0));
    assert!(wait_until(WAIT, || mirror.list_queue().len() == 1));

    let stats = mirror.repository().stats();
    let listings = player.calls().list_playlists;
    thread::sleep(Duration::from_millis(300));
    assert!(mirror.wait_idle(WAIT));

    assert!(player.calls().list_playlists > listings);
    assert_eq!(mirror.repository().stats(), stats);
}

#[test]
fn test_polling_interval_from_settings_overrides_adapter() {
    let player = Arc::new(SimulatedPlayer::polling(60_000));
    player.insert_playlist(A1, "Morning", vec![track("one")]);
    let mirror = start(
        &player,
        MirrorSettings::default()
            .with_min_reload_interval(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(20)),
    );

    player.insert_playlist(B2, "Evening", vec![track("late")]);
    assert!(wait_until(WAIT, || mirror.resolver().lookup_playlist(B2).is_some()));
}

#[test]
fn test_readers_never_see_torn_state() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", vec![track("one"), track("two")]);
    let mirror = start(&player, settings(0));
    let id = id_of(&mirror, A1);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let repository = Arc::clone(mirror.repository());
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut checks = 0usize;
            while !done.load(Ordering::Relaxed) {
                let (playlist, entries) = repository.playlist_snapshot(id).unwrap();
                assert_eq!(playlist.entry_count, entries.len());
                checks += 1;
            }
            checks
        })
    };

    for round in 0..20 {
        let size = if round % 2 == 0 { 5 } else { 2 };
        let tracks = (0..size).map(|i| track(&format!("r{} t{}", round, i))).collect();
        player.set_entries(A1, tracks);
        player.notify_changed(A1, ChangeFlags::CONTENT);
        assert!(mirror.wait_idle(WAIT));
    }

    done.store(true, Ordering::Relaxed);
    assert!(reader.join().unwrap() > 0);
    assert_eq!(mirror.repository().get_playlist(id).unwrap().entry_count, 2);
}

#[test]
fn test_shutdown_stops_reloads() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", vec![track("one")]);
    let mirror = start(&player, settings(0));
    let id = id_of(&mirror, A1);

    mirror.shutdown();
    assert!(!mirror.is_running());
    assert!(!player.is_subscribed());
    assert!(mirror.request_full_reload().unwrap_err().to_string().contains("stopped"));

    player.set_entries(A1, vec![track("one"), track("two")]);
    assert!(!player.notify_changed(A1, ChangeFlags::CONTENT));
    assert_eq!(mirror.repository().get_playlist(id).unwrap().entry_count, 1);

    // idempotent
    mirror.shutdown();
}
