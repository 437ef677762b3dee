mod common;

use std::sync::Arc;

use common::{WAIT, id_of, record_events, settings, start};
use playermirror::simulated::{SimulatedPlayer, track};
use playermirror::{ChangeFlags, EntryFields, NativeHandle};

const A1: NativeHandle = NativeHandle(0xa1);
const B2: NativeHandle = NativeHandle(0xb2);

fn three_tracks() -> Vec<EntryFields> {
    vec![track("one"), track("two"), track("three")]
}

#[test]
fn test_first_load_mirrors_playlist_and_entries() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", three_tracks());
    let mirror = start(&player, settings(50));

    let id = id_of(&mirror, A1);
    let playlist = mirror.repository().get_playlist(id).unwrap();
    assert_eq!(playlist.title, "Morning");
    assert_eq!(playlist.entry_count, 3);
    assert!(playlist.fingerprint.is_some());

    let entries = mirror.repository().entries(id).unwrap();
    let order: Vec<usize> = entries.iter().map(|e| e.order_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(entries[1].fields.title, "two");
    assert_eq!(mirror.resolver().to_native_handle(id).unwrap(), A1);
}

#[test]
fn test_identical_reload_changes_nothing() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", three_tracks());
    let mirror = start(&player, settings(50));
    let id = id_of(&mirror, A1);

    let before = mirror.repository().get_playlist(id).unwrap();
    let stats = mirror.repository().stats();
    let reads = player.calls().entry_metadata;
    let events = record_events(&mirror);

    mirror.request_full_reload().unwrap();
    assert!(mirror.wait_idle(WAIT));

    // the player was queried again, but nothing was written
    assert!(player.calls().entry_metadata > reads);
    assert_eq!(mirror.repository().get_playlist(id).unwrap(), before);
    assert_eq!(mirror.repository().stats(), stats);
    assert!(events.lock().is_empty());
}

#[test]
fn test_removed_playlist_disappears_with_its_queue_entries() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", three_tracks());
    player.insert_playlist(B2, "Evening", vec![track("late")]);
    player.set_queue(vec![(A1, 2), (B2, 0), (A1, 0)]);
    let mirror = start(&player, settings(50));

    let a1 = id_of(&mirror, A1);
    let b2 = id_of(&mirror, B2);
    assert_eq!(mirror.list_queue().len(), 3);

    player.remove_playlist(A1);
    assert!(player.notify_removed(A1));
    assert!(mirror.wait_idle(WAIT));

    assert!(mirror.repository().get_playlist(a1).unwrap_err().is_not_found());
    assert!(mirror.resolver().to_native_handle(a1).unwrap_err().is_not_found());
    let queue = mirror.list_queue();
    assert_eq!(queue.len(), 1);
    assert!(queue.iter().all(|q| q.playlist_id == b2));
    assert_eq!(queue[0].fields.title, "late");
}

#[test]
fn test_failed_entry_read_keeps_previous_content() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", three_tracks());
    let mirror = start(&player, settings(0));
    let id = id_of(&mirror, A1);

    let (meta_before, entries_before) = mirror.repository().playlist_snapshot(id).unwrap();
    let stats = mirror.repository().stats();

    player.set_entries(A1, vec![track("uno"), track("dos"), track("tres"), track("cuatro")]);
    player.fail_entry_at(A1, Some(2));
    player.notify_changed(A1, ChangeFlags::CONTENT);
    assert!(mirror.wait_idle(WAIT));

    let (meta_after, entries_after) = mirror.repository().playlist_snapshot(id).unwrap();
    assert_eq!(meta_after, meta_before);
    assert_eq!(entries_after, entries_before);
    assert_eq!(mirror.repository().stats(), stats);

    // the next signal retries
    player.fail_entry_at(A1, None);
    player.notify_changed(A1, ChangeFlags::CONTENT);
    assert!(mirror.wait_idle(WAIT));
    let playlist = mirror.repository().get_playlist(id).unwrap();
    assert_eq!(playlist.entry_count, 4);
    assert_eq!(mirror.repository().entries(id).unwrap()[3].fields.title, "cuatro");
}

#[test]
fn test_count_mismatch_is_not_committed() {
    let player = Arc::new(SimulatedPlayer::push());
    player.insert_playlist(A1, "Morning", three_tracks());
    let mirror = start(&player, settings(0));
    let id = id_of(&mirror, A1);
    let before = mirror.repository().playlist_snapshot(id).unwrap();

    player.set_entries(A1, vec![track("a"), track("b"), track("c"), track("d")]);
    player.misreport_next_count(A1, 2);
    player.notify_changed(A1, ChangeFlags::CONTENT);
    assert!(mirror.wait_idle(WAIT));

    assert_eq!(mirror.repository().playlist_snapshot(id).unwrap(), before);
}

#[test]
fn test_empty_titles_are_synthesized() {
    let player = Arc::new(SimulatedPlayer::push());
    let untitled = EntryFields {
        filename: "/music/Artist - Song.flac".to_string(),
        duration_ms: 1000,
        ..Default::default()
    };
    player.insert_playlist(A1, "Mixed", vec![untitled]);
    let mirror = start(&player, settings(0));

    let entries = mirror.repository().entries(id_of(&mirror, A1)).unwrap();
    assert_eq!(entries[0].fields.title, "Artist - Song");
}
