use cli::watch::{actions_for_event, WatchAction};
use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind, RemoveKind};
use notify::Event;
use std::fs;

#[test]
fn created_and_modified_files_are_reingested() {
    let dir = tempfile::tempdir().unwrap();
    let note = dir.path().join("note.md");
    fs::write(&note, "# hi").unwrap();

    let ev = Event::new(EventKind::Create(CreateKind::File)).add_path(note.clone());
    assert_eq!(actions_for_event(&ev), vec![(note.clone(), WatchAction::Reingest)]);

    let ev = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(note.clone());
    assert_eq!(actions_for_event(&ev), vec![(note, WatchAction::Reingest)]);
}

#[test]
fn removed_or_renamed_away_files_are_forgotten() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("gone.txt");

    let ev = Event::new(EventKind::Remove(RemoveKind::File)).add_path(gone.clone());
    assert_eq!(actions_for_event(&ev), vec![(gone.clone(), WatchAction::Forget)]);

    let ev = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(gone.clone());
    assert_eq!(actions_for_event(&ev), vec![(gone, WatchAction::Forget)]);
}

#[test]
fn unsupported_files_and_access_events_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.rs");
    fs::write(&source, "fn main() {}").unwrap();
    let note = dir.path().join("note.txt");
    fs::write(&note, "x").unwrap();

    let ev = Event::new(EventKind::Create(CreateKind::File)).add_path(source);
    assert!(actions_for_event(&ev).is_empty());

    let ev = Event::new(EventKind::Access(AccessKind::Any)).add_path(note.clone());
    assert!(actions_for_event(&ev).is_empty());

    // Directories are walked by the ingest, not re-ingested themselves.
    let ev = Event::new(EventKind::Create(CreateKind::Folder)).add_path(dir.path().to_path_buf());
    assert!(actions_for_event(&ev).is_empty());
}

#[test]
fn removed_directories_forget_their_contents() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");

    let ev = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(docs.clone());
    assert_eq!(actions_for_event(&ev), vec![(docs.clone(), WatchAction::ForgetDir)]);

    // Renamed away: the path no longer exists and has no loadable extension.
    let ev = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(docs.clone());
    assert_eq!(actions_for_event(&ev), vec![(docs, WatchAction::ForgetDir)]);
}
