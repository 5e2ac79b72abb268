use anyhow::Result;
use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use qa_core::pipeline::{Assistant, FileOutcome};
use qa_core::scanner;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Events arriving within this window of each other are handled as one batch.
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Reingest,
    Forget,
    /// A vanished path that was not a loadable file, possibly a directory.
    ForgetDir,
}

/// Maps a filesystem event to per-path actions. Unsupported files and
/// access-only events produce nothing. Removal events name only the
/// removed root, so a vanished directory forgets everything below it.
pub fn actions_for_event(event: &Event) -> Vec<(PathBuf, WatchAction)> {
    let mut out = Vec::new();
    for path in &event.paths {
        let action = match event.kind {
            EventKind::Remove(_) => Some(WatchAction::Forget),
            EventKind::Create(_) | EventKind::Modify(_) => {
                if path.is_file() {
                    Some(WatchAction::Reingest)
                } else if !path.exists() {
                    Some(WatchAction::Forget)
                } else {
                    None
                }
            }
            _ => None,
        };
        match action {
            Some(action) if scanner::is_supported(path) => out.push((path.clone(), action)),
            Some(WatchAction::Forget) => out.push((path.clone(), WatchAction::ForgetDir)),
            _ => {}
        }
    }
    out
}

pub async fn watch_paths(assistant: &Assistant, paths: Vec<PathBuf>) -> Result<()> {
    let mut watch_list: Vec<PathBuf> = if paths.is_empty() {
        assistant
            .config()
            .ingest
            .include
            .iter()
            .map(PathBuf::from)
            .collect()
    } else {
        paths
    };
    if watch_list.is_empty() {
        watch_list.push(PathBuf::from("."));
    }
    // The watcher reports absolute paths; keep document keys consistent.
    let watch_list: Vec<PathBuf> = watch_list
        .into_iter()
        .map(|p| std::path::absolute(&p).unwrap_or(p))
        .collect();

    // Catch up on anything that changed while nobody was watching.
    let summary = assistant.ingest(&watch_list).await?;
    tracing::info!(
        ingested = summary.ingested,
        unchanged = summary.unchanged,
        "initial ingest done"
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        },
        notify::Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;
    for p in &watch_list {
        let mode = if p.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(p, mode)?;
    }

    println!("Watching {} path(s)... (Ctrl-C to stop)", watch_list.len());
    loop {
        let first = tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let mut pending: BTreeMap<PathBuf, WatchAction> = BTreeMap::new();
        collect(first, &mut pending);
        while let Ok(Some(ev)) = tokio::time::timeout(DEBOUNCE, rx.recv()).await {
            collect(ev, &mut pending);
        }

        for (path, action) in pending {
            apply(assistant, &path, action).await;
        }
    }
    println!("Stopped watching.");
    Ok(())
}

fn collect(
    event: notify::Result<Event>,
    pending: &mut BTreeMap<PathBuf, WatchAction>,
) {
    match event {
        Ok(ev) => {
            for (path, action) in actions_for_event(&ev) {
                pending.insert(path, action);
            }
        }
        Err(e) => tracing::warn!(error = %e, "watch error"),
    }
}

async fn apply(assistant: &Assistant, path: &Path, action: WatchAction) {
    match action {
        WatchAction::Reingest => match assistant.ingest_file(path).await {
            Ok(FileOutcome::Ingested { chunks }) => {
                println!("re-indexed {} ({} chunks)", path.display(), chunks)
            }
            Ok(FileOutcome::Skipped { notice }) => {
                println!("skipped {}: {}", path.display(), notice)
            }
            Ok(FileOutcome::Unchanged) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "re-ingest failed"),
        },
        WatchAction::Forget => match assistant.forget(path).await {
            Ok(true) => println!("removed {}", path.display()),
            Ok(false) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "remove failed"),
        },
        WatchAction::ForgetDir => match assistant.forget_dir(path).await {
            Ok(0) => {}
            Ok(n) => println!("removed {} ({} documents)", path.display(), n),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "remove failed"),
        },
    }
}
