//! Watches the declarative pool config file for changes and triggers a
//! reconciliation pass. Adapted from `Alb-O-xeno`'s `crates/config/src/watch.rs`
//! `ConfigWatcher`, specialized from a directory of `.kdl` files to a single
//! YAML document.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Watches one config file's parent directory (editors often replace a
/// file rather than write it in place, which a direct file watch can miss).
pub struct ConfigWatcher {
    config_path: PathBuf,
    rx: Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.into();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        let watch_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            config_path,
            rx,
            _watcher: watcher,
        })
    }

    /// Polls without blocking; `true` iff the watched config file itself
    /// changed since the last poll (other files in the directory are
    /// ignored).
    pub fn poll(&self) -> bool {
        let mut changed = false;
        while let Ok(Ok(event)) = self.rx.try_recv() {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            if event.paths.iter().any(|p| p == &self.config_path) {
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn detects_change_to_watched_file() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("ranch.yaml");
        fs::write(&config_path, "resources: []").unwrap();

        let watcher = ConfigWatcher::new(&config_path).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        fs::write(&config_path, "resources: []\ndynamic_resources: []").unwrap();

        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(50));
            if watcher.poll() {
                return;
            }
        }
        panic!("expected config change to be detected");
    }
}
