//! Hot reload of the edge configuration and the Next.js build output.
//!
//! A change to the config file, or to `BUILD_ID` inside the build directory
//! (a fresh `next build`), reloads the config and pushes it onto a channel.
//! The server rebuilds its routing context from whatever arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::EdgeConfig;

pub struct ConfigWatcher {
    config_path: PathBuf,
    build_dir: Option<PathBuf>,
    update_tx: mpsc::UnboundedSender<EdgeConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for reloaded configurations.
    pub fn new(
        config_path: &Path,
        build_dir: Option<&Path>,
    ) -> (Self, mpsc::UnboundedReceiver<EdgeConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                config_path: config_path.to_path_buf(),
                build_dir: build_dir.map(Path::to_path_buf),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let config_path = self.config_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !event.paths.iter().any(|p| is_relevant(p, &config_path)) {
                        return;
                    }
                    tracing::info!(paths = ?event.paths, "change detected, reloading");
                    match load_config(&config_path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "reload failed, keeping current configuration");
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.config_path, RecursiveMode::NonRecursive)?;
        if let Some(dir) = &self.build_dir {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(config = ?self.config_path, build = ?self.build_dir, "config watcher started");
        Ok(watcher)
    }
}

fn is_relevant(path: &Path, config_path: &Path) -> bool {
    path.ends_with("BUILD_ID")
        || path.file_name().is_some() && path.file_name() == config_path.file_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_paths() {
        let cfg = Path::new("/etc/edge/edge.toml");
        assert!(is_relevant(Path::new("/etc/edge/edge.toml"), cfg));
        assert!(is_relevant(Path::new("/app/.next/BUILD_ID"), cfg));
        assert!(!is_relevant(Path::new("/app/.next/trace"), cfg));
    }
}
