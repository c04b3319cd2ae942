//! Hot reload of the route table.
//!
//! The watcher only loads and validates; applying the new config (route
//! table swap, new services) happens on the server side of the channel.
//! A file that fails to parse or validate never reaches the gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configs.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    fn is_reload_trigger(event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
    }

    /// Start watching. Dropping the returned handle stops notifications.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !Self::is_reload_trigger(&event) {
                    return;
                }

                match load_config(&reload_path) {
                    Ok(config) => {
                        tracing::info!(path = %reload_path.display(), routes = config.routes.len(), "Config change detected");
                        if updates.send(config).is_err() {
                            tracing::debug!("Config receiver gone, dropping reload");
                        }
                    }
                    Err(e) => {
                        tracing::error!(path = %reload_path.display(), error = %e, "Rejected config reload, keeping current routes");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}
