use crate::config::StrategyConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Broadcasts validated configuration reloads to a running strategy.
///
/// Receivers see a new value only when the file parses and validates; a
/// broken edit leaves the previous configuration in force.
pub struct ConfigWatcher {
    tx: watch::Sender<StrategyConfig>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(initial_config: StrategyConfig) -> (Self, watch::Receiver<StrategyConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (Self { tx }, rx)
    }

    /// Publishes a configuration directly, bypassing the file watcher.
    /// Values that fail validation are dropped.
    pub fn publish(&self, config: StrategyConfig) -> bool {
        match config.validate() {
            Ok(()) => self.tx.send(config).is_ok(),
            Err(e) => {
                error!(error = %e, "Rejected configuration update");
                false
            }
        }
    }

    /// Watches `config_path` and broadcasts each valid reload until every
    /// receiver has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file watcher cannot be created or the path
    /// cannot be watched.
    pub async fn watch(&self, config_path: impl AsRef<Path>) -> Result<()> {
        let path = config_path.as_ref().to_path_buf();
        let (event_tx, mut events) = mpsc::unbounded_channel();

        // Runs on the notify thread; a send only fails once this loop has returned.
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                event_tx.send(event).ok();
            }
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching strategy config");

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = self.tx.closed() => {
                    info!("No config receivers left, stopping watcher");
                    return Ok(());
                }
            };
            let Some(event) = event else {
                warn!("Config file events stopped");
                return Ok(());
            };
            if !event.kind.is_modify() {
                continue;
            }

            match ConfigLoader::load_from(&path) {
                Ok(config) => {
                    if self.tx.send(config).is_err() {
                        info!("No config receivers left, stopping watcher");
                        return Ok(());
                    }
                    info!(path = %path.display(), "Strategy config reloaded");
                }
                Err(e) => error!(path = %path.display(), error = %e, "Ignoring invalid config edit"),
            }
        }
    }
}
