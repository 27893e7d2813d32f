//! Contains the node configuration.
//!
//! The configuration is loaded from **config/settings.yml**. This file is observed and reloaded
//! once a change is detected, so that e.g. the list of peers or the budget of a group can be
//! changed without restarting the node (and thereby losing all cached values). Each user of the
//! config should therefore subscribe to the [Config::notifier] and re-process its settings once
//! a change message is received.
//!
//! Note that a [Handle] obtained via [Config::current] should not be kept around, as it will not
//! reflect a reloaded config.
//!
//! # Examples
//!
//! ```
//! # use peercache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! server:
//!     port: 8002
//! peers:
//!     timeout: 2s
//! ", None).unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.query("server.port").as_i64(), Some(8002));
//! assert_eq!(handle.query("server.host").as_str(), None);
//! assert_eq!(handle.duration("peers.timeout").unwrap().unwrap().as_secs(), 2);
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::fmt::{parse_duration, parse_size};
use crate::platform::Platform;

/// Contains the path of the config file used by [install].
pub const SETTINGS_FILE: &str = "config/settings.yml";

/// Provides access to the node configuration.
///
/// The instance installed by the [Builder](crate::builder::Builder) can be obtained via
/// `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<Snapshot>,
}

struct Snapshot {
    root: Yaml,
    last_modified: Option<SystemTime>,
}

/// Receives a message each time the config has been reloaded.
///
/// The message itself carries no information. Upon receiving it, the current config has to be
/// fetched and re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<Snapshot>,
}

impl Config {
    /// Creates a new and empty config which is backed by the given file.
    ///
    /// Note that the file is neither read nor observed. This is handled by [install].
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            tx,
            config: ArcSwap::new(Arc::new(Snapshot {
                root: Yaml::Hash(Default::default()),
                last_modified: None,
            })),
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file.
    ///
    /// An unmounted docker volume shows up as directory, therefore only regular files count.
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|metadata| metadata.is_file())
            .and_then(|metadata| metadata.modified().ok())
    }

    /// Reads the underlying file and broadcasts a change if it was loaded successfully.
    pub async fn load(&self) -> anyhow::Result<()> {
        let last_modified = match self.last_modified().await {
            Some(last_modified) => last_modified,
            None => {
                log::info!(
                    "Config file {} doesn't exist or isn't a file - skipping config load.",
                    &self.filename
                );
                return Ok(());
            }
        };

        log::info!("Loading config file {}...", &self.filename);
        let data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(&data, Some(last_modified))
    }

    /// Parses the given YAML data and makes it the current configuration.
    ///
    /// If the data cannot be parsed, an error is returned and the previous config remains
    /// active.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let root = if docs.is_empty() {
            Yaml::Hash(Default::default())
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new(Snapshot {
            root,
            last_modified,
        }));

        // Nobody might be listening, which is fine...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Returns the root node of the configuration.
    pub fn root(&self) -> &Yaml {
        &self.config.root
    }

    /// Resolves a dotted path like "peers.timeout".
    ///
    /// If any part of the path doesn't exist, **Yaml::BadValue** is returned.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .fold(&self.config.root, |node, key| &node[key])
    }

    /// Reads a byte size like "2k" or 2048.
    ///
    /// Returns **None** if no value is present and an error if the value cannot be parsed.
    pub fn size(&self, path: impl AsRef<str>) -> anyhow::Result<Option<usize>> {
        let path = path.as_ref();
        match self.query(path) {
            Yaml::BadValue | Yaml::Null => Ok(None),
            Yaml::Integer(value) if *value >= 0 => Ok(Some(*value as usize)),
            Yaml::String(value) => parse_size(value)
                .with_context(|| format!("Invalid size in {}", path))
                .map(Some),
            other => Err(anyhow::anyhow!("Invalid size in {}: {:?}", path, other)),
        }
    }

    /// Reads a duration like "5s" or "500ms".
    ///
    /// Plain numbers are treated as milliseconds. Returns **None** if no value is present and an
    /// error if the value cannot be parsed.
    pub fn duration(&self, path: impl AsRef<str>) -> anyhow::Result<Option<Duration>> {
        let path = path.as_ref();
        match self.query(path) {
            Yaml::BadValue | Yaml::Null => Ok(None),
            Yaml::Integer(value) if *value >= 0 => Ok(Some(Duration::from_millis(*value as u64))),
            Yaml::String(value) => parse_duration(value)
                .with_context(|| format!("Invalid duration in {}", path))
                .map(Some),
            other => Err(anyhow::anyhow!("Invalid duration in {}: {:?}", path, other)),
        }
    }

    /// Reads a list of strings, skipping all non-string entries.
    pub fn strings(&self, path: impl AsRef<str>) -> Vec<String> {
        self.query(path)
            .as_vec()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.as_str())
                    .map(|entry| entry.to_owned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Creates and installs a **Config** for the given platform.
///
/// This reads [SETTINGS_FILE] and starts a background task which checks the file every two
/// seconds and reloads it once its modification date changes.
pub async fn install(platform: Arc<Platform>) -> Arc<Config> {
    if let Some(directory) = Path::new(SETTINGS_FILE).parent() {
        if let Err(error) = tokio::fs::create_dir_all(directory).await {
            log::warn!(
                "Failed to create config directory {}: {}",
                directory.to_string_lossy(),
                error
            );
        }
    }

    let config = Arc::new(Config::new(SETTINGS_FILE));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(platform, config.clone());

    config
}

#[cfg(test)]
fn run_config_change_monitor(_platform: Arc<Platform>, _config: Arc<Config>) {
    // Tests provide their config via load_from_string...
}

#[cfg(not(test))]
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>) {
    crate::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().last_modified;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("Node configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load node configuration: {:#}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use std::time::{Duration, SystemTime};

    #[test]
    fn updates_are_broadcast() {
        crate::testing::test_async(async {
            let config = Config::new("test.yml");
            config
                .load_from_string("groups:\n  scores:\n    max_memory: 2k", Some(SystemTime::now()))
                .unwrap();

            let mut notifier = config.notifier();
            let (tx, rx) = tokio::sync::oneshot::channel();
            crate::spawn!(async move {
                if notifier.recv().await.is_ok() {
                    let _ = tx.send(());
                }
            });

            // A malformed config is rejected and the previous one stays active...
            assert_eq!(
                config
                    .load_from_string("groups: 'invalid", Some(SystemTime::now()))
                    .is_err(),
                true
            );
            assert_eq!(
                config.current().size("groups.scores.max_memory").unwrap(),
                Some(2048)
            );

            config
                .load_from_string(
                    "groups:\n  scores:\n    max_memory: 4096",
                    Some(SystemTime::now()),
                )
                .unwrap();
            rx.await.unwrap();

            assert_eq!(
                config.current().size("groups.scores.max_memory").unwrap(),
                Some(4096)
            );
        });
    }

    #[test]
    fn typed_values_can_be_read() {
        let config = Config::new("test.yml");
        config
            .load_from_string(
                "
peers:
    timeout: 250
    replicas: 3
    nodes:
        - http://127.0.0.1:8001
        - 42
        - http://127.0.0.1:8002
    budget: lots
",
                None,
            )
            .unwrap();

        let handle = config.current();
        assert_eq!(
            handle.duration("peers.timeout").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(handle.duration("peers.missing").unwrap(), None);
        assert_eq!(handle.query("peers.replicas").as_i64(), Some(3));
        assert_eq!(
            handle.strings("peers.nodes"),
            vec![
                "http://127.0.0.1:8001".to_owned(),
                "http://127.0.0.1:8002".to_owned()
            ]
        );
        assert_eq!(handle.strings("peers.unknown").is_empty(), true);
        assert_eq!(handle.size("peers.budget").is_err(), true);
        assert_eq!(handle.query("peers.nodes.first").is_badvalue(), true);
    }
}
