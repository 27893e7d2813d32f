//! Keeps all groups of a node, so that they can be looked up by name.
//!
//! The registry is registered in the [Platform] and used by the peer protocol and the API to
//! resolve the group named in a request. If installed via [install], the budget of each group can
//! also be overwritten in the config:
//!
//! ```yaml
//! groups:
//!     scores:
//!         max_memory: 2k
//! ```
//!
//! Such a budget takes precedence over the one passed to [GroupRegistry::new_group] and is
//! re-applied whenever the config changes.
//!
//! # Examples
//! ```
//! # use peercache::registry::GroupRegistry;
//! # use peercache::group::GetterFunc;
//! let registry = GroupRegistry::new();
//! let group = registry
//!     .new_group("scores", 2 << 10, GetterFunc(|key: &str| Ok(key.as_bytes().to_vec())))
//!     .unwrap();
//!
//! assert_eq!(registry.get_group("scores").unwrap().name(), group.name());
//! assert_eq!(registry.get_group("unknown").is_none(), true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{Config, Handle};
use crate::errors::CacheError;
use crate::group::{Getter, Group};
use crate::platform::Platform;
use crate::spawn;

/// Maps group names to groups.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    budgets: RwLock<HashMap<String, usize>>,
}

impl GroupRegistry {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        GroupRegistry::default()
    }

    /// Creates a new group and registers it under its name.
    ///
    /// A previously registered group with the same name is replaced. If the config specifies a
    /// budget for this group, it takes precedence over the given **max_memory**.
    pub fn new_group(
        &self,
        name: &str,
        max_memory: usize,
        getter: impl Getter + 'static,
    ) -> Result<Arc<Group>, CacheError> {
        if name.is_empty() {
            return Err(CacheError::Configuration(
                "A group requires a non-empty name".to_owned(),
            ));
        }

        let max_memory = self
            .budgets
            .read()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(max_memory);
        let group = Arc::new(Group::new(name, max_memory, getter));

        if self
            .groups
            .write()
            .unwrap()
            .insert(name.to_owned(), group.clone())
            .is_some()
        {
            log::warn!("Group {} has been replaced.", name);
        } else {
            log::info!(
                "Created group {} ({}).",
                name,
                crate::fmt::format_size(max_memory)
            );
        }

        Ok(group)
    }

    /// Returns the group with the given name.
    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Returns the names of all groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        names.sort();

        names
    }

    /// Reads the budgets in **groups.<name>.max_memory** and applies them to the known groups.
    pub fn apply_config(&self, handle: &Handle) {
        let mut budgets = HashMap::new();
        if let Some(groups) = handle.query("groups").as_hash() {
            for name in groups.keys().filter_map(|name| name.as_str()) {
                match handle.size(format!("groups.{}.max_memory", name)) {
                    Ok(Some(max_memory)) => {
                        let _ = budgets.insert(name.to_owned(), max_memory);
                    }
                    Ok(None) => (),
                    Err(error) => log::error!("{:#}", error),
                }
            }
        }

        for (name, max_memory) in &budgets {
            if let Some(group) = self.get_group(name) {
                if group.max_memory() != *max_memory {
                    log::info!(
                        "Changing the budget of group {} to {}.",
                        name,
                        crate::fmt::format_size(*max_memory)
                    );
                    group.set_max_memory(*max_memory);
                }
            }
        }

        *self.budgets.write().unwrap() = budgets;
    }
}

/// Creates and installs a **GroupRegistry** into the given platform.
///
/// If a [Config] is present, its group budgets are applied and kept up to date.
pub fn install(platform: Arc<Platform>) -> Arc<GroupRegistry> {
    let registry = Arc::new(GroupRegistry::new());
    platform.register::<GroupRegistry>(registry.clone());

    if let Some(config) = platform.find::<Config>() {
        registry.apply_config(&config.current());

        let registry = registry.clone();
        let mut notifier = config.notifier();
        spawn!(async move {
            while platform.is_running() {
                match notifier.recv().await {
                    Ok(_) => registry.apply_config(&config.current()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        registry.apply_config(&config.current())
                    }
                    Err(_) => return,
                }
            }
        });
    }

    registry
}
