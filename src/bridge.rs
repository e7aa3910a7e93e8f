//! Item bridge
//!
//! Connects item bindings to the query executor. The bridge keeps the last
//! value seen for each item so that a refresh only reports real changes, and
//! turns commands into update or insert calls. It schedules nothing itself;
//! the host calls [`Bridge::refresh`] on its own timer, every
//! [`Bridge::refresh_interval`].

use crate::binding::ItemBinding;
use crate::config::{BridgeConfig, DEFAULT_REFRESH_INTERVAL};
use crate::core::db::connection::ServerRegistry;
use crate::core::db::query::QueryExecutor;
use crate::core::{BridgeError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

/// A changed item value produced by a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub item: String,
    /// `None` when the select returned no row
    pub value: Option<String>,
}

/// What a command did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Rows inserted through the insert address
    Inserted(usize),
    /// Rows changed through the update address
    Updated(usize),
    /// The command matched the last stored value; nothing was written
    Unchanged,
    /// The item has neither an insert nor an update address
    NotWritable,
}

/// Item bindings plus the executor they run on
pub struct Bridge {
    executor: QueryExecutor,
    items: BTreeMap<String, ItemBinding>,
    last_values: Mutex<HashMap<String, Option<String>>>,
    refresh_interval: Duration,
}

impl Bridge {
    pub fn new(registry: Arc<ServerRegistry>, items: BTreeMap<String, ItemBinding>) -> Self {
        Bridge {
            executor: QueryExecutor::new(registry),
            items,
            last_values: Mutex::new(HashMap::new()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Builds a registry from the configuration and opens its servers
    ///
    /// Servers that fail to connect are logged; they are retried lazily on
    /// their next use.
    pub fn from_config(config: BridgeConfig) -> Self {
        let registry = Arc::new(ServerRegistry::new());
        registry.replace_all(config.servers);
        let report = registry.connect_all();
        info!(
            "Connected {} server(s) with driver {}, skipped {}, failed {}",
            report.opened.len(),
            config.driver,
            report.skipped.len(),
            report.failed.len()
        );
        Bridge::new(registry, config.items).with_refresh_interval(config.refresh_interval)
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        self.executor.registry()
    }

    /// How often the host should call [`Bridge::refresh`]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn item_names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn binding(&self, item: &str) -> Option<&ItemBinding> {
        self.items.get(item)
    }

    /// Last value stored for an item, `None` if it was never seen
    pub fn last_value(&self, item: &str) -> Option<Option<String>> {
        self.last_values.lock().ok()?.get(item).cloned()
    }

    /// Reads every item with a select address and returns the changes
    ///
    /// An item that fails is logged and skipped.
    pub fn refresh(&self) -> Vec<StateChange> {
        let mut changes = Vec::new();
        for item in self.items.keys() {
            match self.refresh_item(item) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(e) => error!("failed to select value for {}: {}", item, e),
            }
        }
        debug!("refresh finished with {} change(s)", changes.len());
        changes
    }

    /// Reads one item; `Ok(None)` when it has no select address or did not change
    pub fn refresh_item(&self, item: &str) -> Result<Option<StateChange>> {
        let Some(address) = self.binding(item).and_then(|b| b.select.as_deref()) else {
            return Ok(None);
        };

        let value = self.executor.select(address)?.into_value();
        let mut last_values = self.lock_values()?;
        let changed = match last_values.get(item) {
            Some(previous) => *previous != value,
            None => true,
        };
        debug!("selected value: {}={:?}", item, value);
        if !changed {
            return Ok(None);
        }

        last_values.insert(item.to_string(), value.clone());
        Ok(Some(StateChange {
            item: item.to_string(),
            value,
        }))
    }

    /// Writes a command for an item
    ///
    /// A command with no `&` becomes `time=<cmd>&value=<cmd>`. The insert
    /// address is preferred; the update address only runs when the command
    /// differs from the item's last stored value.
    pub fn handle_command(&self, item: &str, command: &str) -> Result<CommandOutcome> {
        let binding = self
            .binding(item)
            .ok_or_else(|| BridgeError::Binding(format!("no binding for item '{}'", item)))?;
        let command = normalize_command(command);
        debug!("command for {}: {}", item, command);

        if let Some(address) = binding.insert.as_deref() {
            let inserted = self.executor.insert(address, &command)?;
            return Ok(CommandOutcome::Inserted(inserted));
        }

        if let Some(address) = binding.update.as_deref() {
            let previous = self
                .lock_values()?
                .insert(item.to_string(), Some(command.clone()));
            if previous.flatten().as_deref() == Some(command.as_str()) {
                return Ok(CommandOutcome::Unchanged);
            }
            let updated = self.executor.update(address, &command)?;
            return Ok(CommandOutcome::Updated(updated));
        }

        Ok(CommandOutcome::NotWritable)
    }

    /// Closes every connection in the registry
    pub fn shutdown(&self) -> Result<()> {
        self.registry().close_all()?;
        debug!("bridge shut down");
        Ok(())
    }

    fn lock_values(&self) -> Result<MutexGuard<'_, HashMap<String, Option<String>>>> {
        self.last_values
            .lock()
            .map_err(|_| BridgeError::App("Failed to acquire item value lock".to_string()))
    }
}

/// Wraps a bare command into the named-field form
pub fn normalize_command(command: &str) -> String {
    if command.contains('&') {
        command.to_string()
    } else {
        format!("time={0}&value={0}", command)
    }
}
