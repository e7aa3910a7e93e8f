/// Connection Management Module
///
/// This module provides the server registry: named connection descriptors,
/// the drivers that open them, and the lifecycle of the single live
/// connection each descriptor owns.

use crate::core::{BridgeError, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Server id used by addresses that carry no `server:` prefix
pub const DEFAULT_SERVER_ID: &str = "DefaultServer";

/// Driver identifier assigned to descriptors that do not name one
pub const DEFAULT_DRIVER: &str = "sqlite";

/// Stored connection configuration for one named server
#[derive(Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub server_id: String,
    pub url: String,
    pub user: String,
    pub password: String,
    /// Identifier of the driver used to open connections
    pub driver: String,
}

impl ServerDescriptor {
    /// Creates an empty descriptor for the given server id
    pub fn new(server_id: impl Into<String>) -> Self {
        ServerDescriptor {
            server_id: server_id.into(),
            url: String::new(),
            user: String::new(),
            password: String::new(),
            driver: DEFAULT_DRIVER.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Names of the required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.user.trim().is_empty() {
            missing.push("user");
        }
        if self.password.trim().is_empty() {
            missing.push("password");
        }
        missing
    }

    /// Returns `true` when url, user and password are all present
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

// Passwords never reach the logs.
impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("server_id", &self.server_id)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("driver", &self.driver)
            .finish()
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server [id={}, url={}, user={}, driver={}]",
            self.server_id, self.url, self.user, self.driver
        )
    }
}

/// Opens connections for descriptors that name it by identifier
pub trait Driver: Send + Sync {
    /// Identifier matched against `ServerDescriptor::driver`
    fn id(&self) -> &str;

    /// Opens a new connection for the descriptor
    fn open(&self, descriptor: &ServerDescriptor) -> Result<Connection>;
}

/// Built-in SQLite driver
///
/// Accepted URLs are `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>`
/// and a bare file path. SQLite has no authentication, so user and password
/// are only checked for presence by the registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Extracts the database path from a URL, `None` meaning in-memory
    pub fn database_path(url: &str) -> Option<&str> {
        let rest = url.strip_prefix("sqlite:").unwrap_or(url);
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        if rest == ":memory:" {
            None
        } else {
            Some(rest)
        }
    }
}

impl Driver for SqliteDriver {
    fn id(&self) -> &str {
        DEFAULT_DRIVER
    }

    fn open(&self, descriptor: &ServerDescriptor) -> Result<Connection> {
        let conn = match Self::database_path(&descriptor.url) {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| {
            BridgeError::Connection(format!(
                "failed to open {} for server '{}': {}",
                descriptor.url, descriptor.server_id, e
            ))
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }
}

/// A registered server: its descriptor plus the live connection it owns
///
/// The connection slot is guarded by a mutex that is held for the whole of
/// open-or-reuse and statement execution, so two callers can neither both
/// open a connection nor run statements on it at the same time.
pub struct ServerHandle {
    descriptor: ServerDescriptor,
    driver: Option<Arc<dyn Driver>>,
    connection: Mutex<Option<Connection>>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // try_lock: formatting may happen while this thread holds the slot
        let open = self.connection.try_lock().map(|slot| slot.is_some()).ok();
        f.debug_struct("ServerHandle")
            .field("descriptor", &self.descriptor)
            .field("open", &open)
            .finish()
    }
}

impl ServerHandle {
    fn new(descriptor: ServerDescriptor, driver: Option<Arc<dyn Driver>>) -> Self {
        ServerHandle {
            descriptor,
            driver,
            connection: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn server_id(&self) -> &str {
        &self.descriptor.server_id
    }

    /// Checks whether a live connection is currently held
    pub fn is_open(&self) -> bool {
        self.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Opens the connection if none is live, otherwise keeps the current one
    pub fn open_or_reuse(&self) -> Result<()> {
        let mut slot = self.lock()?;
        self.ensure_open(&mut slot).map(|_| ())
    }

    /// Runs `f` against the live connection, opening it first if needed
    ///
    /// The connection stays locked until `f` returns.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut slot = self.lock()?;
        let conn = self.ensure_open(&mut slot)?;
        f(conn)
    }

    /// Closes the live connection, if any, and clears the slot
    ///
    /// Returns `Ok(false)` when there was nothing to close. The slot is
    /// cleared even when closing fails.
    pub fn close(&self) -> Result<bool> {
        let mut slot = self.lock()?;
        match slot.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| {
                    BridgeError::Connection(format!(
                        "failed to close connection for server '{}': {}",
                        self.server_id(),
                        e
                    ))
                })?;
                debug!("Closed connection for server {}", self.server_id());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.connection.lock().map_err(|_| {
            BridgeError::App(format!(
                "Failed to acquire connection lock for server '{}'",
                self.server_id()
            ))
        })
    }

    fn ensure_open<'s>(&self, slot: &'s mut Option<Connection>) -> Result<&'s Connection> {
        if slot.is_none() {
            let missing = self.descriptor.missing_fields();
            if !missing.is_empty() {
                return Err(BridgeError::Config(format!(
                    "server '{}' is missing {}",
                    self.server_id(),
                    missing.join(", ")
                )));
            }
            let driver = self.driver.as_ref().ok_or_else(|| {
                BridgeError::Config(format!(
                    "no driver registered as '{}' for server '{}'",
                    self.descriptor.driver,
                    self.server_id()
                ))
            })?;

            let conn = driver.open(&self.descriptor)?;
            info!("Opened connection for {}", self.descriptor);
            *slot = Some(conn);
        }

        slot.as_ref().ok_or_else(|| {
            BridgeError::Connection(format!("no live connection for server '{}'", self.server_id()))
        })
    }
}

/// Outcome of opening every registered server at once
#[derive(Debug, Default)]
pub struct ConnectReport {
    /// Servers with a live connection afterwards
    pub opened: Vec<String>,
    /// Servers skipped because url, user or password is blank
    pub skipped: Vec<String>,
    /// Servers whose connection attempt failed, with the cause
    pub failed: Vec<(String, String)>,
}

/// Registry of named servers and their live connections
///
/// The registry is an owned value; share it with `Arc`. Lookups hand out
/// `Arc<ServerHandle>` clones, so a caller that already holds a handle keeps
/// working against it even if the registry is reconfigured meanwhile.
pub struct ServerRegistry {
    servers: RwLock<HashMap<String, Arc<ServerHandle>>>,
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.server_ids())
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServerRegistry {
    /// Creates an empty registry with the SQLite driver available
    pub fn new() -> Self {
        ServerRegistry {
            servers: RwLock::new(HashMap::new()),
            drivers: HashMap::new(),
        }
        .with_driver(Arc::new(SqliteDriver))
    }

    /// Makes a driver available under its identifier
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.insert(driver.id().to_string(), driver);
        self
    }

    /// Adds a descriptor, replacing any descriptor with the same id
    pub fn register(&self, descriptor: ServerDescriptor) {
        let handle = self.handle_for(descriptor);
        let replaced = self
            .write_servers()
            .insert(handle.server_id().to_string(), handle);
        if let Some(old) = replaced {
            close_quietly(&old);
        }
    }

    /// Replaces the whole descriptor set
    ///
    /// Connections of the previous set are closed once the swap is done.
    /// Ids absent from `descriptors` are no longer resolvable afterwards.
    pub fn replace_all<I>(&self, descriptors: I)
    where
        I: IntoIterator<Item = ServerDescriptor>,
    {
        let fresh: HashMap<String, Arc<ServerHandle>> = descriptors
            .into_iter()
            .map(|d| {
                let handle = self.handle_for(d);
                (handle.server_id().to_string(), handle)
            })
            .collect();
        debug!("Replacing server registry with {} server(s)", fresh.len());

        let previous = std::mem::replace(&mut *self.write_servers(), fresh);
        for old in previous.values() {
            close_quietly(old);
        }
    }

    /// Looks up a server by id; unknown ids yield `None`
    pub fn get(&self, server_id: &str) -> Option<Arc<ServerHandle>> {
        self.read_servers().get(server_id).cloned()
    }

    /// The server used by addresses without a prefix
    pub fn default_server(&self) -> Option<Arc<ServerHandle>> {
        self.get(DEFAULT_SERVER_ID)
    }

    /// Registered server ids in sorted order
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_servers().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read_servers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_servers().is_empty()
    }

    /// Opens a connection for every complete descriptor
    ///
    /// Incomplete descriptors are skipped with a warning. A failing server is
    /// recorded and does not stop the others.
    pub fn connect_all(&self) -> ConnectReport {
        let mut report = ConnectReport::default();
        for handle in self.snapshot() {
            let id = handle.server_id().to_string();
            if !handle.descriptor().is_complete() {
                warn!("more information needed: {}", handle.descriptor());
                report.skipped.push(id);
                continue;
            }
            match handle.open_or_reuse() {
                Ok(()) => report.opened.push(id),
                Err(e) => {
                    error!("failed to connect server {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }

    /// Closes every open connection
    ///
    /// Safe to call repeatedly. Every server is attempted; failures are
    /// gathered into a single error.
    pub fn close_all(&self) -> Result<()> {
        let mut failures = Vec::new();
        for handle in self.snapshot() {
            if let Err(e) = handle.close() {
                error!("{}", e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Connection(format!(
                "failed to close {} connection(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    fn handle_for(&self, descriptor: ServerDescriptor) -> Arc<ServerHandle> {
        let driver = self.drivers.get(&descriptor.driver).cloned();
        if driver.is_none() {
            warn!("no driver registered as '{}' for {}", descriptor.driver, descriptor);
        }
        Arc::new(ServerHandle::new(descriptor, driver))
    }

    fn snapshot(&self) -> Vec<Arc<ServerHandle>> {
        self.read_servers().values().cloned().collect()
    }

    // The map only holds `Arc`s, so a poisoned lock still guards a usable map.
    fn read_servers(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ServerHandle>>> {
        self.servers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_servers(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ServerHandle>>> {
        self.servers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn close_quietly(handle: &ServerHandle) {
    if let Err(e) = handle.close() {
        warn!("{}", e);
    }
}
