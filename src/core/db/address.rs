/// Address Resolution Module
///
/// An address is `[serverId:]sqlTemplate`. This module splits it and looks
/// the server up in the registry.
///
/// Known limitation: the only disambiguation is that the server segment holds
/// no quote characters. A template such as `SELECT a:b` with a colon before
/// any quote is read as server `SELECT a` and template `b`.

use crate::core::db::connection::{ServerHandle, ServerRegistry, DEFAULT_SERVER_ID};
use crate::core::{BridgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::error;

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)^([^'"]+?):(.*)$"#).expect("address pattern is valid"));

/// A parsed address, borrowing from the raw string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address<'a> {
    /// Explicit server id, `None` for the default server
    pub server_id: Option<&'a str>,
    pub template: &'a str,
}

impl<'a> Address<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match ADDRESS_PATTERN.captures(raw) {
            Some(caps) => {
                let server = caps.get(1).map(|m| m.as_str());
                let template = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                Address {
                    server_id: server,
                    template,
                }
            }
            None => Address {
                server_id: None,
                template: raw,
            },
        }
    }

    /// The server id this address targets, the default one if none is named
    pub fn target(&self) -> &'a str {
        self.server_id.unwrap_or(DEFAULT_SERVER_ID)
    }
}

/// An address resolved against a registry
#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    pub server_id: String,
    pub template: String,
    /// `None` when the id is not registered
    pub server: Option<Arc<ServerHandle>>,
}

impl ResolvedAddress {
    /// The resolved server, or an address resolution error naming the id
    pub fn require_server(&self) -> Result<&Arc<ServerHandle>> {
        self.server
            .as_ref()
            .ok_or_else(|| BridgeError::AddressResolution(self.server_id.clone()))
    }
}

/// Splits `address` and looks its server up in `registry`
///
/// A miss is logged and returned as `server: None`; the caller fails when it
/// tries to execute.
pub fn resolve(registry: &ServerRegistry, address: &str) -> ResolvedAddress {
    let parsed = Address::parse(address);
    let server_id = parsed.target();
    let server = registry.get(server_id);
    if server.is_none() {
        error!("no SQL server found.[{}]", address);
    }

    ResolvedAddress {
        server_id: server_id.to_string(),
        template: parsed.template.to_string(),
        server,
    }
}
