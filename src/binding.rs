//! Item binding parser
//!
//! An item binding lists up to three addresses, each tagged by direction:
//! `<[addr]` reads, `>[addr]` updates and `>>[addr]` inserts. Entries are
//! separated by whitespace or commas, e.g.
//! `<[archive:SELECT v FROM t] >>[archive:INSERT INTO t VALUES (?, ?)]`.

use crate::core::{BridgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

static BINDING_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(<|>>|>)\[.*\](\s|,)*$").expect("binding shape pattern is valid"));

static BINDING_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(<|>>|>)\[(.*?)\](\s|,|$)").expect("binding entry pattern is valid"));

/// Select, update and insert addresses bound to one item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemBinding {
    pub select: Option<String>,
    pub update: Option<String>,
    pub insert: Option<String>,
}

impl ItemBinding {
    /// Parses binding text; a later entry for the same direction wins
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if !BINDING_SHAPE.is_match(text) {
            return Err(BridgeError::Binding(format!(
                "bindingConfig '{}' doesn't contain a valid binding configuration",
                text
            )));
        }

        let mut binding = ItemBinding::default();
        for caps in BINDING_ENTRY.captures_iter(text) {
            let address = caps[2].to_string();
            match &caps[1] {
                "<" => binding.select = Some(address),
                ">" => binding.update = Some(address),
                ">>" => binding.insert = Some(address),
                _ => {}
            }
        }
        Ok(binding)
    }

    /// Returns `true` if the item accepts commands
    pub fn is_writable(&self) -> bool {
        self.update.is_some() || self.insert.is_some()
    }
}

impl FromStr for ItemBinding {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        ItemBinding::parse(s)
    }
}
