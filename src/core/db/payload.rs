/// Parameter Substitution Module
///
/// Turns a raw payload and a SQL template into the statement that will be
/// executed. Payloads come in two shapes:
/// - a bare scalar, bound to the template's first placeholder
/// - `k1=v1&k2=v2` named fields, written into the SQL text by [`unsafe_fill`]
///
/// Named-field payloads are spliced into the SQL without escaping. Callers
/// must only pass payloads from trusted, configuration-derived sources.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::{BridgeError, Result};

/// Field carrying the value in named-field payloads
pub const VALUE_KEY: &str = "value";
/// Field carrying the timestamp in named-field payloads
pub const TIME_KEY: &str = "time";

static NAMED_FIELDS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.*?)=(.*?)&(.*?)=(.*?)").expect("named field pattern is valid"));

/// A payload after mode detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Single-value mode: the whole payload is one scalar
    Single(String),
    /// Named-field mode: at least two `k=v` pairs joined by `&`
    Fields {
        raw: String,
        fields: HashMap<String, String>,
    },
}

impl Payload {
    /// Detects the payload mode and splits named fields
    ///
    /// Segments are split on their first `=`; a segment without `=` becomes a
    /// key with an empty value. Empty segments are dropped and a repeated key
    /// keeps its last value.
    pub fn parse(raw: &str) -> Self {
        if !NAMED_FIELDS_PATTERN.is_match(raw) {
            return Payload::Single(raw.to_string());
        }

        let mut fields = HashMap::new();
        for segment in raw.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            fields.insert(key.to_string(), value.to_string());
        }
        Payload::Fields {
            raw: raw.to_string(),
            fields,
        }
    }

    /// The payload exactly as received
    pub fn raw(&self) -> &str {
        match self {
            Payload::Single(raw) | Payload::Fields { raw, .. } => raw,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Payload::Fields { .. })
    }

    /// Looks up a named field; always `None` in single-value mode
    pub fn field(&self, key: &str) -> Option<&str> {
        match self {
            Payload::Fields { fields, .. } => fields.get(key).map(String::as_str),
            Payload::Single(_) => None,
        }
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.field(key).ok_or_else(|| {
            BridgeError::Substitution(format!("named payload '{}' has no '{}' field", self.raw(), key))
        })
    }
}

/// A statement ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Template run as-is with `value` bound to its first placeholder
    Bound { sql: String, value: String },
    /// SQL text with the payload already written in; nothing to bind
    Filled { sql: String },
}

impl Statement {
    pub fn sql(&self) -> &str {
        match self {
            Statement::Bound { sql, .. } | Statement::Filled { sql } => sql,
        }
    }
}

/// Applies a payload to an update template
///
/// Named fields rewrite every `value=?` fragment with the `value` field. A
/// named payload lacking that field falls back to single-value binding.
pub fn substitute_update(template: &str, payload: &Payload) -> Statement {
    if payload.is_named() {
        match payload.require(VALUE_KEY) {
            Ok(value) => {
                let sql = unsafe_fill::update(template, value);
                debug!("### sql:{}", sql);
                return Statement::Filled { sql };
            }
            Err(e) => warn!("{}; binding it as a single value", e),
        }
    }
    bound(template, payload)
}

/// Applies a payload to an insert template
///
/// Named fields fill the first two `?` with the `value` field and the quoted
/// `time` field. A named payload lacking either falls back to single-value
/// binding.
pub fn substitute_insert(template: &str, payload: &Payload) -> Statement {
    if payload.is_named() {
        match payload
            .require(VALUE_KEY)
            .and_then(|value| payload.require(TIME_KEY).map(|time| (value, time)))
        {
            Ok((value, time)) => {
                let sql = unsafe_fill::insert(template, value, time);
                debug!("### sql:{}", sql);
                return Statement::Filled { sql };
            }
            Err(e) => warn!("{}; binding it as a single value", e),
        }
    }
    bound(template, payload)
}

fn bound(template: &str, payload: &Payload) -> Statement {
    Statement::Bound {
        sql: template.to_string(),
        value: payload.raw().to_string(),
    }
}

/// Unsafe template fill
///
/// These functions write payload text straight into SQL. Nothing is quoted or
/// escaped beyond what is documented, so the input must be trusted.
pub mod unsafe_fill {
    use once_cell::sync::Lazy;
    use regex::{NoExpand, Regex};

    static VALUE_FRAGMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"value=.").expect("value fragment pattern is valid"));

    /// Rewrites each `value=` followed by one character to `value=<value>`
    pub fn update(template: &str, value: &str) -> String {
        let replacement = format!("value={}", value);
        VALUE_FRAGMENT
            .replace_all(template, NoExpand(&replacement))
            .into_owned()
    }

    /// Replaces the first `?` with `value` and the second with `'time'`
    ///
    /// Only two placeholders are filled; any further `?` stays in the SQL.
    pub fn insert(template: &str, value: &str, time: &str) -> String {
        let quoted_time = format!("'{}'", time);
        let fills = [value, quoted_time.as_str()];

        let mut sql = String::with_capacity(template.len() + value.len() + quoted_time.len());
        let mut last = 0;
        for ((pos, _), fill) in template.match_indices('?').zip(fills) {
            sql.push_str(&template[last..pos]);
            sql.push_str(fill);
            last = pos + 1;
        }
        sql.push_str(&template[last..]);
        sql
    }
}
