//! Session parameters.
//!
//! Holds the negotiated parameter set, validates SET/RESET input for the
//! parameters the adapter understands, and renders ParameterStatus frames
//! for the tracked subset whenever one of them changes.

use std::collections::{HashMap, HashSet};

use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;

use crate::backend::Staleness;
use crate::codec::{CodecContext, DateStyle};
use crate::errors::{sqlstate, PgError};
use crate::messages::parameter_status;
use crate::sql::intercept::SERVER_VERSION;

/// Parameters reported to the client via ParameterStatus, both at startup
/// and whenever SET changes one of them.
static TRACKED_PARAMETERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut set = HashSet::new();
    set.insert("client_encoding");
    set.insert("DateStyle");
    set.insert("TimeZone");
    set.insert("standard_conforming_strings");
    set.insert("application_name");
    set
});

/// COPY / autocommit DML commit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmlMode {
    #[default]
    Transactional,
    PartitionedNonAtomic,
}

#[derive(Debug, Clone)]
pub struct SessionParameters {
    parameters: HashMap<String, String>,
    date_style: DateStyle,
    /// Accept and echo parameters outside the known set.
    accept_unknown: bool,
}

impl SessionParameters {
    pub fn new(accept_unknown: bool) -> SessionParameters {
        let mut parameters = HashMap::new();
        parameters.insert("client_encoding".to_string(), "UTF8".to_string());
        parameters.insert("DateStyle".to_string(), "ISO, MDY".to_string());
        parameters.insert("TimeZone".to_string(), "UTC".to_string());
        parameters.insert("server_version".to_string(), SERVER_VERSION.to_string());
        parameters.insert("server_encoding".to_string(), "UTF8".to_string());
        parameters.insert("integer_datetimes".to_string(), "on".to_string());
        parameters.insert(
            "standard_conforming_strings".to_string(),
            "on".to_string(),
        );
        parameters.insert("application_name".to_string(), String::new());
        parameters.insert("search_path".to_string(), "public".to_string());
        parameters.insert("extra_float_digits".to_string(), "1".to_string());
        parameters.insert(
            "spanner.autocommit_dml_mode".to_string(),
            "transactional".to_string(),
        );
        parameters.insert("spanner.readonly_staleness".to_string(), String::new());

        SessionParameters {
            parameters,
            date_style: DateStyle::default(),
            accept_unknown,
        }
    }

    /// Apply the client's startup parameters. Unknown or invalid values at
    /// startup are ignored rather than fatal; drivers retry SET later.
    pub fn apply_startup(&mut self, startup: &HashMap<String, String>) {
        for (key, value) in startup {
            if key == "user" || key == "database" || key == "options" {
                continue;
            }
            let _ = self.set(key, value);
        }
    }

    /// ParameterStatus frames for every tracked parameter, sent right after
    /// authentication together with server_version and friends.
    pub fn startup_messages(&self) -> BytesMut {
        let mut out = BytesMut::new();
        // Fixed order keeps the handshake deterministic for tests.
        for key in [
            "client_encoding",
            "DateStyle",
            "TimeZone",
            "application_name",
            "integer_datetimes",
            "server_encoding",
            "server_version",
            "standard_conforming_strings",
        ] {
            if let Some(value) = self.parameters.get(key) {
                out.put(parameter_status(key, value));
            }
        }
        out
    }

    /// Set a parameter. Returns the ParameterStatus frame to emit when the
    /// parameter is tracked, `None` otherwise.
    pub fn set(&mut self, name: &str, value: &str) -> Result<Option<BytesMut>, PgError> {
        let key = canonical_key(name);
        let value = validate(&key, value, self.accept_unknown)?;
        if key == "DateStyle" {
            self.date_style = DateStyle::parse(&value)?;
            let rendered = self.date_style.display();
            self.parameters.insert(key.clone(), rendered.clone());
            return Ok(Some(parameter_status("DateStyle", &rendered)));
        }

        self.parameters.insert(key.clone(), value.clone());
        if TRACKED_PARAMETERS.contains(key.as_str()) {
            Ok(Some(parameter_status(&key, &value)))
        } else {
            Ok(None)
        }
    }

    /// RESET: back to the session default.
    pub fn reset(&mut self, name: &str) -> Result<Option<BytesMut>, PgError> {
        let key = canonical_key(name);
        let default = SessionParameters::new(self.accept_unknown);
        match default.parameters.get(&key) {
            Some(value) => {
                let value = value.clone();
                self.set(&key, &value)
            }
            None => {
                self.parameters.remove(&key);
                Ok(None)
            }
        }
    }

    pub fn reset_all(&mut self) -> BytesMut {
        let fresh = SessionParameters::new(self.accept_unknown);
        let mut out = BytesMut::new();
        for key in TRACKED_PARAMETERS.iter() {
            let old = self.parameters.get(*key);
            let new = fresh.parameters.get(*key);
            if old != new {
                if let Some(value) = new {
                    out.put(parameter_status(key, value));
                }
            }
        }
        self.parameters = fresh.parameters;
        self.date_style = fresh.date_style;
        out
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.parameters.get(&canonical_key(name))
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &String)> {
        self.parameters.iter()
    }

    pub fn application_name(&self) -> &str {
        self.parameters
            .get("application_name")
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn codec_context(&self) -> CodecContext {
        CodecContext {
            date_style: self.date_style,
            timezone: self
                .parameters
                .get("TimeZone")
                .cloned()
                .unwrap_or_else(|| "UTC".to_string()),
        }
    }

    pub fn dml_mode(&self) -> DmlMode {
        match self
            .parameters
            .get("spanner.autocommit_dml_mode")
            .map(String::as_str)
        {
            Some("partitioned_non_atomic") => DmlMode::PartitionedNonAtomic,
            _ => DmlMode::Transactional,
        }
    }

    pub fn readonly_staleness(&self) -> Staleness {
        let raw = self
            .parameters
            .get("spanner.readonly_staleness")
            .map(String::as_str)
            .unwrap_or("");
        parse_staleness(raw).unwrap_or_default()
    }
}

/// Startup and SET may spell tracked keys in any case; ParameterStatus uses
/// the canonical spelling.
fn canonical_key(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "timezone" => "TimeZone".to_string(),
        "datestyle" => "DateStyle".to_string(),
        _ => lower,
    }
}

fn validate(key: &str, value: &str, accept_unknown: bool) -> Result<String, PgError> {
    let value = value.trim().trim_matches('\'').to_string();
    match key {
        "client_encoding" => {
            let upper = value.to_ascii_uppercase();
            if upper == "UTF8" || upper == "UTF-8" || upper == "UNICODE" {
                Ok("UTF8".to_string())
            } else {
                Err(PgError::new(
                    sqlstate::INVALID_PARAMETER_VALUE,
                    format!("invalid value for parameter \"client_encoding\": \"{value}\"",),
                )
                .with_detail("Only UTF8 is supported."))
            }
        }
        "search_path" => {
            let ok = value.is_empty()
                || value.split(',').all(|part| {
                    let part = part.trim().trim_matches('"');
                    part == "public" || part == "pg_catalog"
                });
            if ok {
                Ok(value)
            } else {
                Err(PgError::new(
                    sqlstate::INVALID_PARAMETER_VALUE,
                    format!("invalid value for parameter \"search_path\": \"{value}\""),
                )
                .with_detail("Only the public schema is available."))
            }
        }
        "spanner.autocommit_dml_mode" => {
            let lower = value.to_ascii_lowercase();
            if lower == "transactional" || lower == "partitioned_non_atomic" {
                Ok(lower)
            } else {
                Err(PgError::new(
                    sqlstate::INVALID_PARAMETER_VALUE,
                    format!(
                        "invalid value for parameter \"spanner.autocommit_dml_mode\": \"{value}\""
                    ),
                ))
            }
        }
        "spanner.readonly_staleness" => match parse_staleness(&value) {
            Some(_) => Ok(value),
            None => Err(PgError::new(
                sqlstate::INVALID_PARAMETER_VALUE,
                format!("invalid value for parameter \"spanner.readonly_staleness\": \"{value}\""),
            )),
        },
        "extra_float_digits" => match value.parse::<i32>() {
            Ok(digits) if (-15..=3).contains(&digits) => Ok(value),
            _ => Err(PgError::new(
                sqlstate::INVALID_PARAMETER_VALUE,
                format!("{value} is outside the valid range for parameter \"extra_float_digits\""),
            )),
        },
        "DateStyle" | "TimeZone" | "application_name" | "standard_conforming_strings"
        | "server_version" | "server_encoding" | "integer_datetimes" => Ok(value),
        _ if KNOWN_UNVALIDATED.contains(key) => Ok(value),
        _ => {
            if accept_unknown {
                Ok(value)
            } else {
                Err(PgError::new(
                    sqlstate::UNDEFINED_OBJECT,
                    format!("unrecognized configuration parameter \"{key}\""),
                ))
            }
        }
    }
}

/// Parameters accepted without value validation.
static KNOWN_UNVALIDATED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut set = HashSet::new();
    set.insert("statement_timeout");
    set.insert("lock_timeout");
    set.insert("idle_in_transaction_session_timeout");
    set.insert("default_transaction_isolation");
    set.insert("default_transaction_read_only");
    set
});

fn parse_staleness(raw: &str) -> Option<Staleness> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("strong") {
        return Some(Staleness::Strong);
    }
    let (keyword, rest) = trimmed.split_once(' ')?;
    let seconds = rest.trim().strip_suffix('s')?.parse::<u64>().ok()?;
    if keyword.eq_ignore_ascii_case("max_staleness") {
        Some(Staleness::MaxStaleness(seconds))
    } else if keyword.eq_ignore_ascii_case("exact_staleness") {
        Some(Staleness::ExactStaleness(seconds))
    } else {
        None
    }
}

/// Result of parsing a SET statement.
#[derive(Debug, PartialEq, Eq)]
pub struct SetTarget {
    pub name: String,
    pub value: String,
}

/// Parse `SET [SESSION|LOCAL] name {TO|=} value` and the `SET TIME ZONE`
/// special form. The statement text is comment-free.
pub fn parse_set(bare: &str) -> Result<SetTarget, PgError> {
    let trimmed = bare.trim().trim_end_matches(';').trim_end();
    let mut rest = strip_leading_keyword(trimmed, "SET").ok_or_else(set_syntax)?;
    for scope in ["SESSION", "LOCAL"] {
        if let Some(after) = strip_leading_keyword(rest, scope) {
            rest = after;
            break;
        }
    }

    if let Some(after) = strip_leading_keyword(rest, "TIME") {
        if let Some(after) = strip_leading_keyword(after, "ZONE") {
            return Ok(SetTarget {
                name: "TimeZone".to_string(),
                value: unquote_value(after.trim()),
            });
        }
    }

    let rest = rest.trim_start();
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '=')
        .ok_or_else(set_syntax)?;
    let name = rest[..name_end].to_string();
    let mut value_part = rest[name_end..].trim_start();
    if let Some(after) = value_part.strip_prefix('=') {
        value_part = after.trim_start();
    } else if let Some(after) = strip_leading_keyword(value_part, "TO") {
        value_part = after.trim_start();
    } else {
        return Err(set_syntax());
    }
    if value_part.is_empty() {
        return Err(set_syntax());
    }
    Ok(SetTarget {
        name,
        value: unquote_value(value_part),
    })
}

/// Parse `SHOW name`, `SHOW ALL` or `SHOW TIME ZONE`.
pub fn parse_show(bare: &str) -> Result<String, PgError> {
    let trimmed = bare.trim().trim_end_matches(';').trim_end();
    let rest = strip_leading_keyword(trimmed, "SHOW")
        .ok_or_else(|| PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in SHOW statement"))?
        .trim();
    if rest.is_empty() {
        return Err(PgError::new(
            sqlstate::SYNTAX_ERROR,
            "syntax error in SHOW statement",
        ));
    }
    if rest.eq_ignore_ascii_case("time zone") {
        return Ok("TimeZone".to_string());
    }
    Ok(rest.to_string())
}

/// Parse `RESET name`, `RESET ALL` or `RESET TIME ZONE`.
pub fn parse_reset(bare: &str) -> Result<String, PgError> {
    let trimmed = bare.trim().trim_end_matches(';').trim_end();
    let rest = strip_leading_keyword(trimmed, "RESET")
        .ok_or_else(|| PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in RESET statement"))?
        .trim();
    if rest.is_empty() {
        return Err(PgError::new(
            sqlstate::SYNTAX_ERROR,
            "syntax error in RESET statement",
        ));
    }
    if rest.eq_ignore_ascii_case("time zone") {
        return Ok("TimeZone".to_string());
    }
    Ok(rest.to_string())
}

fn set_syntax() -> PgError {
    PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in SET statement")
}

/// Remove a leading keyword (case-insensitive, word boundary).
fn strip_leading_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let text = text.trim_start();
    if text.len() < keyword.len() {
        return None;
    }
    let (head, tail) = text.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    if !tail.is_empty() && !tail.starts_with(|c: char| c.is_whitespace() || c == '=') {
        return None;
    }
    Some(tail)
}

/// SET values may be quoted, bare, or a comma list (DateStyle).
fn unquote_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return trimmed[1..trimmed.len() - 1].replace("''", "'");
    }
    if trimmed.eq_ignore_ascii_case("default") {
        return String::new();
    }
    trimmed.to_string()
}
