//! Local-intercept catalogue.
//!
//! A closed set of queries that common drivers and ORMs send for
//! introspection is answered from canned result sets without a backend round
//! trip. Matching is by whitespace-normalised exact SQL text. The table is
//! built once at startup and only ever read afterwards.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::codec::oid;

/// The adapter's reported server version.
pub const SERVER_VERSION: &str = "14.1";

/// A canned result set: text-format cells only.
#[derive(Debug, Clone)]
pub struct CannedResult {
    pub fields: Vec<(&'static str, u32)>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CannedResult {
    fn single_text(field: &'static str, value: &str) -> CannedResult {
        CannedResult {
            fields: vec![(field, oid::TEXT)],
            rows: vec![vec![Some(value.to_string())]],
        }
    }

    fn empty(fields: Vec<(&'static str, u32)>) -> CannedResult {
        CannedResult {
            fields,
            rows: Vec::new(),
        }
    }
}

/// Collapse all whitespace runs to single spaces and trim; the catalogue is
/// keyed on this canonical form. A trailing semicolon is dropped.
pub fn normalise(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last_was_space = true;
    for c in sql.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    let trimmed = out.trim_end_matches([' ', ';']);
    trimmed.to_string()
}

fn version_string() -> String {
    format!("PostgreSQL {SERVER_VERSION} (adapter)")
}

static INTERCEPTS: Lazy<HashMap<String, CannedResult>> = Lazy::new(|| {
    let mut table = HashMap::new();

    // Driver version probes.
    for sql in ["SELECT version()", "SELECT pg_catalog.version()"] {
        table.insert(
            normalise(sql),
            CannedResult::single_text("version", &version_string()),
        );
    }
    table.insert(
        normalise("SHOW server_version"),
        CannedResult::single_text("server_version", SERVER_VERSION),
    );

    // Schema probes: a single flat namespace.
    table.insert(
        normalise("SELECT current_schema()"),
        CannedResult::single_text("current_schema", "public"),
    );
    table.insert(
        normalise("SELECT current_schema"),
        CannedResult::single_text("current_schema", "public"),
    );

    // Django's migration-table discovery query. Returning no relations stops
    // the ORM from attempting migrations, which the backend does not support.
    table.insert(
        normalise(
            "SELECT c.relname, CASE WHEN c.relispartition THEN 'p' WHEN c.relkind IN ('m', 'v') \
             THEN 'v' ELSE 't' END FROM pg_catalog.pg_class c LEFT JOIN pg_catalog.pg_namespace n \
             ON n.oid = c.relnamespace WHERE c.relkind IN ('f', 'm', 'p', 'r', 'v') AND n.nspname \
             NOT IN ('pg_catalog', 'pg_toast') AND pg_catalog.pg_table_is_visible(c.oid)",
        ),
        CannedResult::empty(vec![("relname", oid::TEXT), ("case", oid::TEXT)]),
    );

    // JDBC type-map bootstrap; an empty answer makes the driver fall back to
    // its built-in defaults, which match the fixed type set served here.
    table.insert(
        normalise(
            "SELECT typinput='pg_catalog.array_in'::regproc as is_array, typtype, typname, \
             pg_type.oid FROM pg_catalog.pg_type LEFT JOIN (select ns.oid as nspoid, ns.nspname, \
             r.r from pg_namespace as ns join ( select s.r, (current_schemas(false))[s.r] as \
             nspname from generate_series(1, array_upper(current_schemas(false), 1)) as s(r) ) as \
             r using ( nspname ) ) as sp ON sp.nspoid = typnamespace WHERE pg_type.oid = $1 ORDER \
             BY sp.r, pg_type.oid DESC",
        ),
        CannedResult::empty(vec![
            ("is_array", oid::BOOL),
            ("typtype", oid::TEXT),
            ("typname", oid::TEXT),
            ("oid", oid::INT8),
        ]),
    );

    // SQLAlchemy / asyncpg transaction-status probe.
    table.insert(
        normalise("SELECT pg_catalog.pg_is_in_recovery()"),
        CannedResult {
            fields: vec![("pg_is_in_recovery", oid::BOOL)],
            rows: vec![vec![Some("f".to_string())]],
        },
    );

    table
});

/// Look up a canned answer for the statement, if it is in the catalogue.
pub fn lookup(sql: &str) -> Option<&'static CannedResult> {
    INTERCEPTS.get(&normalise(sql))
}
