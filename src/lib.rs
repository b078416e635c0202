//! pg_bridge: a PostgreSQL wire-protocol adapter for SQL backends that have
//! no native wire protocol. The listener, TLS and authentication live in the
//! embedding process; this crate owns everything from the first post-auth
//! frame to session teardown.

pub mod backend;
pub mod codec;
pub mod config;
pub mod copy;
pub mod errors;
pub mod messages;
pub mod session;
pub mod sql;

pub use backend::BackendConnection;
pub use config::Config;
pub use errors::{Error, PgError};
pub use session::{registry, Session};
