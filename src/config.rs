//! Adapter configuration.
//!
//! Plain data loaded by the embedding process (file parsing is the caller's
//! concern); every knob has a serde default so partial configs work.

use serde_derive::{Deserialize, Serialize};

/// Per-adapter settings shared by all sessions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Ceiling on DML statements buffered into one backend batch.
    #[serde(default = "Config::default_max_batch_size")]
    pub max_batch_size: usize,

    /// Per-commit mutation ceiling applied to COPY (mutations are
    /// rows x (columns + indexed columns)).
    #[serde(default = "Config::default_copy_commit_limit")]
    pub copy_commit_limit: u64,

    /// Largest frame accepted from a client, in bytes.
    #[serde(default = "Config::default_max_message_size")]
    pub max_message_size: i32,

    /// Flush the write buffer to the socket once it crosses this size.
    #[serde(default = "Config::default_flush_threshold")]
    pub flush_threshold: usize,

    /// Seconds a session may sit idle inside an open transaction block
    /// before it is failed with a synthetic error. 0 disables the timeout.
    #[serde(default = "Config::default_idle_in_transaction_timeout_secs")]
    pub idle_in_transaction_timeout_secs: u64,

    /// Accept and echo SET for parameters the adapter does not know.
    #[serde(default = "Config::default_accept_unknown_parameters")]
    pub accept_unknown_parameters: bool,

    #[serde(default)]
    pub rewrite: RewriteConfig,
}

/// Statement rewrite toggles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RewriteConfig {
    /// Strip trailing FOR UPDATE from read-only queries.
    #[serde(default = "RewriteConfig::default_strip_for_update")]
    pub strip_for_update: bool,
}

impl Config {
    fn default_max_batch_size() -> usize {
        50
    }

    fn default_copy_commit_limit() -> u64 {
        20_000
    }

    fn default_max_message_size() -> i32 {
        crate::messages::MAX_MESSAGE_SIZE
    }

    fn default_flush_threshold() -> usize {
        8192
    }

    fn default_idle_in_transaction_timeout_secs() -> u64 {
        0
    }

    fn default_accept_unknown_parameters() -> bool {
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_batch_size: Config::default_max_batch_size(),
            copy_commit_limit: Config::default_copy_commit_limit(),
            max_message_size: Config::default_max_message_size(),
            flush_threshold: Config::default_flush_threshold(),
            idle_in_transaction_timeout_secs: Config::default_idle_in_transaction_timeout_secs(),
            accept_unknown_parameters: Config::default_accept_unknown_parameters(),
            rewrite: RewriteConfig::default(),
        }
    }
}

impl RewriteConfig {
    fn default_strip_for_update() -> bool {
        true
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig {
            strip_for_update: RewriteConfig::default_strip_for_update(),
        }
    }
}
