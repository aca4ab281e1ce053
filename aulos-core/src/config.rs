//! Runtime configuration: an embedded default `config.toml`, optionally
//! overridden by a user config file, following the same embed-then-merge
//! pattern used for musical defaults elsewhere in this codebase.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
}

#[derive(Deserialize, Default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_packet_size: Option<usize>,
    idle_poll_interval_ms: Option<u64>,
    recv_timeout_ms: Option<u64>,
}

/// Resolved configuration for a [`crate::dispatch::MessageHandler`] plus
/// the transport that feeds it.
pub struct ServerConfig {
    section: ServerSection,
}

impl ServerConfig {
    /// Loads the embedded defaults, then merges a user config file at
    /// `$XDG_CONFIG_HOME/aulos/config.toml` (or the platform equivalent)
    /// over top of it, if one exists.
    pub fn load() -> Self {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("failed to parse embedded config.toml");

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut base.server, user.server),
                        Err(e) => {
                            log::warn!(target: "aulos_core::config", "ignoring malformed config {}: {e}", path.display())
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "aulos_core::config", "could not read config {}: {e}", path.display())
                    }
                }
            }
        }

        Self { section: base.server }
    }

    /// Overrides the bind address, e.g. to bind an ephemeral loopback port
    /// in a test harness instead of the configured production address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.section.bind_addr = Some(addr.into());
        self
    }

    /// The UDP address the transport harness should bind.
    pub fn bind_addr(&self) -> &str {
        self.section.bind_addr.as_deref().unwrap_or("0.0.0.0:9000")
    }

    /// Largest datagram the transport will accept before discarding it
    /// unread.
    pub fn max_packet_size(&self) -> usize {
        self.section.max_packet_size.unwrap_or(65_536)
    }

    /// How long the dispatch loop waits for new work before re-checking
    /// the scheduled-bundle queue.
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.section.idle_poll_interval_ms.unwrap_or(200))
    }

    /// Read timeout the UDP socket is configured with, bounding how long
    /// `close()` may take to observe a shutdown request.
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.section.recv_timeout_ms.unwrap_or(250))
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aulos").join("config.toml"))
}

fn merge(base: &mut ServerSection, user: ServerSection) {
    if user.bind_addr.is_some() {
        base.bind_addr = user.bind_addr;
    }
    if user.max_packet_size.is_some() {
        base.max_packet_size = user.max_packet_size;
    }
    if user.idle_poll_interval_ms.is_some() {
        base.idle_poll_interval_ms = user.idle_poll_interval_ms;
    }
    if user.recv_timeout_ms.is_some() {
        base.recv_timeout_ms = user.recv_timeout_ms;
    }
}
