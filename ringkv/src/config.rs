// Peer configuration (§6), parsed with `clap::Parser` in the idiom of the
// pack's server binaries. The legacy CLI shape -- `-<coordinator-address>`
// optionally followed by `-client` -- is kept as two positional arguments
// rather than translated into `--flag` form, per §6's explicit requirement
// that the reference shape still parses.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use ringkv_base::{err_kind, Kind, Result};
use ringkv_node::NodeConfig;

#[derive(Parser, Debug)]
#[command(name = "ringkv", version, about = "Distributed key-value store peer")]
pub struct Config {
    /// Coordinator address, e.g. `-127.0.0.1`.
    pub coordinator_arg: String,

    /// `-client` selects the Client role; absent means Node, unless
    /// `--coordinator` is also given.
    pub role_arg: Option<String>,

    /// This peer's own bind address.
    #[arg(long, env = "KVRING_ADDRESS", default_value = "127.0.0.1")]
    pub address: Ipv4Addr,

    /// Run as the Coordinator rather than a data-bearing Node.
    #[arg(long)]
    pub coordinator: bool,

    #[arg(long, env = "KVRING_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "KVRING_REPLICATION_FACTOR", default_value_t = 2)]
    pub replication_factor: usize,

    #[arg(long, env = "KVRING_DEFAULT_RING_SIZE", default_value_t = 3)]
    pub default_ring_size: usize,

    #[arg(long, env = "KVRING_NETWORK_TIMEOUT_MS", default_value_t = 2000)]
    pub network_timeout_ms: u64,

    #[arg(long, env = "KVRING_STORE_PATH", default_value = ":memory:")]
    pub store_path: String,

    /// Emit structured JSON logs instead of human-readable ones.
    #[arg(long, env = "KVRING_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn coordinator_address(&self) -> Result<Ipv4Addr> {
        let stripped = self.coordinator_arg.strip_prefix('-').ok_or_else(|| {
            err_kind(
                Kind::Other,
                format!("coordinator address must look like -127.0.0.1, got {}", self.coordinator_arg),
            )
        })?;
        stripped
            .parse()
            .map_err(|e| err_kind(Kind::Other, format!("bad coordinator address: {e}")))
    }

    pub fn is_client(&self) -> bool {
        self.role_arg.as_deref() == Some("-client")
    }

    pub fn to_node_config(&self) -> NodeConfig {
        NodeConfig {
            port: self.port,
            replication_factor: self.replication_factor,
            default_ring_size: self.default_ring_size,
            network_timeout: Duration::from_millis(self.network_timeout_ms),
            store_path: self.store_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Config::command().debug_assert();
    }

    #[test]
    fn coordinator_address_strips_leading_dash() {
        let config = Config {
            coordinator_arg: "-127.0.0.1".to_string(),
            role_arg: None,
            address: Ipv4Addr::new(127, 0, 0, 2),
            coordinator: false,
            port: 8080,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout_ms: 2000,
            store_path: ":memory:".to_string(),
            log_json: false,
        };
        assert_eq!(config.coordinator_address().unwrap(), Ipv4Addr::new(127, 0, 0, 1));
        assert!(!config.is_client());
    }

    #[test]
    fn role_arg_selects_client() {
        let config = Config {
            coordinator_arg: "-127.0.0.1".to_string(),
            role_arg: Some("-client".to_string()),
            address: Ipv4Addr::new(127, 0, 0, 2),
            coordinator: false,
            port: 8080,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout_ms: 2000,
            store_path: ":memory:".to_string(),
            log_json: false,
        };
        assert!(config.is_client());
    }

    #[test]
    fn malformed_coordinator_address_is_rejected() {
        let config = Config {
            coordinator_arg: "127.0.0.1".to_string(),
            role_arg: None,
            address: Ipv4Addr::new(127, 0, 0, 2),
            coordinator: false,
            port: 8080,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout_ms: 2000,
            store_path: ":memory:".to_string(),
            log_json: false,
        };
        assert!(config.coordinator_address().is_err());
    }
}
