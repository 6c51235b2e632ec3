use clap::Parser;
use ringkv::config::Config;
use ringkv_base::Result;
use ringkv_node::Node;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = Config::parse();

    // Human-readable logs by default; set KVRING_LOG_JSON=1 or --log-json
    // in production, mirroring the pack's <SERVICE>_LOG_JSON toggle.
    let filter = EnvFilter::from_default_env().add_directive("ringkv=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let coordinator_address = config.coordinator_address()?;
    let node_config = config.to_node_config();

    if config.coordinator {
        tracing::info!(%coordinator_address, port = node_config.port, "starting coordinator");
        let mut node = Node::start_coordinator(coordinator_address, node_config)?;
        node.run()
    } else if config.is_client() {
        tracing::info!(%coordinator_address, "starting client");
        let mut node = Node::connect_as_client(coordinator_address, config.address, node_config);
        ringkv::repl::run(&mut node)
    } else {
        tracing::info!(%coordinator_address, address = %config.address, "joining as node");
        let mut node = Node::join_as_node(coordinator_address, config.address, node_config)?;
        node.run()
    }
}
