//! oxbow-node: DHT peer daemon with an interactive operator console.

use oxbow_node::{Console, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oxbow=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = NodeConfig::load()?;
    Console::new(config).run().await
}
