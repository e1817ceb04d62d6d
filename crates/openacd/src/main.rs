use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use openacd_agent_core::prelude::*;
use openacd_web_gateway::listener::{serve, ListenerState};

/// OpenACD: automatic call distribution server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP port for the agent web client
    #[arg(short, long, default_value_t = 5050)]
    port: u16,

    /// Node name announced to the cluster
    #[arg(long, default_value = "openacd@localhost")]
    node: String,

    /// Ring timeout in seconds
    #[arg(long, default_value_t = 30)]
    ringout: u64,

    /// Log Level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seed a demo agent directory (alice/secret, carol/secret as supervisor)
    #[arg(long, default_value_t = false)]
    demo_agents: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize Logging
    if std::env::var("RUST_LOG").is_err() {
        let env_filter = format!("{},openacd=debug", args.log_level);
        std::env::set_var("RUST_LOG", env_filter);
    }
    tracing_subscriber::fmt::init();

    info!("🚀 OpenACD v{} Starting...", env!("CARGO_PKG_VERSION"));
    info!("==========================================");
    info!("   🌐 HTTP Port:  {}", args.port);
    info!("   🖥️ Node:       {}", args.node);
    info!("   ⏰ Ringout:    {}s", args.ringout);
    info!("   📝 Log Level:  {}", args.log_level);
    info!("==========================================");

    // Prepare Configuration
    let mut config = AcdConfig::default();
    config.general.listen_addr = format!("0.0.0.0:{}", args.port).parse()?;
    config.general.node = args.node;
    config.agents.default_ringout_seconds = args.ringout;
    config.validate().map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    // Agent directory. Real deployments plug their own AgentAuth here.
    let auth = MemoryAuth::new();
    if args.demo_agents {
        auth.add_simple("alice", "secret", SecurityLevel::Agent);
        auth.add_simple("bob", "secret", SecurityLevel::Agent);
        auth.add_simple("carol", "secret", SecurityLevel::Supervisor);
        info!("👥 Seeded demo agent directory (alice, bob, carol)");
    }

    // Build the session core and its HTTP front door
    let registry = AgentRegistry::new(SessionSettings::new(config.clone()));
    let state = ListenerState::new(registry, Arc::new(auth), config);

    // Start the main loop
    tokio::select! {
        result = serve(state) => {
            result?;
            warn!("Listener exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received.");
        }
    }

    info!("👋 OpenACD Shutting Down");
    Ok(())
}
