use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use huddle_core::{
    build_router, default_surfaces, ChatProvider, EchoProvider, HuddleConfig,
    MemoryConversations, ProviderKind, RunCoordinator, ServerConfig,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let file_config = load_huddle_config();
    let mut defaults = ServerConfig::default();
    file_config.apply_to(&mut defaults);

    let config = ServerConfig {
        bind: parse_socket("HUDDLE_BIND", defaults.bind),
        heartbeat_interval: parse_duration("HUDDLE_HEARTBEAT_SECS", defaults.heartbeat_interval),
        idle_timeout: parse_duration("HUDDLE_IDLE_SECS", defaults.idle_timeout),
        outbound_capacity: parse_usize("HUDDLE_OUTBOUND_CAPACITY", defaults.outbound_capacity),
        max_tool_calls: parse_usize("HUDDLE_MAX_TOOL_CALLS", defaults.max_tool_calls),
        finalized_memory: parse_usize("HUDDLE_FINALIZED_MEMORY", defaults.finalized_memory),
        retry: defaults.retry,
    };

    let provider: Option<Arc<dyn ChatProvider>> = match file_config.provider.kind {
        ProviderKind::Echo => Some(Arc::new(EchoProvider::new(Duration::from_millis(
            file_config.provider.echo_delay_ms,
        )))),
        ProviderKind::None => None,
    };
    tracing::info!(
        provider = provider.as_ref().map(|p| p.name()).unwrap_or("none"),
        max_attempts = config.retry.max_attempts,
        "runtime configured"
    );

    let coordinator =
        RunCoordinator::from_config(&config, Arc::new(MemoryConversations::new()), provider);
    let surfaces = default_surfaces(&coordinator);
    let app = build_router(config.clone(), coordinator, surfaces);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn load_huddle_config() -> HuddleConfig {
    match HuddleConfig::load() {
        Ok(config) => config,
        Err(err) => {
            let path = HuddleConfig::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "~/.huddle/config.toml".to_string());
            tracing::warn!(%path, error = %err, "failed to load huddle config; using defaults");
            HuddleConfig::default()
        }
    }
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map(Duration::from_secs).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => v.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("HUDDLE_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("HUDDLE_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
