use std::env;

use kestrel_server::KestrelServer;
use kestrel_server::config::AppConfig;
use kestrel_server::config::loader::load_config;
use kestrel_server::observability;

const CONFIG_ENV: &str = "KESTREL_CONFIG";
const DEFAULT_CONFIG: &str = "kestrel.toml";

/// Where the configuration path came from.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    CliArgument,
    EnvironmentVariable,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable ({CONFIG_ENV})"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        let missing = matches!(&e, dotenvy::Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound);
        if !missing {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    if env::args().any(|arg| arg == "--print-config") {
        print_config(&cfg);
        return;
    }

    tracing::info!(path = %config_path, source = %source, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = match KestrelServer::new(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}

/// Priority: `--config <path>`, then `KESTREL_CONFIG`, then `kestrel.toml`.
fn resolve_config_path() -> (String, ConfigSource) {
    let args: Vec<String> = env::args().skip(1).collect();
    if let Some(path) = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
    {
        return (path.clone(), ConfigSource::CliArgument);
    }

    match env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => (path, ConfigSource::EnvironmentVariable),
        _ => (DEFAULT_CONFIG.to_string(), ConfigSource::Default),
    }
}

/// Prints the effective configuration with client secrets masked.
fn print_config(cfg: &AppConfig) {
    let mut cfg = cfg.clone();
    for client in &mut cfg.clients {
        if client.client_secret.is_some() {
            client.client_secret = Some("********".to_string());
        }
    }
    match toml::to_string_pretty(&cfg) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            std::process::exit(1);
        }
    }
}
