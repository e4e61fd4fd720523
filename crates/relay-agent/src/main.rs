//! # relay
//!
//! Relay binary: runs the server, attaches an executing client to a
//! session, or drives a session by hand.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use relay_client::{BuiltinExecutor, ClientConfig, RelayApi, RelayClient, TransportKind};
use relay_core::logging::init_with_format;
use relay_core::{RequestId, SessionCode};
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Session-scoped tool relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Session-scoped tool relay", version)]
struct Cli {
    /// Settings file (default: `~/.relay/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, overriding settings.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Attach to a session and execute its tool requests.
    Attach {
        /// Session code.
        #[arg(long)]
        code: String,
        /// Relay server URL.
        #[arg(long)]
        url: Option<String>,
        /// Poll instead of streaming.
        #[arg(long)]
        poll: bool,
    },
    /// Session management.
    Session {
        /// Relay server URL.
        #[arg(long, global = true)]
        url: Option<String>,
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Enqueue one tool call and print its response.
    Call {
        /// Session code.
        #[arg(long)]
        code: String,
        /// Relay server URL.
        #[arg(long)]
        url: Option<String>,
        /// Long-poll budget for the response, in ms.
        #[arg(long, default_value = "30000")]
        wait_ms: u64,
        /// Tool to call.
        tool: String,
        /// JSON parameters.
        #[arg(default_value = "{}")]
        params: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Create a session and print its code.
    Create {
        /// Use this code instead of a generated one.
        #[arg(long)]
        code: Option<String>,
    },
    /// Show a session's expiry.
    Show {
        /// Session code.
        code: String,
    },
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let settings = match &cli.settings {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("Failed to load settings")?,
    };
    Ok(settings)
}

fn parse_code(raw: &str) -> Result<SessionCode> {
    SessionCode::parse(raw).with_context(|| format!("Invalid session code: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(&cli)?;
    let level = cli.log_level.clone().unwrap_or_else(|| settings.logging.level.clone());
    init_with_format(&level, settings.logging.format);

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(&settings).await
        }
        Command::Attach { code, url, poll } => {
            if let Some(url) = url {
                settings.client.base_url = url;
            }
            let mut config = ClientConfig::from_settings(&settings.client, parse_code(&code)?)?;
            if poll {
                config.transport = TransportKind::Poll;
            }
            attach(config).await
        }
        Command::Session { url, action } => {
            let api = RelayApi::new(url.unwrap_or(settings.client.base_url));
            match action {
                SessionAction::Create { code } => {
                    let code = code.as_deref().map(parse_code).transpose()?;
                    let session = api.create_session(code.as_ref()).await?;
                    println!("{}", session.code);
                    info!(expires_at = %session.expires_at, "session created");
                }
                SessionAction::Show { code } => {
                    let session = api.get_session(&parse_code(&code)?).await?;
                    println!("{} expires {}", session.code, session.expires_at);
                }
            }
            Ok(())
        }
        Command::Call {
            code,
            url,
            wait_ms,
            tool,
            params,
        } => {
            let api = RelayApi::new(url.unwrap_or(settings.client.base_url));
            let code = parse_code(&code)?;
            let params: serde_json::Value =
                serde_json::from_str(&params).context("Parameters must be JSON")?;
            call(&api, &code, &tool, params, Duration::from_millis(wait_ms)).await
        }
    }
}

async fn serve(settings: &RelaySettings) -> Result<()> {
    let kv = relay_queue::open_store(&settings.server.storage, &relay_settings::relay_home())
        .context("Failed to open storage")?;
    let mut server = RelayServer::new(ServerConfig::from_settings(&settings.server), kv);
    match relay_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(err) => warn!(error = %err, "metrics recorder not installed"),
    }

    let purge = server.spawn_purge_task();
    let (addr, serving) = server.listen().await.context("Failed to bind")?;
    info!(%addr, "relay ready");

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    let _ = server.drain(vec![serving, purge]).await;
    Ok(())
}

async fn attach(config: ClientConfig) -> Result<()> {
    let code = config.session_code.clone();
    let client = RelayClient::new(config, Arc::new(BuiltinExecutor));
    let token = CancellationToken::new();
    let stopper = token.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    }));

    info!(session_code = %code, "attaching");
    client.run(token).await?;
    let stats = client.batch_stats();
    info!(
        batches = stats.total_batches,
        responses = stats.total_responses,
        failed = stats.failed_batches,
        "detached"
    );
    Ok(())
}

async fn call(
    api: &RelayApi,
    code: &SessionCode,
    tool: &str,
    params: serde_json::Value,
    wait: Duration,
) -> Result<()> {
    let request_id: RequestId = api.enqueue(code, None, tool, params).await?;
    match api.get_response(code, &request_id, wait).await? {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        None => bail!("no response for {request_id} within {}ms", wait.as_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_overrides() {
        let cli = Cli::parse_from(["relay", "serve", "--port", "9000"]);
        assert!(matches!(cli.command, Command::Serve { port: Some(9000), host: None }));
    }

    #[test]
    fn attach_requires_code() {
        assert!(Cli::try_parse_from(["relay", "attach"]).is_err());
        let cli = Cli::parse_from(["relay", "attach", "--code", "ABCD2345", "--poll"]);
        assert!(matches!(cli.command, Command::Attach { poll: true, .. }));
    }

    #[test]
    fn call_defaults_params_and_wait() {
        let cli = Cli::parse_from(["relay", "call", "--code", "ABCD2345", "echo"]);
        match cli.command {
            Command::Call { tool, params, wait_ms, .. } => {
                assert_eq!(tool, "echo");
                assert_eq!(params, "{}");
                assert_eq!(wait_ms, 30_000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["relay", "session", "create", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Command::Session { action: SessionAction::Create { code: None }, .. }
        ));
    }

    #[test]
    fn session_show_takes_code() {
        let cli = Cli::parse_from(["relay", "session", "show", "ABCD2345", "--url", "http://h:1"]);
        match cli.command {
            Command::Session { url, action: SessionAction::Show { code } } => {
                assert_eq!(url.as_deref(), Some("http://h:1"));
                assert_eq!(code, "ABCD2345");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn session_code_validation() {
        assert!(parse_code("ABCD2345").is_ok());
        assert!(parse_code("abc").is_err());
    }
}
