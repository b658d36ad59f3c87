//! Tool host runner
//!
//! Entry point for the `toolhost` binary: logging setup, wiring of the
//! settings, engine, registry and dispatcher, and the subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::serve::serve;
use crate::cli::{Cli, Command};
use crate::dispatch::ToolDispatcher;
use crate::mcp::{StdioLauncher, ToolServerRegistry};
use crate::process::CommandExecutionEngine;
use crate::settings::SettingsManager;
use crate::types::ToolServerConfig;

// OpenTelemetry imports (only when feature is enabled)
#[cfg(feature = "otel")]
use opentelemetry::global;
#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace::SdkTracerProvider;

// Global storage for OpenTelemetry provider (for proper shutdown)
#[cfg(feature = "otel")]
static OTEL_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

/// Shutdown OpenTelemetry provider (flush all pending spans)
///
/// Call before the process exits so buffered spans reach the collector.
#[cfg(feature = "otel")]
pub fn shutdown_otel() {
    if let Some(provider) = OTEL_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry provider...");
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        } else {
            tracing::info!("OpenTelemetry provider shutdown complete");
        }
    }
}

/// Shutdown OpenTelemetry provider (no-op when feature is disabled)
#[cfg(not(feature = "otel"))]
pub fn shutdown_otel() {}

/// Initialize OpenTelemetry tracer provider with a batch OTLP exporter
#[cfg(feature = "otel")]
fn init_otel(endpoint: &str, service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }

    let level = cli.log_level();
    tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
}

/// Install the subscriber: filter, one fmt layer, and the OTLP layer if enabled
fn install_subscriber<L>(cli: &Cli, fmt_layer: L) -> anyhow::Result<()>
where
    L: tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(fmt_layer);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = cli.otel_endpoint.as_deref().filter(|_| cli.is_otel_enabled()) {
            let service_name = &cli.otel_service_name;
            eprintln!(
                "OpenTelemetry enabled: endpoint={}, service={}",
                endpoint, service_name
            );

            let provider = init_otel(endpoint, service_name)?;
            let tracer = provider.tracer("assistant-toolhost");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            drop(OTEL_PROVIDER.set(provider));

            registry.with(otel_layer).with(build_env_filter(cli)).try_init()?;
            return Ok(());
        }
    }

    registry.with(build_env_filter(cli)).try_init()?;
    Ok(())
}

/// Initialize logging with file output (diagnostic mode)
fn init_logging_to_file(cli: &Cli) -> anyhow::Result<()> {
    let log_path = cli.log_path();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;

    // stdout carries tool results, so the log location goes to stderr
    eprintln!("Diagnostic mode: logging to {}", log_path.display());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false);

    install_subscriber(cli, fmt_layer)
}

/// Initialize logging with stderr output (normal mode)
fn init_logging_to_stderr(cli: &Cli) -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    install_subscriber(cli, fmt_layer)
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    if cli.is_diagnostic() {
        init_logging_to_file(cli)
    } else {
        init_logging_to_stderr(cli)
    }
}

/// Everything a subcommand needs
#[derive(Debug)]
struct Host {
    dispatcher: ToolDispatcher,
    servers: Vec<ToolServerConfig>,
}

impl Host {
    /// Load settings for `cli` and wire the engine, registry and dispatcher
    fn build(cli: &Cli) -> anyhow::Result<Self> {
        let cwd: PathBuf = cli.working_dir().context("cannot determine working directory")?;
        let settings = SettingsManager::with_extra_file(&cwd, cli.settings.as_deref())?;

        let execution = settings.execution_config();
        let servers = settings.tool_server_configs();
        tracing::info!(
            cwd = %cwd.display(),
            shell = %execution.shell,
            allowed_patterns = execution.allowed_patterns.len(),
            tool_servers = servers.len(),
            "Settings loaded"
        );

        let engine = Arc::new(CommandExecutionEngine::new(execution));
        let launcher = StdioLauncher::new().with_cwd(cwd.clone());
        let registry = Arc::new(ToolServerRegistry::new(Arc::new(launcher)));
        let dispatcher = ToolDispatcher::new(cwd, engine, registry, servers.clone());

        Ok(Self {
            dispatcher,
            servers,
        })
    }

    async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Serve => {
                tracing::info!("Waiting for tool invocations on stdin...");
                let stdin = BufReader::new(tokio::io::stdin());
                serve(&self.dispatcher, stdin, tokio::io::stdout()).await
            }
            Command::Tools => {
                let definitions = self.dispatcher.tool_definitions().await?;
                print_json(&definitions).await
            }
            Command::Exec { line } => {
                let request = json!({
                    "type": "execute_command",
                    "command": line.join(" "),
                });
                let result = self.dispatcher.dispatch(request).await?;
                print_json(&result).await?;
                if result.is_error {
                    anyhow::bail!("command failed");
                }
                Ok(())
            }
            Command::TestServer { name } => {
                let config = self
                    .servers
                    .iter()
                    .find(|server| server.name == name)
                    .with_context(|| format!("no tool server named '{name}' in settings"))?;
                let diagnostic = self.dispatcher.registry().test_connection(config).await;
                print_json(&diagnostic).await?;
                if !diagnostic.success {
                    anyhow::bail!("connection to '{name}' failed");
                }
                Ok(())
            }
        }
    }
}

async fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut encoded = serde_json::to_string_pretty(value)?;
    encoded.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(encoded.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let sigterm = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down..."),
        () = sigterm => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

/// Run the tool host with CLI arguments
///
/// Initializes logging, builds the host from settings and runs the selected
/// subcommand. Live command processes and tool servers are shut down when
/// the subcommand ends or a termination signal arrives.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    let startup_time = std::time::Instant::now();

    // Initialize logging first (must happen before any tracing)
    init_logging(cli)?;

    {
        let startup_span = tracing::info_span!(
            "host_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            diagnostic = %cli.is_diagnostic(),
            otel_enabled = %cli.is_otel_enabled(),
        );
        let _enter = startup_span.enter();

        tracing::info!("========== Tool Host Starting ==========");
        tracing::info!(
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            command = ?cli.command(),
            "Host process info"
        );

        if cli.is_diagnostic() {
            tracing::info!(
                log_path = %cli.log_path().display(),
                "Diagnostic mode enabled"
            );
        }

        if let Some(otel_endpoint) = &cli.otel_endpoint {
            tracing::info!(
                otel_endpoint = %otel_endpoint,
                "OpenTelemetry tracing enabled"
            );
        }

        tracing::info!(
            init_elapsed_ms = startup_time.elapsed().as_millis(),
            "Logging initialized"
        );
    }

    let host = Host::build(cli)?;
    emit_host_ready_trace(startup_time.elapsed()).await;

    let result = tokio::select! {
        result = host.run(cli.command()) => result,
        () = shutdown_signal() => Ok(()),
    };

    host.dispatcher.shutdown().await;
    emit_host_shutdown_trace(startup_time.elapsed()).await;

    result
}

/// Short-lived span marking the host as ready
#[tracing::instrument(name = "host_ready", skip_all, fields(
    startup_ms = %startup_duration.as_millis(),
    version = %env!("CARGO_PKG_VERSION"),
    pid = %std::process::id(),
))]
async fn emit_host_ready_trace(startup_duration: std::time::Duration) {
    tracing::info!(
        startup_ms = startup_duration.as_millis(),
        "Host ready"
    );
    // Give the batch exporter a moment to pick the span up
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}

#[tracing::instrument(name = "host_shutdown", skip_all, fields(
    uptime_secs = %total_uptime.as_secs(),
    uptime_ms = %total_uptime.as_millis(),
))]
async fn emit_host_shutdown_trace(total_uptime: std::time::Duration) {
    tracing::info!(
        uptime_secs = total_uptime.as_secs(),
        uptime_ms = total_uptime.as_millis(),
        "========== Tool Host Shutdown Complete =========="
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_rust_log_overrides_cli_level() {
        let cli = Cli {
            quiet: true,
            ..Default::default()
        };

        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::set_var("RUST_LOG", "toolhost=trace") };
        let filter = build_env_filter(&cli);
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(filter.to_string(), "toolhost=trace");

        let filter = build_env_filter(&cli);
        assert!(filter.to_string().contains("error"));
    }

    #[test]
    #[serial]
    fn test_host_build_reads_cwd_settings() {
        let dir = TempDir::new().unwrap();
        let settings_dir = dir.path().join(".toolhost");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(
            settings_dir.join("settings.json"),
            r#"{"mcpServers": {"docs": {"command": "docs-server", "args": ["--stdio"]}}}"#,
        )
        .unwrap();

        let cli = Cli {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let host = Host::build(&cli).unwrap();

        assert_eq!(host.dispatcher.cwd(), dir.path());
        assert_eq!(host.servers.len(), 1);
        assert_eq!(host.servers[0].name, "docs");
    }

    #[test]
    #[serial]
    fn test_host_build_rejects_missing_settings_file() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            cwd: Some(dir.path().to_path_buf()),
            settings: Some(dir.path().join("absent.json")),
            ..Default::default()
        };
        assert!(Host::build(&cli).is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_unknown_test_server_name() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let host = Host::build(&cli).unwrap();

        let err = host
            .run(Command::TestServer {
                name: "nope".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no tool server named 'nope'"));
    }
}
