//! # waylay-hub
//!
//! Hub binary: one bus, a hook router seeded from settings, and the
//! WebSocket bridge server that lets peers join the bus.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use waylay_bridge::server::{self, ServerConfig};
use waylay_bus::bus::EventBus;
use waylay_hooks::router::HookRouter;
use waylay_settings::{HookSettings, ServerSettings, WaylaySettings};

/// How long shutdown waits for the server task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// waylay hub.
#[derive(Parser, Debug)]
#[command(name = "waylay", about = "waylay interception hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.waylay/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_settings: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(waylay_settings::settings_path)
    }

    /// Flags win over file and environment.
    fn apply(&self, settings: &mut WaylaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        ws_path: settings.ws_path.clone(),
        outbound_capacity: settings.outbound_capacity,
        ping_interval: Duration::from_millis(settings.ping_interval_ms),
    }
}

/// Router over `bus` with the configured rules, attached. Rules are added in
/// file order, so the last one is evaluated first.
fn seeded_router(bus: &EventBus, hooks: &HookSettings) -> Result<HookRouter> {
    let router = HookRouter::new(bus);
    for setup in &hooks.default_rules {
        let _ = router
            .add_rule(setup)
            .with_context(|| format!("Invalid default rule '{}'", setup.uuid_mask))?;
    }
    router.attach();
    Ok(router)
}

/// Periodically drop queued captures whose interceptor has stopped waiting.
fn spawn_pruner(router: HookRouter, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let _ = ticker.tick().await;
            let pruned = router
                .queue()
                .prune_expired(chrono::Utc::now().timestamp_millis());
            if pruned > 0 {
                tracing::debug!(pruned, queued = router.queue().len(), "pruned expired captures");
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path();
    let mut settings = waylay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    if args.print_settings {
        println!(
            "{}",
            serde_json::to_string_pretty(&settings).context("Failed to encode settings")?
        );
        return Ok(());
    }

    if settings.logging.json {
        waylay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        waylay_core::logging::init_subscriber(&settings.logging.level);
    }

    let bus = EventBus::new();
    let router = seeded_router(&bus, &settings.hooks)?;
    tracing::info!(
        bus = %bus.id().short(),
        rules = router.rules().len(),
        "hook router ready"
    );
    let pruner = spawn_pruner(
        router.clone(),
        Duration::from_millis(settings.hooks.prune_interval_ms),
    );

    let handle = server::start(server_config(&settings.server), &bus)
        .await
        .context("Failed to start bridge server")?;
    tracing::info!("waylay hub listening on {}", handle.ws_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!(queued = router.queue().len(), "Shutting down...");
    handle.shutdown(SHUTDOWN_TIMEOUT).await;
    pruner.abort();
    router.detach();

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waylay_core::hooks::{HookAction, HookSetup};
    use waylay_core::protocol::{CaptureEvent, CapturePayload};

    fn expiring_capture(invocation: &str, expire_at: i64) -> CaptureEvent {
        CaptureEvent {
            interceptor_uuid: "icpt".into(),
            invocation_uuid: invocation.into(),
            source_uuid: Vec::new(),
            payload: CapturePayload::Call {
                args: vec![json!(1)],
                dispatch_options_arguments: None,
            },
            dispatch_option_override: None,
            expire_at: Some(expire_at),
        }
    }

    // ── CLI ──

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["waylay"]);
        let mut settings = WaylaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, WaylaySettings::default());
        assert!(!cli.print_settings);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "waylay",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = WaylaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["waylay", "--settings", "/tmp/waylay.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/tmp/waylay.json"));

        let cli = Cli::parse_from(["waylay"]);
        assert!(cli.settings_path().ends_with(".waylay/settings.json"));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["waylay", "--port", "70000"]).is_err());
    }

    // ── wiring ──

    #[test]
    fn server_config_from_settings() {
        let settings = ServerSettings {
            port: 9100,
            ws_path: "/bus".into(),
            outbound_capacity: 8,
            ping_interval_ms: 1500,
            ..ServerSettings::default()
        };
        let config = server_config(&settings);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9100);
        assert_eq!(config.ws_path, "/bus");
        assert_eq!(config.outbound_capacity, 8);
        assert_eq!(config.ping_interval, Duration::from_millis(1500));
    }

    #[test]
    fn settings_file_drives_router_seeding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"hooks": {"defaultRules": [
                {"uuidMask": ".*"},
                {"uuidMask": "^health", "action": "pass-through"}
            ]}}"#,
        )
        .unwrap();
        let settings = waylay_settings::load_settings_from_path(&path).unwrap();

        let router = seeded_router(&EventBus::new(), &settings.hooks).unwrap();
        let rules = router.rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].mask(), "^health");
        assert_eq!(rules[0].action(), HookAction::PassThrough);
        assert_eq!(rules[1].mask(), ".*");
        assert!(router.is_attached());
    }

    #[test]
    fn invalid_default_rule_is_reported() {
        let hooks = HookSettings {
            default_rules: vec![HookSetup::new("(unclosed", HookAction::Suspend)],
            ..HookSettings::default()
        };
        let err = seeded_router(&EventBus::new(), &hooks).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[tokio::test]
    async fn pruner_drops_expired_captures() {
        let router = HookRouter::new(&EventBus::new());
        let now = chrono::Utc::now().timestamp_millis();
        router.queue().push(expiring_capture("stale", now - 1000));
        router.queue().push(expiring_capture("fresh", now + 60_000));

        let pruner = spawn_pruner(router.clone(), Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), async {
            while router.queue().len() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        pruner.abort();

        assert!(router.queue().get(&"fresh".into()).is_some());
        assert!(router.queue().get(&"stale".into()).is_none());
    }
}
