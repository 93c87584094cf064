use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

mod api;
mod cli;
mod engine;
mod error;
mod metrics;
mod models;
mod services;
mod state;

use cli::CommandArgs;
use engine::{Monitor, Stores, WatchdogHandle};
use metrics::METRICS;
use services::{EventLog, SettingsStore, SystemClock, SystemProcesses, TargetStore};
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let stores = Stores {
        settings: SettingsStore::new(args.settings_path()),
        targets: TargetStore::new(args.targets_path()),
    };
    let settings = stores.settings.load_or_default();
    log::info!("Loaded settings from {}", stores.settings.path().display());
    let targets = stores.targets.load_or_default();
    log::info!(
        "Loaded {} monitored application(s) from {}",
        targets.len(),
        stores.targets.path().display()
    );

    let monitor = Monitor::new(
        Arc::new(SystemProcesses::new()),
        Arc::new(SystemClock),
        EventLog::new(),
        settings,
        targets,
    );
    let watchdog = WatchdogHandle::spawn(monitor, Some(stores));

    // Keep the gauges in step with every published snapshot
    let mut snapshots = watchdog.subscribe_snapshots();
    actix_web::rt::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            METRICS.observe(&snapshot);
        }
    });

    if args.autostart {
        let snapshot = watchdog.snapshot();
        if snapshot.enabled_count > 0 {
            if let Err(e) = watchdog.start().await {
                log::warn!("Autostart failed: {}", e);
            }
        } else {
            log::info!("Autostart skipped, no application is enabled");
        }
    }

    print_banner(&args);

    let state = new_state(watchdog.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(api::configure)
    })
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run();

    let result = server.await.context("HTTP server failed");

    log::info!("Shutting down, saving state...");
    watchdog.shutdown().await;
    result
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      CPU Watchdog v{:<39}║", env!("CARGO_PKG_VERSION"));
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!("📁 Settings: {}", args.settings_path().display());
    println!("📁 Applications: {}", args.targets_path().display());
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/targets                     - Snapshot of all applications");
    println!("  POST   /api/targets                     - Add an application");
    println!("  DELETE /api/targets/{{name}}              - Remove an application");
    println!("  POST   /api/targets/{{name}}/toggle       - Enable/disable monitoring");
    println!("  PUT    /api/targets/{{name}}/executable   - Set the executable path");
    println!("  POST   /api/targets/{{name}}/reset-timer  - Reset the CPU threshold timer");
    println!("  POST   /api/targets/discover            - Discover executable paths");
    println!("  POST   /api/targets/probe               - Sample CPU once");
    println!("  POST   /api/monitor/{{start|pause|resume|stop}}");
    println!("  GET    /api/settings                    - Current settings");
    println!("  PUT    /api/settings                    - Update settings (stopped only)");
    println!("  GET    /api/events                      - Recent log lines");
    println!("  GET    /metrics                         - Prometheus metrics");
    println!("  GET    /health                          - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
