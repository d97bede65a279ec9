use anyhow::Result;
use dotenvy::dotenv;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;

use signment::app::AppDeps;
use signment::cli::{Cli, Commands};
use signment::core::{config, init_logger, log_startup_configuration, metrics};
use signment::notify::worker::run_worker;
use signment::telegram::run_bot;
use signment::web::server::{start_web_server, WebState};

/// Main entry point for the Signment service
///
/// Parses CLI arguments and dispatches to the requested role. Without a
/// subcommand every role (web, bot, worker) runs in this process.
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Catch panics from background tasks so they are logged instead of
    // silently unwinding the task.
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Load .env before anything reads the environment-backed config
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            log::info!("Running web role");
            run_serve(port).await
        }
        Some(Commands::Bot { webhook }) => {
            log::info!("Running bot role (webhook: {})", webhook);
            run_bot_role(webhook).await
        }
        Some(Commands::Worker) => {
            log::info!("Running worker role");
            run_worker_role().await
        }
        None => {
            log::info!("No role specified, running web + bot + worker in one process");
            run_all().await
        }
    }
}

/// Shared startup: metrics, config banner, dependency wiring.
async fn bootstrap() -> Result<AppDeps> {
    metrics::init_metrics();
    log_startup_configuration();

    let deps = AppDeps::init()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize application: {}", e))?;

    if *config::metrics::ENABLED {
        let metrics_port = *config::metrics::PORT;
        tokio::spawn(async move {
            if let Err(e) = signment::core::metrics_server::start_metrics_server(metrics_port).await {
                log::error!("Metrics server error: {}", e);
            }
        });

        // Uptime counter ticks once a minute
        tokio::spawn(async {
            let mut ticker = interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                metrics::UPTIME_SECONDS.inc_by(60.0);
            }
        });
    } else {
        log::info!("Metrics collection disabled (METRICS_ENABLED=false)");
    }

    Ok(deps)
}

async fn run_serve(port_override: Option<u16>) -> Result<()> {
    let deps = bootstrap().await?;
    let port = port_override.unwrap_or(*config::PORT);

    spawn_keep_alive(deps.http.clone(), port);

    start_web_server(port, WebState::new(deps))
        .await
        .map_err(|e| anyhow::anyhow!("Web server error: {}", e))
}

async fn run_bot_role(webhook: bool) -> Result<()> {
    let deps = bootstrap().await?;
    run_bot(deps, webhook).await
}

async fn run_worker_role() -> Result<()> {
    let deps = bootstrap().await?;
    run_worker(deps.queue.clone(), deps.http.clone()).await;
    Ok(())
}

/// All-in-one mode: web server, worker and bot share one process and
/// one dependency set, mirroring the multi-process Procfile deployment.
async fn run_all() -> Result<()> {
    let deps = bootstrap().await?;
    let port = *config::PORT;

    let worker_deps = deps.clone();
    tokio::spawn(async move {
        run_worker(worker_deps.queue.clone(), worker_deps.http.clone()).await;
    });

    let web_state = WebState::new(deps.clone());
    tokio::spawn(async move {
        if let Err(e) = start_web_server(port, web_state).await {
            log::error!("Web server error: {}", e);
        }
    });

    spawn_keep_alive(deps.http.clone(), port);

    if config::BOT_TOKEN.is_empty() {
        log::warn!("TELEGRAM_BOT_TOKEN not set; running without the bot role");
        signal::ctrl_c().await?;
        log::info!("Shutting down gracefully...");
        Ok(())
    } else {
        run_bot(deps, false).await
    }
}

/// Periodic self-ping of /health. Keeps sleep-prone free-tier hosts
/// from idling the container out.
fn spawn_keep_alive(http: reqwest::Client, port: u16) {
    if !*config::keep_alive::ENABLED {
        return;
    }

    let url = format!("http://127.0.0.1:{}/health", port);
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config::keep_alive::INTERVAL_SECS));
        loop {
            ticker.tick().await;
            for attempt in 0..config::keep_alive::MAX_ATTEMPTS {
                match http.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        log::debug!("Keep-alive ping successful");
                        break;
                    }
                    Ok(response) => {
                        log::warn!("Keep-alive ping failed: {}", response.status());
                    }
                    Err(e) => {
                        log::warn!("Keep-alive ping error: {}", e);
                    }
                }
                tokio::time::sleep(Duration::from_secs(10 * 2u64.pow(attempt))).await;
            }
        }
    });
    log::info!("Keep-alive task started");
}
