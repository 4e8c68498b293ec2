use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use consult::config::{Config, SecurityConfig};
use consult::notifications::{ConfiguredMailer, NotificationOutbox, NotificationWorker};
use consult::security::{
    Clock, RateLimitCleanupService, SecurityGuard, SecuritySweepService, SystemClock,
    ThreatContext, sanitize_input,
};
use consult::store::{AppointmentStore, InMemoryStore, OrderStore, PostgrestStore};
use consult::webhook::PaymentReconciler;
use consult::{Error, Result, server};

#[derive(Parser)]
#[command(name = "consult", about = "Practice backend: security checks and payment webhooks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and security endpoints
    Serve {
        /// Address to bind, overriding SERVER_BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Score a piece of text for injection patterns
    Analyze {
        text: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        method: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the sanitized form of a piece of text
    Sanitize {
        text: String,
        #[arg(long, default_value_t = SecurityConfig::default().max_input_length)]
        max_length: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = Config::from_env()?;
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            consult::init_with_config(&config.logging)?;

            match config.database.credentials() {
                Some((url, key)) => {
                    let store = Arc::new(PostgrestStore::new(url, key));
                    serve(config.clone(), store).await?
                }
                None => {
                    tracing::warn!("⚠️  DATABASE_URL not set; using the in-memory store");
                    serve(config, Arc::new(InMemoryStore::new())).await?
                }
            }
        }
        Commands::Analyze {
            text,
            ip,
            user_agent,
            path,
            method,
            json,
        } => {
            consult::init()?;
            let guard = SecurityGuard::new(SecurityConfig::default());
            let context = ThreatContext {
                ip,
                user_agent,
                path,
                method,
            };
            let (analysis, response) = guard.analyze(&text, &context);

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "analysis": analysis,
                        "response": response,
                    }))?
                );
            } else {
                println!("Threat level: {:?}", analysis.threat_level);
                println!("Risk score:   {}", analysis.risk_score);
                println!("Action:       {}", response.action.as_str());
                for threat in &analysis.detected_threats {
                    println!("  - {threat}");
                }
                for recommendation in &analysis.recommendations {
                    println!("  > {recommendation}");
                }
            }
        }
        Commands::Sanitize { text, max_length } => {
            consult::init()?;
            println!("{}", sanitize_input(&text, max_length));
        }
    }

    Ok(())
}

async fn serve<S>(config: Config, store: Arc<S>) -> Result<()>
where
    S: AppointmentStore + OrderStore + Send + Sync + 'static,
{
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let guard = SecurityGuard::with_clock(config.security.clone(), clock.clone());

    let outbox = Arc::new(NotificationOutbox::new(clock.clone()));
    let worker = NotificationWorker::new(
        outbox.clone(),
        Arc::new(ConfiguredMailer::from_config(&config.email)?),
        config.email.notifications.clone(),
        config.email.admin_address.clone(),
        clock.clone(),
    );
    let (worker_stop, worker_stop_rx) = mpsc::channel(1);
    let worker_handle = tokio::spawn(worker.run(worker_stop_rx));

    let (cleanup_stop, cleanup_stop_rx) = mpsc::channel(1);
    let cleanup = RateLimitCleanupService::new(
        guard.rate_limiter().clone(),
        cleanup_stop_rx,
        config.security.cleanup_interval(),
    );
    let cleanup_handle = tokio::spawn(cleanup.run());

    let (sweep_stop, sweep_stop_rx) = mpsc::channel(1);
    let sweep = SecuritySweepService::new(&guard, sweep_stop_rx, config.security.cleanup_interval());
    let sweep_handle = tokio::spawn(sweep.run());

    let reconciler = PaymentReconciler::from_config(
        store,
        &config.payment,
        outbox,
        guard.events().clone(),
        clock,
    );
    let app = server::create_router(reconciler, guard);

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .map_err(|e| Error::configuration(format!("cannot bind {}: {e}", config.server.bind_addr)))?;
    tracing::info!("🚀 Listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown signal received");
        })
        .await
        .map_err(|e| Error::internal(format!("server error: {e}")))?;

    let _ = worker_stop.send(()).await;
    let _ = cleanup_stop.send(()).await;
    let _ = sweep_stop.send(()).await;
    let _ = tokio::join!(worker_handle, cleanup_handle, sweep_handle);

    Ok(())
}
