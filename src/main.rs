use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::engine::{self, fee, GateEngine, Journal, SystemClock};
use gatekeeper::models::vehicle::{VehicleCategory, VisitType};
use gatekeeper::store::PgStore;
use gatekeeper::{api, config, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured; a broken collector
    // must not keep the gate from starting.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "gatekeeper"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("OpenTelemetry disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Layout) => {
            print_layout(&cfg);
            Ok(())
        }
        Some(cli::Commands::Fee {
            category,
            visit_type,
        }) => {
            let category = VehicleCategory::parse(&category);
            let visit = VisitType::parse(&visit_type);
            println!(
                "{} {:?}: {}",
                category.as_str(),
                visit,
                fee::entry_fee(category, visit)
            );
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn print_layout(cfg: &config::Config) {
    println!("{:<8} {:<6} ZONE", "NUMBER", "LABEL");
    for slot in cfg.layout.fresh_slots(chrono::Utc::now()) {
        println!("{:<8} {:<6} {}", slot.number, slot.label, slot.zone.as_str());
    }
    println!("{} slots total", cfg.layout.total());
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let settings = cfg.engine_settings();
    let clock = Arc::new(SystemClock);

    let mut journal_writer = None;
    let gate = match cfg.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;

            tracing::info!("Running migrations...");
            db.migrate().await?;

            let mut slots = db.load_slots().await?;
            if slots.is_empty() {
                slots = cfg.layout.fresh_slots(chrono::Utc::now());
                db.seed_slots(&slots).await.context("seeding parking slots")?;
                tracing::info!(slots = slots.len(), "seeded parking slots from layout");
            } else if slots.len() != cfg.layout.total() as usize {
                tracing::warn!(
                    stored = slots.len(),
                    configured = cfg.layout.total(),
                    "stored slot set differs from GATE_ZONE_*_SLOTS; using stored slots"
                );
            }
            let tokens = db.load_tokens().await?;
            tracing::info!(tokens = tokens.len(), "restored gate tokens");

            let (journal, rx) = Journal::channel();
            journal_writer = Some(jobs::journal::spawn(db, rx));
            GateEngine::restore(settings, clock, journal, slots, tokens)
                .context("restoring engine state")?
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; running memory-only");
            GateEngine::new(settings, clock, Journal::disabled())
        }
    };

    let (sensors, sensor_source) = engine::events::channel(cfg.sensor_queue);
    let reconciler = jobs::reconciler::spawn(sensor_source, gate.allocator.clone());

    let sweeper = (cfg.expiry_sweep_secs > 0).then(|| {
        tracing::info!(
            every_secs = cfg.expiry_sweep_secs,
            "token expiry sweep started"
        );
        jobs::expiry::spawn(
            gate.registry.clone(),
            Duration::from_secs(cfg.expiry_sweep_secs),
        )
    });

    let state = Arc::new(AppState {
        engine: gate,
        sensors,
        config: cfg,
    });

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("gatekeeper listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Every engine handle must drop before the journal channel closes.
    if let Some(sweeper) = sweeper {
        sweeper.abort();
        let _ = sweeper.await;
    }
    if let Err(e) = reconciler.await {
        tracing::warn!("slot reconciler ended abnormally: {}", e);
    }
    if let Some(writer) = journal_writer {
        if tokio::time::timeout(Duration::from_secs(10), writer).await.is_err() {
            tracing::warn!("journal writer did not drain within 10s; recent changes may be lost");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
