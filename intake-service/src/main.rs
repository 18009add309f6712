use std::fs;
use std::sync::Arc;

use anyhow::Context as _;
use dialog_flow::{InMemorySessionStore, PostgresSessionStore, SessionStore};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triage_model::{
    ClassifierDims, Device, EncoderConfig, IntakeClassifier, SpecialtyMap, SpecialtyRouter,
    TextEncoder,
};

use intake_service::booking::RandomQueue;
use intake_service::config::ServiceConfig;
use intake_service::history::FilePatientHistory;
use intake_service::server::{AppState, serve};
use intake_service::steps::build_intake_flow;
use intake_service::treatment::TreatmentEngine;

/// Initialize structured tracing; LOG_FORMAT=pretty switches to a
/// human-readable layout for development.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "intake_service=debug,dialog_flow=debug,triage_model=info,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

fn build_router_from_config(config: &ServiceConfig) -> anyhow::Result<SpecialtyRouter> {
    let encoder = TextEncoder::from_file(&config.tokenizer_file)
        .with_context(|| format!("loading tokenizer {}", config.tokenizer_file.display()))?;

    let raw = fs::read_to_string(&config.encoder_config_file).with_context(|| {
        format!(
            "reading encoder config {}",
            config.encoder_config_file.display()
        )
    })?;
    let encoder_config: EncoderConfig = serde_json::from_str(&raw)?;

    let specialty_map = SpecialtyMap::load(&config.specialty_map_file).with_context(|| {
        format!(
            "loading specialty map {}",
            config.specialty_map_file.display()
        )
    })?;

    let dims = ClassifierDims {
        hidden_size: config.hidden_size,
        num_specialties: specialty_map.len(),
        num_symptoms: config.num_symptoms,
        num_treatments: config.num_treatments,
    };

    let device = Device::Cpu;
    let (classifier, _varmap) =
        IntakeClassifier::load(&config.weights_file, &encoder_config, dims, &device)
            .with_context(|| format!("loading weights {}", config.weights_file.display()))?;

    Ok(SpecialtyRouter::new(
        encoder,
        classifier,
        specialty_map,
        device,
        config.max_length,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()?;

    let router = build_router_from_config(&config)?;
    info!(
        specialties = router.specialty_map().len(),
        "specialty router ready"
    );

    let engine = TreatmentEngine::load(&config.knowledge_base_file)?;
    let history = Arc::new(FilePatientHistory::new(&config.patient_data_dir));

    let sessions: Arc<dyn SessionStore> = if let Ok(database_url) = std::env::var("DATABASE_URL") {
        match PostgresSessionStore::connect(&database_url).await {
            Ok(store) => {
                info!("using postgres session store");
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, "postgres unavailable, falling back to in-memory sessions");
                Arc::new(InMemorySessionStore::new())
            }
        }
    } else {
        info!("using in-memory session store (set DATABASE_URL for persistence)");
        Arc::new(InMemorySessionStore::new())
    };

    let flow = build_intake_flow(
        Arc::new(router),
        Arc::new(engine),
        history.clone(),
        Arc::new(RandomQueue),
    );

    let state = AppState {
        flow: Arc::new(flow),
        sessions,
        history,
    };

    serve(state, &config.bind_addr).await
}
