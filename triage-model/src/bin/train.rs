use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use triage_model::{
    ClassifierDims, EncoderConfig, IntakeClassifier, IntakeDataset, TextEncoder, TrainOptions,
    Trainer,
};

/// Flat key-value training configuration, read once at startup.
#[derive(Debug, Deserialize)]
struct TrainConfig {
    tokenizer_file: PathBuf,
    encoder_config_file: PathBuf,
    /// Optional pretrained encoder weights (safetensors); matching tensors
    /// seed the backbone before fine-tuning.
    #[serde(default)]
    pretrained_weights: Option<PathBuf>,
    train_file: PathBuf,
    val_file: PathBuf,
    output_dir: PathBuf,
    hidden_size: usize,
    num_symptoms: usize,
    num_treatments: usize,
    max_length: usize,
    batch_size: usize,
    #[serde(flatten)]
    options: TrainOptions,
}

fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "triage_model=info,train=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}

fn seed_pretrained_encoder(varmap: &VarMap, weights: &PathBuf, device: &Device) -> Result<()> {
    let tensors = candle_core::safetensors::load(weights, device)
        .with_context(|| format!("reading pretrained weights {}", weights.display()))?;
    let data = varmap.data().lock().unwrap();
    let mut seeded = 0usize;
    for (name, var) in data.iter() {
        match tensors.get(name) {
            Some(tensor) if tensor.dims() == var.dims() => {
                var.set(tensor)?;
                seeded += 1;
            }
            Some(tensor) => warn!(
                name,
                checkpoint = ?tensor.dims(),
                model = ?var.dims(),
                "shape mismatch, keeping fresh init"
            ),
            None => {}
        }
    }
    info!(seeded, "seeded pretrained encoder tensors");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "configs/train.json".to_string());
    let config: TrainConfig = serde_json::from_str(
        &fs::read_to_string(&config_path)
            .with_context(|| format!("reading config {config_path}"))?,
    )
    .context("parsing training config")?;
    info!(?config_path, "loaded training config");

    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

    let encoder_config: EncoderConfig = serde_json::from_str(
        &fs::read_to_string(&config.encoder_config_file).with_context(|| {
            format!(
                "reading encoder config {}",
                config.encoder_config_file.display()
            )
        })?,
    )?;

    let text_encoder = TextEncoder::from_file(&config.tokenizer_file)?;

    let train_dataset = IntakeDataset::load(
        &config.train_file,
        &text_encoder,
        config.max_length,
        None,
    )?;
    // Validation shares the training map so indices line up with the head.
    let val_dataset = IntakeDataset::load(
        &config.val_file,
        &text_encoder,
        config.max_length,
        Some(train_dataset.specialty_map().clone()),
    )?;

    let specialty_map = train_dataset.specialty_map().clone();
    info!(
        specialties = specialty_map.len(),
        train_samples = train_dataset.len(),
        val_samples = val_dataset.len(),
        "datasets ready"
    );

    let dims = ClassifierDims {
        hidden_size: config.hidden_size,
        num_specialties: specialty_map.len(),
        num_symptoms: config.num_symptoms,
        num_treatments: config.num_treatments,
    };

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let classifier = IntakeClassifier::new(vb, &encoder_config, dims)?;

    if let Some(weights) = &config.pretrained_weights {
        seed_pretrained_encoder(&varmap, weights, &device)?;
    }

    let train_batches = train_dataset.batches(config.batch_size, &device)?;
    let val_batches = val_dataset.batches(config.batch_size, &device)?;

    let mut trainer = Trainer::new(
        classifier,
        varmap,
        &config.options,
        train_batches.len(),
        &config.output_dir,
    )?;

    let history = trainer.train(&train_batches, &val_batches)?;

    history.save(config.output_dir.join("training_history.json"))?;
    specialty_map.save(config.output_dir.join("specialty_map.json"))?;
    info!("training completed");

    Ok(())
}
