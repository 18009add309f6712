use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Flat service configuration, read once at startup from the JSON file named
/// by `CONFIG_PATH`. No hot-reload.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub tokenizer_file: PathBuf,
    pub encoder_config_file: PathBuf,
    pub weights_file: PathBuf,
    pub specialty_map_file: PathBuf,
    pub hidden_size: usize,
    pub num_symptoms: usize,
    pub num_treatments: usize,
    pub max_length: usize,

    pub knowledge_base_file: PathBuf,
    pub patient_data_dir: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "configs/service.json".to_string());
        Self::from_path(&path)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {path}"))
    }
}
