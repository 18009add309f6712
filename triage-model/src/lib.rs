pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod text;
pub mod training;

pub use candle_core::Device;
pub use candle_transformers::models::bert::Config as EncoderConfig;

pub use data::{Batch, IntakeDataset, SpecialtyMap, TrainingHistory};
pub use error::{ModelError, Result};
pub use inference::{SpecialtyPrediction, SpecialtyRouter};
pub use model::{ClassifierDims, HeadOutputs, IntakeClassifier, NO_LABEL};
pub use text::{EncodedText, TextEncoder};
pub use training::{CheckpointManifest, LinearSchedule, TrainOptions, Trainer};
