use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::model::NO_LABEL;
use crate::text::TextEncoder;

/// Bidirectional specialty ↔ index mapping.
///
/// Built once from the sorted unique specialty names of the training data;
/// index `i` corresponds to output neuron `i` of the specialty head, so the
/// same map must be used for training, model instantiation and inference. It
/// is persisted as `specialty_map.json` next to the trained model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecialtyMap {
    names: Vec<String>,
}

impl SpecialtyMap {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: std::collections::BTreeSet<String> =
            names.into_iter().map(Into::into).collect();
        Self {
            names: unique.into_iter().collect(),
        }
    }

    pub fn index_of(&self, specialty: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(specialty)).ok()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path.as_ref())?)?)
    }
}

#[derive(Debug, Deserialize)]
struct RawExample {
    input: String,
    #[serde(default)]
    specialty: Option<String>,
}

struct EncodedExample {
    ids: Vec<u32>,
    attention_mask: Vec<u32>,
    label: i64,
}

/// One training batch. Labels stay host-side because the loss only needs the
/// valid subset of rows.
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Vec<i64>,
}

/// Labeled intake utterances, pre-tokenized to fixed length.
///
/// The backing file is a JSON array of `{ "input": ..., "specialty": ... }`
/// records; records without a specialty are kept as conversational filler and
/// get the sentinel label.
pub struct IntakeDataset {
    examples: Vec<EncodedExample>,
    specialty_map: SpecialtyMap,
    max_length: usize,
}

impl IntakeDataset {
    pub fn load(
        path: impl AsRef<Path>,
        encoder: &TextEncoder,
        max_length: usize,
        specialty_map: Option<SpecialtyMap>,
    ) -> Result<Self> {
        let raw: Vec<RawExample> = serde_json::from_str(&fs::read_to_string(path.as_ref())?)?;
        let raw: Vec<RawExample> = raw
            .into_iter()
            .filter(|r| !r.input.trim().is_empty())
            .collect();

        // Validation and test sets must reuse the training map so label
        // indices line up with the specialty head.
        let specialty_map = specialty_map.unwrap_or_else(|| {
            SpecialtyMap::from_names(raw.iter().filter_map(|r| r.specialty.clone()))
        });

        let mut examples = Vec::with_capacity(raw.len());
        for record in &raw {
            let encoded = encoder.encode(&record.input, max_length)?;
            let label = record
                .specialty
                .as_deref()
                .and_then(|s| specialty_map.index_of(s))
                .map(|i| i as i64)
                .unwrap_or(NO_LABEL);
            examples.push(EncodedExample {
                ids: encoded.ids,
                attention_mask: encoded.attention_mask,
                label,
            });
        }

        info!(
            samples = examples.len(),
            specialties = specialty_map.len(),
            path = %path.as_ref().display(),
            "loaded intake dataset"
        );

        Ok(Self {
            examples,
            specialty_map,
            max_length,
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn specialty_map(&self) -> &SpecialtyMap {
        &self.specialty_map
    }

    /// Materialize fixed-size batches on `device`. The final batch may be
    /// smaller.
    pub fn batches(&self, batch_size: usize, device: &Device) -> Result<Vec<Batch>> {
        let mut batches = Vec::new();
        for chunk in self.examples.chunks(batch_size.max(1)) {
            let rows = chunk.len();
            let mut ids = Vec::with_capacity(rows * self.max_length);
            let mut mask = Vec::with_capacity(rows * self.max_length);
            let mut labels = Vec::with_capacity(rows);
            for example in chunk {
                ids.extend_from_slice(&example.ids);
                mask.extend_from_slice(&example.attention_mask);
                labels.push(example.label);
            }
            batches.push(Batch {
                input_ids: Tensor::new(ids.as_slice(), device)?
                    .reshape((rows, self.max_length))?,
                attention_mask: Tensor::new(mask.as_slice(), device)?
                    .reshape((rows, self.max_length))?,
                labels,
            });
        }
        Ok(batches)
    }
}

/// Per-category training history persisted at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl TrainingHistory {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
