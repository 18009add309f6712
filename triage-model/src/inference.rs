use candle_core::{D, Device, Tensor};
use candle_nn::ops::softmax;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::SpecialtyMap;
use crate::error::Result;
use crate::model::IntakeClassifier;
use crate::text::TextEncoder;

/// One ranked specialty suggestion. Confidence is a softmax probability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialtyPrediction {
    pub specialty: String,
    pub confidence: f32,
}

/// Inference-side bundle: tokenizer, trained classifier and the specialty
/// map the checkpoint was trained with. Stateless across calls, safe to share
/// behind an `Arc`.
pub struct SpecialtyRouter {
    encoder: TextEncoder,
    classifier: IntakeClassifier,
    specialty_map: SpecialtyMap,
    device: Device,
    max_length: usize,
}

impl SpecialtyRouter {
    pub fn new(
        encoder: TextEncoder,
        classifier: IntakeClassifier,
        specialty_map: SpecialtyMap,
        device: Device,
        max_length: usize,
    ) -> Self {
        Self {
            encoder,
            classifier,
            specialty_map,
            device,
            max_length,
        }
    }

    pub fn specialty_map(&self) -> &SpecialtyMap {
        &self.specialty_map
    }

    /// Top `min(top_k, |specialties|)` predictions for a symptom
    /// description, sorted by confidence descending.
    pub fn predict(&self, text: &str, top_k: usize) -> Result<Vec<SpecialtyPrediction>> {
        let encoded = self.encoder.encode(text, self.max_length)?;
        let input_ids =
            Tensor::new(encoded.ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let attention_mask =
            Tensor::new(encoded.attention_mask.as_slice(), &self.device)?.unsqueeze(0)?;

        let outputs = self.classifier.forward(&input_ids, &attention_mask, false)?;
        let probs: Vec<f32> = softmax(&outputs.specialty_logits, D::Minus1)?
            .squeeze(0)?
            .to_vec1()?;

        let mut ranked: Vec<SpecialtyPrediction> = probs
            .iter()
            .enumerate()
            .filter_map(|(idx, &confidence)| {
                self.specialty_map.name_of(idx).map(|name| SpecialtyPrediction {
                    specialty: name.to_string(),
                    confidence,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(top_k.min(self.specialty_map.len()));

        debug!(top = ?ranked.first().map(|p| p.specialty.clone()), "specialty prediction");
        Ok(ranked)
    }
}
