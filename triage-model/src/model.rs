use std::collections::HashMap;
use std::path::Path;

use candle_core::{D, Device, Tensor, Var};
use candle_nn::{Dropout, Linear, Module, VarBuilder, VarMap, linear, ops};
use candle_transformers::models::bert::{BertModel, Config};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ModelError, Result};

/// Sentinel label for rows that carry no specialty supervision.
pub const NO_LABEL: i64 = -100;

/// Output sizes of the three task heads plus the encoder width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierDims {
    pub hidden_size: usize,
    pub num_specialties: usize,
    pub num_symptoms: usize,
    pub num_treatments: usize,
}

/// Logits from one forward pass.
pub struct HeadOutputs {
    pub specialty_logits: Tensor,
    pub symptom_logits: Tensor,
    pub treatment_logits: Tensor,
}

/// Two-layer projection head shared by all three tasks.
struct TaskHead {
    fc: Linear,
    out: Linear,
    dropout: Dropout,
}

impl TaskHead {
    fn new(
        in_dim: usize,
        hidden: usize,
        out_dim: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            fc: linear(in_dim, hidden, vb.pp("fc"))?,
            out: linear(hidden, out_dim, vb.pp("out"))?,
            dropout: Dropout::new(dropout),
        })
    }

    fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.fc.forward(xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        Ok(self.out.forward(&xs)?)
    }
}

/// Shared transformer encoder with specialty, symptom and treatment heads.
///
/// The treatment head is conditioned on the symptom head: its input is the
/// pooled representation concatenated with the sigmoid-activated symptom
/// logits. Only the specialty head is loss-driven in the current training
/// regime; the other two heads are part of the architecture and of every
/// checkpoint.
pub struct IntakeClassifier {
    encoder: BertModel,
    dropout: Dropout,
    specialty_head: TaskHead,
    symptom_head: TaskHead,
    treatment_head: TaskHead,
    dims: ClassifierDims,
}

impl IntakeClassifier {
    pub fn new(vb: VarBuilder, config: &Config, dims: ClassifierDims) -> Result<Self> {
        let dropout_rate = 0.1;
        let encoder = BertModel::load(vb.clone(), config)?;
        let hidden = dims.hidden_size;
        let specialty_head = TaskHead::new(
            hidden,
            hidden,
            dims.num_specialties,
            dropout_rate,
            vb.pp("specialty_head"),
        )?;
        let symptom_head = TaskHead::new(
            hidden,
            hidden,
            dims.num_symptoms,
            dropout_rate,
            vb.pp("symptom_head"),
        )?;
        let treatment_head = TaskHead::new(
            hidden + dims.num_symptoms,
            hidden,
            dims.num_treatments,
            dropout_rate,
            vb.pp("treatment_head"),
        )?;

        info!(
            specialties = dims.num_specialties,
            symptoms = dims.num_symptoms,
            treatments = dims.num_treatments,
            "initialized intake classifier"
        );

        Ok(Self {
            encoder,
            dropout: Dropout::new(dropout_rate),
            specialty_head,
            symptom_head,
            treatment_head,
            dims,
        })
    }

    pub fn dims(&self) -> &ClassifierDims {
        &self.dims
    }

    /// Pure function from token ids and attention mask to the three logit
    /// tensors. `input_ids` and `attention_mask` are `[batch, seq]` u32.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<HeadOutputs> {
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .encoder
            .forward(input_ids, &token_type_ids, Some(attention_mask))?;

        // First token of the sequence as the pooled representation.
        let pooled = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.dropout.forward(&pooled, train)?;

        let specialty_logits = self.specialty_head.forward(&pooled, train)?;
        let symptom_logits = self.symptom_head.forward(&pooled, train)?;

        let symptom_probs = ops::sigmoid(&symptom_logits)?;
        let combined = Tensor::cat(&[&pooled, &symptom_probs], D::Minus1)?;
        let treatment_logits = self.treatment_head.forward(&combined, train)?;

        Ok(HeadOutputs {
            specialty_logits,
            symptom_logits,
            treatment_logits,
        })
    }

    /// Cross-entropy over the rows whose label is not [`NO_LABEL`].
    ///
    /// Valid rows are gathered with `index_select` before the loss is
    /// computed, so masked rows are structurally outside the gradient graph
    /// rather than merely zero-weighted. Returns `None` when no row carries a
    /// label.
    pub fn specialty_loss(
        &self,
        specialty_logits: &Tensor,
        labels: &[i64],
    ) -> Result<Option<Tensor>> {
        let valid: Vec<(u32, u32)> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l != NO_LABEL)
            .map(|(i, &l)| (i as u32, l as u32))
            .collect();
        if valid.is_empty() {
            return Ok(None);
        }

        let device = specialty_logits.device();
        let rows: Vec<u32> = valid.iter().map(|(i, _)| *i).collect();
        let targets: Vec<u32> = valid.iter().map(|(_, l)| *l).collect();

        let rows = Tensor::new(rows.as_slice(), device)?;
        let targets = Tensor::new(targets.as_slice(), device)?;
        let valid_logits = specialty_logits.index_select(&rows, 0)?;

        Ok(Some(candle_nn::loss::cross_entropy(
            &valid_logits,
            &targets,
        )?))
    }

    /// Vars the optimizer may update: everything except the embeddings and
    /// the first `freeze_layers` encoder layers, which keep their pretrained
    /// general-language representations.
    pub fn trainable_vars(varmap: &VarMap, freeze_layers: usize) -> Vec<(String, Var)> {
        let data = varmap.data().lock().unwrap();
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .filter(|(name, _)| !Self::is_frozen(name, freeze_layers))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    fn is_frozen(name: &str, freeze_layers: usize) -> bool {
        if name.starts_with("embeddings.") {
            return true;
        }
        if let Some(rest) = name.strip_prefix("encoder.layer.") {
            if let Some(idx) = rest.split('.').next().and_then(|s| s.parse::<usize>().ok()) {
                return idx < freeze_layers;
            }
        }
        false
    }

    /// Build the classifier and populate its weights from a safetensors
    /// checkpoint, failing fast when the checkpoint's head dimensions do not
    /// match `dims`.
    pub fn load(
        weights: impl AsRef<Path>,
        config: &Config,
        dims: ClassifierDims,
        device: &Device,
    ) -> Result<(Self, VarMap)> {
        let weights = weights.as_ref();
        let tensors = candle_core::safetensors::load(weights, device)?;
        verify_head_dims(&tensors, &dims)?;

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);
        let classifier = Self::new(vb, config, dims)?;
        varmap.load(weights)?;
        info!(path = %weights.display(), "loaded classifier checkpoint");
        Ok((classifier, varmap))
    }
}

fn verify_head_dims(tensors: &HashMap<String, Tensor>, dims: &ClassifierDims) -> Result<()> {
    let expectations = [
        (
            "specialty_head.out.weight",
            vec![dims.num_specialties, dims.hidden_size],
        ),
        (
            "symptom_head.out.weight",
            vec![dims.num_symptoms, dims.hidden_size],
        ),
        (
            "treatment_head.out.weight",
            vec![dims.num_treatments, dims.hidden_size],
        ),
        (
            "treatment_head.fc.weight",
            vec![dims.hidden_size, dims.hidden_size + dims.num_symptoms],
        ),
    ];
    for (name, expected) in expectations {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| ModelError::MissingTensor(name.to_string()))?;
        let found = tensor.dims().to_vec();
        if found != expected {
            return Err(ModelError::DimensionMismatch {
                tensor: name.to_string(),
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    /// Tiny encoder config so unit tests stay fast on CPU.
    pub fn tiny_bert_config(hidden: usize) -> Config {
        serde_json::from_value(json!({
            "vocab_size": 64,
            "hidden_size": hidden,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": hidden * 2,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "attention_probs_dropout_prob": 0.0,
            "max_position_embeddings": 32,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "position_embedding_type": "absolute",
            "use_cache": false,
            "classifier_dropout": null,
            "model_type": "bert"
        }))
        .unwrap()
    }

    pub fn tiny_dims(hidden: usize) -> ClassifierDims {
        ClassifierDims {
            hidden_size: hidden,
            num_specialties: 4,
            num_symptoms: 5,
            num_treatments: 3,
        }
    }

    pub fn tiny_classifier() -> (IntakeClassifier, VarMap, Device) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);
        let classifier =
            IntakeClassifier::new(vb, &tiny_bert_config(16), tiny_dims(16)).unwrap();
        (classifier, varmap, device)
    }

    pub fn input_pair(device: &Device, batch: usize, seq: usize) -> (Tensor, Tensor) {
        let ids: Vec<u32> = (0..batch * seq).map(|i| (i % 60) as u32 + 1).collect();
        let input_ids = Tensor::new(ids.as_slice(), device)
            .unwrap()
            .reshape((batch, seq))
            .unwrap();
        let mask = Tensor::ones((batch, seq), candle_core::DType::U32, device).unwrap();
        (input_ids, mask)
    }
}
