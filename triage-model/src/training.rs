use std::path::{Path, PathBuf};

use candle_core::Var;
use candle_core::backprop::GradStore;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{Batch, TrainingHistory};
use crate::error::{ModelError, Result};
use crate::model::{ClassifierDims, IntakeClassifier};

const MAX_GRAD_NORM: f64 = 1.0;

/// Linear warmup followed by linear decay to zero over the remaining steps.
pub struct LinearSchedule {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl LinearSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps: total_steps.max(1),
            step: 0,
        }
    }

    /// Learning rate for the upcoming optimizer step; advances the counter.
    pub fn next(&mut self) -> f64 {
        let lr = self.lr_at(self.step);
        self.step += 1;
        lr
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn restore_step(&mut self, step: usize) {
        self.step = step;
    }

    fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * (step + 1) as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / decay_span).clamp(0.0, 1.0)
    }
}

/// Sidecar metadata written next to every weights file. Head dimensions let
/// loading fail fast on a mismatched checkpoint; the scheduler step allows a
/// resumed run to continue its decay where it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub dims: ClassifierDims,
    pub epoch: usize,
    pub scheduler_step: usize,
    pub best_val_loss: Option<f64>,
}

/// Training options, read from the flat JSON config.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainOptions {
    pub learning_rate: f64,
    pub epochs: usize,
    pub warmup_steps: usize,
    #[serde(default = "default_freeze_layers")]
    pub freeze_layers: usize,
}

fn default_freeze_layers() -> usize {
    8
}

/// Epoch loop over the specialty objective.
///
/// Per batch: forward, specialty loss over valid-labeled rows, backward,
/// grad-norm clip at 1.0, optimizer step, scheduler step. A batch with no
/// valid labels performs no optimizer work at all. Any failed batch aborts
/// the run; silent partial training is worse than a restart.
pub struct Trainer {
    classifier: IntakeClassifier,
    varmap: VarMap,
    optimizer: AdamW,
    schedule: LinearSchedule,
    trainable: Vec<(String, Var)>,
    output_dir: PathBuf,
    epochs: usize,
    best_val_loss: Option<f64>,
}

impl Trainer {
    pub fn new(
        classifier: IntakeClassifier,
        varmap: VarMap,
        options: &TrainOptions,
        batches_per_epoch: usize,
        output_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let trainable = IntakeClassifier::trainable_vars(&varmap, options.freeze_layers);
        let optimizer = AdamW::new(
            trainable.iter().map(|(_, v)| v.clone()).collect(),
            ParamsAdamW {
                lr: options.learning_rate,
                weight_decay: 0.01,
                ..Default::default()
            },
        )?;
        let total_steps = batches_per_epoch * options.epochs;
        let schedule = LinearSchedule::new(options.learning_rate, options.warmup_steps, total_steps);

        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;

        info!(
            trainable_vars = trainable.len(),
            total_steps,
            warmup_steps = options.warmup_steps,
            "trainer initialized"
        );

        Ok(Self {
            classifier,
            varmap,
            optimizer,
            schedule,
            trainable,
            output_dir,
            epochs: options.epochs,
            best_val_loss: None,
        })
    }

    pub fn classifier(&self) -> &IntakeClassifier {
        &self.classifier
    }

    /// One pass over the training batches; returns the mean loss over all
    /// batches (empty-label batches contribute zero).
    pub fn train_epoch(&mut self, batches: &[Batch]) -> Result<f64> {
        let mut total_loss = 0.0;
        for batch in batches {
            let outputs =
                self.classifier
                    .forward(&batch.input_ids, &batch.attention_mask, true)?;
            let Some(loss) = self
                .classifier
                .specialty_loss(&outputs.specialty_logits, &batch.labels)?
            else {
                // No supervision signal in this batch: no backward pass, no
                // optimizer update, no scheduler step.
                continue;
            };

            let mut grads = loss.backward()?;
            clip_grad_norm(&self.trainable, &mut grads, MAX_GRAD_NORM)?;
            self.optimizer.set_learning_rate(self.schedule.next());
            self.optimizer.step(&grads)?;

            total_loss += loss.to_scalar::<f32>()? as f64;
        }
        Ok(total_loss / batches.len().max(1) as f64)
    }

    /// Validation pass: mean loss plus exact-match accuracy over
    /// valid-labeled rows. No gradients are involved.
    pub fn evaluate(&self, batches: &[Batch]) -> Result<EvalMetrics> {
        let mut total_loss = 0.0;
        let mut correct = 0usize;
        let mut counted = 0usize;

        for batch in batches {
            let outputs =
                self.classifier
                    .forward(&batch.input_ids, &batch.attention_mask, false)?;
            if let Some(loss) = self
                .classifier
                .specialty_loss(&outputs.specialty_logits, &batch.labels)?
            {
                total_loss += loss.to_scalar::<f32>()? as f64;
            }

            let preds: Vec<u32> = outputs
                .specialty_logits
                .argmax(candle_core::D::Minus1)?
                .to_vec1()?;
            for (pred, &label) in preds.iter().zip(batch.labels.iter()) {
                if label == crate::model::NO_LABEL {
                    continue;
                }
                counted += 1;
                if *pred as i64 == label {
                    correct += 1;
                }
            }
        }

        Ok(EvalMetrics {
            loss: total_loss / batches.len().max(1) as f64,
            accuracy: if counted > 0 {
                Some(correct as f64 / counted as f64)
            } else {
                None
            },
        })
    }

    /// Full run. Every epoch writes `checkpoint_epoch_N.safetensors`; a
    /// strict validation-loss improvement additionally overwrites
    /// `best_model.safetensors`.
    pub fn train(
        &mut self,
        train_batches: &[Batch],
        val_batches: &[Batch],
    ) -> Result<TrainingHistory> {
        info!(epochs = self.epochs, "starting training");
        let mut history = TrainingHistory::default();

        for epoch in 1..=self.epochs {
            let train_loss = self.train_epoch(train_batches)?;
            history.train_loss.push(train_loss);

            let metrics = self.evaluate(val_batches)?;
            history.val_loss.push(metrics.loss);
            history.val_accuracy.push(metrics.accuracy.unwrap_or(0.0));

            if self.best_val_loss.is_none_or(|best| metrics.loss < best) {
                self.best_val_loss = Some(metrics.loss);
                self.save_checkpoint("best_model", epoch)?;
            }
            self.save_checkpoint(&format!("checkpoint_epoch_{epoch}"), epoch)?;

            info!(
                epoch,
                train_loss,
                val_loss = metrics.loss,
                val_accuracy = metrics.accuracy.unwrap_or(0.0),
                "epoch finished"
            );
        }

        Ok(history)
    }

    /// Synchronous checkpoint write; a failure here aborts the run rather
    /// than continuing with an unsaved epoch.
    pub fn save_checkpoint(&self, stem: &str, epoch: usize) -> Result<()> {
        let weights = self.output_dir.join(format!("{stem}.safetensors"));
        self.varmap.save(&weights).map_err(ModelError::Candle)?;

        let manifest = CheckpointManifest {
            dims: self.classifier.dims().clone(),
            epoch,
            scheduler_step: self.schedule.current_step(),
            best_val_loss: self.best_val_loss,
        };
        let manifest_path = self.output_dir.join(format!("{stem}.json"));
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        info!(path = %weights.display(), "checkpoint saved");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EvalMetrics {
    pub loss: f64,
    pub accuracy: Option<f64>,
}

/// Scale all trainable gradients so their global L2 norm is at most
/// `max_norm`.
fn clip_grad_norm(
    vars: &[(String, Var)],
    grads: &mut GradStore,
    max_norm: f64,
) -> Result<()> {
    let mut total_sq = 0f64;
    for (_, var) in vars {
        if let Some(grad) = grads.get(var) {
            total_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total_sq.sqrt();
    if norm <= max_norm {
        return Ok(());
    }

    let scale = max_norm / (norm + 1e-6);
    let mut scaled = Vec::new();
    for (_, var) in vars {
        if let Some(grad) = grads.get(var) {
            scaled.push((var, grad.affine(scale, 0.0)?));
        }
    }
    for (var, grad) in scaled {
        grads.insert(var, grad);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::model::NO_LABEL;
    use crate::model::test_support::{input_pair, tiny_classifier};

    fn batch_with_labels(labels: Vec<i64>) -> Batch {
        let (_classifier, _varmap, device) = tiny_classifier();
        let (input_ids, attention_mask) = input_pair(&device, labels.len(), 8);
        Batch {
            input_ids,
            attention_mask,
            labels,
        }
    }

    fn test_trainer(epochs: usize, warmup: usize) -> Trainer {
        let (classifier, varmap, _device) = tiny_classifier();
        let options = TrainOptions {
            learning_rate: 1e-3,
            epochs,
            warmup_steps: warmup,
            freeze_layers: 1,
        };
        let dir = std::env::temp_dir().join(format!(
            "triage-trainer-test-{}-{epochs}-{warmup}",
            std::process::id()
        ));
        Trainer::new(classifier, varmap, &options, 2, dir).unwrap()
    }

    #[test]
    fn warmup_then_linear_decay() {
        let mut schedule = LinearSchedule::new(1.0, 10, 100);
        let first = schedule.next();
        assert!((first - 0.1).abs() < 1e-9);
        for _ in 1..10 {
            schedule.next();
        }
        // First step after warmup is at full rate.
        let peak = schedule.lr_at(10);
        assert!((peak - 1.0).abs() < 1e-9);
        // Decays to zero at the end.
        assert!(schedule.lr_at(100) <= 1e-9);
    }

    #[test]
    fn fully_masked_batch_is_skipped_without_crashing() {
        let mut trainer = test_trainer(1, 0);
        let batch = batch_with_labels(vec![NO_LABEL, NO_LABEL]);
        let loss = trainer.train_epoch(std::slice::from_ref(&batch)).unwrap();
        assert_eq!(loss, 0.0);
        // No optimizer step means no scheduler step either.
        assert_eq!(trainer.schedule.current_step(), 0);
    }

    #[test]
    fn labeled_batch_updates_parameters() {
        let mut trainer = test_trainer(1, 0);
        let before = {
            let data = trainer.varmap.data().lock().unwrap();
            data.get("specialty_head.out.weight")
                .unwrap()
                .as_tensor()
                .to_vec2::<f32>()
                .unwrap()
        };

        let batch = batch_with_labels(vec![0, 2]);
        let loss = trainer.train_epoch(std::slice::from_ref(&batch)).unwrap();
        assert!(loss > 0.0);
        assert_eq!(trainer.schedule.current_step(), 1);

        let after = {
            let data = trainer.varmap.data().lock().unwrap();
            data.get("specialty_head.out.weight")
                .unwrap()
                .as_tensor()
                .to_vec2::<f32>()
                .unwrap()
        };
        assert_ne!(before, after);
    }

    #[test]
    fn evaluate_reports_accuracy_over_valid_rows_only() {
        let trainer = test_trainer(1, 0);
        let batch = batch_with_labels(vec![1, NO_LABEL, 3]);
        let metrics = trainer.evaluate(std::slice::from_ref(&batch)).unwrap();
        if let Some(acc) = metrics.accuracy {
            assert!((0.0..=1.0).contains(&acc));
        }
    }

    #[test]
    fn training_writes_epoch_and_best_checkpoints() {
        let mut trainer = test_trainer(2, 1);
        let train = vec![batch_with_labels(vec![0, 1])];
        let val = vec![batch_with_labels(vec![1])];

        let history = trainer.train(&train, &val).unwrap();
        assert_eq!(history.train_loss.len(), 2);
        assert_eq!(history.val_loss.len(), 2);

        assert!(trainer.output_dir.join("best_model.safetensors").exists());
        assert!(trainer
            .output_dir
            .join("checkpoint_epoch_1.safetensors")
            .exists());
        assert!(trainer
            .output_dir
            .join("checkpoint_epoch_2.safetensors")
            .exists());

        let manifest: CheckpointManifest = serde_json::from_str(
            &std::fs::read_to_string(trainer.output_dir.join("best_model.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.dims.num_specialties, 4);

        std::fs::remove_dir_all(&trainer.output_dir).ok();
    }
}
