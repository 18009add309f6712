use triage_model::{SpecialtyPrediction, SpecialtyRouter};

/// Seam between the conversation flow and the neural model, so steps can be
/// exercised with a stub classifier in tests.
pub trait SpecialtyClassifier: Send + Sync {
    /// Ranked specialty suggestions for a free-text symptom description,
    /// confidence descending, at most `top_k` entries.
    fn predict(&self, text: &str, top_k: usize) -> anyhow::Result<Vec<SpecialtyPrediction>>;
}

impl SpecialtyClassifier for SpecialtyRouter {
    fn predict(&self, text: &str, top_k: usize) -> anyhow::Result<Vec<SpecialtyPrediction>> {
        Ok(SpecialtyRouter::predict(self, text, top_k)?)
    }
}
