use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TreatmentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("disease not found: {0}")]
    UnknownDisease(String),
}

pub type Result<T> = std::result::Result<T, TreatmentError>;

/// One row of the disease knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiseaseEntry {
    pub disease: String,
    pub specialty: String,
    pub symptoms: Vec<String>,
    pub medications: Vec<String>,
    pub tests: Vec<String>,
}

/// Partial update for an existing disease row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreatmentUpdate {
    pub specialty: Option<String>,
    pub symptoms: Option<Vec<String>>,
    pub medications: Option<Vec<String>>,
    pub tests: Option<Vec<String>>,
}

/// Output of a recommendation run. Lists are de-duplicated preserving first
/// occurrence, so identical input against an unchanged knowledge base yields
/// identical output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Recommendations {
    pub specialties: Vec<String>,
    pub primary_treatments: Vec<String>,
    pub alternative_treatments: Vec<String>,
    pub recommended_tests: Vec<String>,
    pub precautions: Vec<String>,
}

/// Structured patient history the engine may condition on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicalHistory {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub chronic_conditions: Option<String>,
}

const PRIMARY_MATCH_THRESHOLD: f64 = 0.7;
const TOP_MATCHES: usize = 3;
const CHRONIC_PRECAUTION: &str =
    "Cần lưu ý đặc biệt do bệnh nền hiện có; trao đổi với bác sĩ trước khi dùng thuốc.";

/// Rule-based symptom → disease → treatment matcher.
///
/// The whole knowledge base is loaded at construction into a precomputed
/// disease index; mutations rewrite the whole backing table. Malformed rows
/// are skipped with a warning, never fatal.
pub struct TreatmentEngine {
    path: PathBuf,
    entries: BTreeMap<String, DiseaseEntry>,
}

impl TreatmentEngine {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw: Vec<Value> = serde_json::from_str(&fs::read_to_string(&path)?)?;

        let mut entries = BTreeMap::new();
        for row in raw {
            match serde_json::from_value::<DiseaseEntry>(row.clone()) {
                Ok(entry) => {
                    entries.insert(entry.disease.clone(), entry);
                }
                Err(e) => {
                    // One bad row must not take down every recommendation.
                    warn!(error = %e, row = %row, "skipping malformed knowledge base row");
                }
            }
        }

        info!(diseases = entries.len(), path = %path.display(), "loaded treatment knowledge base");
        Ok(Self { path, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recommendations for a symptom token list, optionally conditioned on
    /// patient history. An empty symptom list short-circuits to empty output.
    pub fn recommend(
        &self,
        symptoms: &[String],
        history: Option<&MedicalHistory>,
    ) -> Recommendations {
        let mut recommendations = Recommendations::default();
        if symptoms.is_empty() {
            return recommendations;
        }

        let query: BTreeSet<&str> = symptoms.iter().map(String::as_str).collect();

        // Score every disease; zero-overlap diseases are excluded outright.
        let mut matches: Vec<(&DiseaseEntry, f64)> = self
            .entries
            .values()
            .filter_map(|entry| {
                let known: BTreeSet<&str> = entry.symptoms.iter().map(String::as_str).collect();
                let overlap = query.intersection(&known).count();
                if overlap == 0 {
                    return None;
                }
                Some((entry, overlap as f64 / symptoms.len() as f64))
            })
            .collect();
        matches.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.disease.cmp(&b.0.disease))
        });

        for (entry, score) in matches.into_iter().take(TOP_MATCHES) {
            recommendations.specialties.push(entry.specialty.clone());
            if score > PRIMARY_MATCH_THRESHOLD {
                recommendations
                    .primary_treatments
                    .extend(entry.medications.iter().cloned());
            } else {
                recommendations
                    .alternative_treatments
                    .extend(entry.medications.iter().cloned());
            }
            recommendations
                .recommended_tests
                .extend(entry.tests.iter().cloned());
        }

        if let Some(history) = history {
            if !history.allergies.is_empty() {
                recommendations.primary_treatments.retain(|med| {
                    !history
                        .allergies
                        .iter()
                        .any(|allergy| med.contains(allergy.as_str()))
                });
            }
            if history.chronic_conditions.is_some() {
                recommendations
                    .precautions
                    .push(CHRONIC_PRECAUTION.to_string());
            }
        }

        recommendations.specialties = dedup_preserving_order(recommendations.specialties);
        recommendations.primary_treatments =
            dedup_preserving_order(recommendations.primary_treatments);
        recommendations.alternative_treatments =
            dedup_preserving_order(recommendations.alternative_treatments);
        recommendations.recommended_tests =
            dedup_preserving_order(recommendations.recommended_tests);

        recommendations
    }

    /// Add a new disease row and rewrite the backing table.
    pub fn add_treatment(&mut self, entry: DiseaseEntry) -> Result<()> {
        info!(disease = %entry.disease, "adding treatment entry");
        self.entries.insert(entry.disease.clone(), entry);
        self.persist()
    }

    /// Apply a partial update to an existing row and rewrite the table.
    pub fn update_treatment(&mut self, disease: &str, update: TreatmentUpdate) -> Result<()> {
        let entry = self
            .entries
            .get_mut(disease)
            .ok_or_else(|| TreatmentError::UnknownDisease(disease.to_string()))?;

        if let Some(specialty) = update.specialty {
            entry.specialty = specialty;
        }
        if let Some(symptoms) = update.symptoms {
            entry.symptoms = symptoms;
        }
        if let Some(medications) = update.medications {
            entry.medications = medications;
        }
        if let Some(tests) = update.tests {
            entry.tests = tests;
        }

        info!(disease, "updated treatment entry");
        self.persist()
    }

    /// Write the current mapping to `export_path` as pretty JSON.
    pub fn export(&self, export_path: impl AsRef<Path>) -> Result<()> {
        let rows: Vec<&DiseaseEntry> = self.entries.values().collect();
        fs::write(export_path.as_ref(), serde_json::to_string_pretty(&rows)?)?;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.export(&self.path)
    }
}

/// Split a free-text symptom description into match tokens: whitespace and
/// comma separated, trimmed of punctuation, lowercased.
pub fn split_symptoms(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_kb(rows: &Value) -> PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "intake-kb-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("knowledge_base.json");
        std::fs::write(&path, serde_json::to_string(rows).unwrap()).unwrap();
        path
    }

    fn sample_engine() -> TreatmentEngine {
        let rows = serde_json::json!([
            {
                "disease": "Cảm cúm",
                "specialty": "Nội khoa",
                "symptoms": ["sốt", "đau", "đầu", "ho"],
                "medications": ["Paracetamol", "Vitamin C"],
                "tests": ["Công thức máu"]
            },
            {
                "disease": "Viêm họng",
                "specialty": "Tai mũi họng",
                "symptoms": ["ho", "đau họng"],
                "medications": ["Amoxicillin"],
                "tests": ["Nội soi họng"]
            },
            {
                "disease": "Đau dạ dày",
                "specialty": "Tiêu hóa",
                "symptoms": ["đau bụng", "ợ chua"],
                "medications": ["Omeprazole"],
                "tests": ["Nội soi dạ dày"]
            }
        ]);
        TreatmentEngine::load(write_kb(&rows)).unwrap()
    }

    fn owned(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_symptom_match_scores_one_and_uses_primary() {
        let engine = sample_engine();
        let recs = engine.recommend(&owned(&["ho", "đau họng"]), None);
        // Viêm họng matches 2/2 = 1.0 > 0.7 → primary.
        assert!(recs.primary_treatments.contains(&"Amoxicillin".to_string()));
        assert!(recs.specialties.contains(&"Tai mũi họng".to_string()));
    }

    #[test]
    fn disjoint_symptoms_produce_no_match_at_all() {
        let engine = sample_engine();
        let recs = engine.recommend(&owned(&["chóng mặt"]), None);
        assert_eq!(recs, Recommendations::default());
    }

    #[test]
    fn low_score_matches_land_in_alternatives() {
        let engine = sample_engine();
        // "ho" alone: Cảm cúm scores 1/1 via "ho"? overlap is 1, query len 1
        // → 1.0. Use a longer query where overlap stays partial.
        let recs = engine.recommend(&owned(&["ho", "mệt", "chán ăn"]), None);
        // 1/3 ≈ 0.33 < 0.7 for both matching diseases.
        assert!(recs.primary_treatments.is_empty());
        assert!(recs
            .alternative_treatments
            .contains(&"Amoxicillin".to_string()));
    }

    #[test]
    fn empty_symptom_list_returns_empty_recommendations() {
        let engine = sample_engine();
        let recs = engine.recommend(&[], None);
        assert_eq!(recs, Recommendations::default());
    }

    #[test]
    fn allergy_filter_is_substring_based() {
        let engine = sample_engine();
        let history = MedicalHistory {
            allergies: vec!["Amox".to_string()],
            ..Default::default()
        };
        // Both diseases at full score so both medication sets are primary.
        let recs = engine.recommend(&owned(&["ho"]), Some(&history));
        assert!(!recs.primary_treatments.iter().any(|m| m.contains("Amox")));
        assert!(recs.primary_treatments.contains(&"Paracetamol".to_string()));
    }

    #[test]
    fn chronic_conditions_append_precaution() {
        let engine = sample_engine();
        let history = MedicalHistory {
            chronic_conditions: Some("tiểu đường".to_string()),
            ..Default::default()
        };
        let recs = engine.recommend(&owned(&["ho"]), Some(&history));
        assert_eq!(recs.precautions.len(), 1);
    }

    #[test]
    fn repeated_calls_are_idempotent() {
        let engine = sample_engine();
        let symptoms = owned(&["sốt", "ho"]);
        let first = engine.recommend(&symptoms, None);
        let second = engine.recommend(&symptoms, None);
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let rows = serde_json::json!([
            { "disease": "OK", "specialty": "Nội khoa", "symptoms": ["sốt"],
              "medications": [], "tests": [] },
            { "disease": "Broken", "specialty": "Nội khoa", "symptoms": "not-a-list",
              "medications": [], "tests": [] }
        ]);
        let engine = TreatmentEngine::load(write_kb(&rows)).unwrap();
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn add_and_update_persist_whole_table() {
        let mut engine = sample_engine();
        let path = engine.path.clone();
        engine
            .add_treatment(DiseaseEntry {
                disease: "Sốt xuất huyết".to_string(),
                specialty: "Truyền nhiễm".to_string(),
                symptoms: vec!["sốt cao".to_string()],
                medications: vec!["Oresol".to_string()],
                tests: vec!["NS1".to_string()],
            })
            .unwrap();

        engine
            .update_treatment(
                "Sốt xuất huyết",
                TreatmentUpdate {
                    medications: Some(vec!["Paracetamol".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            engine.update_treatment("Không có", TreatmentUpdate::default()),
            Err(TreatmentError::UnknownDisease(_))
        ));

        let reloaded = TreatmentEngine::load(&path).unwrap();
        assert_eq!(reloaded.len(), 4);
        assert_eq!(
            reloaded.entries.get("Sốt xuất huyết").unwrap().medications,
            vec!["Paracetamol".to_string()]
        );
    }

    #[test]
    fn symptom_splitting_strips_punctuation_and_lowercases() {
        assert_eq!(
            split_symptoms("Đau đầu, Sốt nhẹ."),
            owned(&["đau", "đầu", "sốt", "nhẹ"])
        );
        assert!(split_symptoms("  ,, ").is_empty());
    }
}
