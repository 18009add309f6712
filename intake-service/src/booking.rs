use rand::Rng;
use serde::{Deserialize, Serialize};

/// Queue position snapshot for a specialty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub specialty: String,
    pub current_number: u32,
    pub waiting_minutes: u32,
}

/// Hands out queue slots per specialty. The shipped implementation is an
/// illustrative placeholder; a real scheduling system plugs in behind this
/// trait.
pub trait QueueAssigner: Send + Sync {
    fn assign(&self, specialty: &str) -> u32;
    fn status(&self, specialty: &str) -> QueueStatus;
}

/// Placeholder assigner producing random numbers.
#[derive(Default)]
pub struct RandomQueue;

impl QueueAssigner for RandomQueue {
    fn assign(&self, _specialty: &str) -> u32 {
        rand::rng().random_range(1..=100)
    }

    fn status(&self, specialty: &str) -> QueueStatus {
        let mut rng = rand::rng();
        QueueStatus {
            specialty: specialty.to_string(),
            current_number: rng.random_range(1..=100),
            waiting_minutes: rng.random_range(10..=60),
        }
    }
}
