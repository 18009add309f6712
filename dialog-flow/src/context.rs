use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A single turn of the running dialog, kept so steps can look back at what
/// was said without re-reading the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

const CHAT_HISTORY_KEY: &str = "__chat_history";

/// Shared key-value context for one conversation session.
///
/// Values are JSON so arbitrary serde types can flow between steps. Cloning is
/// cheap; all clones point at the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) {
        self.set_sync(key, value);
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                // A type that cannot become JSON is a programming error;
                // store null but leave a trace of it.
                warn!(key, error = %e, "context value failed to serialize, storing null");
                Value::Null
            }
        };
        self.data.insert(key, value);
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    /// Synchronous read, usable inside edge predicates.
    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.push_turn(ChatTurn {
            role: ChatRole::User,
            content: content.into(),
        });
    }

    pub async fn add_assistant_message(&self, content: impl Into<String>) {
        self.push_turn(ChatTurn {
            role: ChatRole::Assistant,
            content: content.into(),
        });
    }

    pub async fn chat_history(&self) -> Vec<ChatTurn> {
        self.get_sync(CHAT_HISTORY_KEY).unwrap_or_default()
    }

    fn push_turn(&self, turn: ChatTurn) {
        let mut history: Vec<ChatTurn> = self.get_sync(CHAT_HISTORY_KEY).unwrap_or_default();
        history.push(turn);
        self.set_sync(CHAT_HISTORY_KEY, history);
    }

    /// Snapshot of all entries, used by persistent session stores.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.data
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn from_snapshot(snapshot: BTreeMap<String, Value>) -> Self {
        let ctx = Self::new();
        for (k, v) in snapshot {
            ctx.data.insert(k, v);
        }
        ctx
    }
}
