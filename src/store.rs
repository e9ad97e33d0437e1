use crate::types::Conversation;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence collaborator; called once per successful turn.
pub trait ConversationStore: Send + Sync {
    fn save(&self, conversation: &Conversation) -> Result<()>;
}

/// Stores each conversation as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    pub fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read conversation {}", path.display()))?;
        let conversation = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse conversation {}", path.display()))?;
        Ok(Some(conversation))
    }
}

impl ConversationStore for JsonFileStore {
    fn save(&self, conversation: &Conversation) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create store directory {}", self.dir.display())
        })?;

        let path = self.path_for(&conversation.id);
        let temp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(conversation)?;

        fs::write(&temp_path, body).context("Failed to write conversation")?;
        fs::rename(&temp_path, &path).context("Failed to replace conversation file")?;
        Ok(())
    }
}

/// Keeps saved conversations in memory, keyed by id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<HashMap<String, Conversation>>,
    save_count: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.saved.lock().ok()?.get(id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.save_count.lock().map(|count| *count).unwrap_or(0)
    }
}

impl ConversationStore for MemoryStore {
    fn save(&self, conversation: &Conversation) -> Result<()> {
        self.saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?
            .insert(conversation.id.clone(), conversation.clone());
        if let Ok(mut count) = self.save_count.lock() {
            *count += 1;
        }
        Ok(())
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
