use crate::conversation::Conversation;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Durable record of the active conversation
///
/// Missing or unreadable state is reported as `None`; write failures are
/// logged. Nothing here returns an error to the caller.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<Conversation>;

    fn save(&self, conversation: &Conversation);

    fn clear(&self);
}

fn decode(raw: &str, origin: &str) -> Option<Conversation> {
    match serde_json::from_str::<Conversation>(raw) {
        Ok(conversation) => Some(conversation),
        Err(e) => {
            warn!("Ignoring corrupt session record in {}: {}", origin, e);
            None
        }
    }
}

/// Process-local store, holding the same JSON a file store would write
#[derive(Default)]
pub struct MemorySessionStore {
    raw: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an arbitrary (possibly invalid) record
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Conversation> {
        self.slot().as_deref().and_then(|raw| decode(raw, "memory"))
    }

    fn save(&self, conversation: &Conversation) {
        match serde_json::to_string(conversation) {
            Ok(raw) => *self.slot() = Some(raw),
            Err(e) => warn!("Failed to encode session record: {}", e),
        }
    }

    fn clear(&self) {
        *self.slot() = None;
    }
}

/// One JSON file per key
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Record lives at `{dir}/{key}.json`
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, raw: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Rename over the old record so readers never see a partial write
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<Conversation> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw, &self.path.display().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read session record {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, conversation: &Conversation) {
        let raw = match serde_json::to_string_pretty(conversation) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode session record: {}", e);
                return;
            }
        };
        match self.write(&raw) {
            Ok(()) => debug!("Saved session record to {}", self.path.display()),
            Err(e) => warn!("Failed to write session record {}: {}", self.path.display(), e),
        }
    }

    fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Cleared session record {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove session record {}: {}", self.path.display(), e),
        }
    }
}
