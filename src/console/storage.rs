//! Registry of open consoles.
//!
//! Consoles opened through MCP live here between tool calls. Each entry
//! keeps the session, the buffer its outbound pump drains into, and the
//! connection metadata reported by `console_list`.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::session::Session;
use super::transport::BufferedSink;
use super::types::ConsoleInfo;

/// One registered console.
pub struct StoredConsole {
    pub session: Arc<Session>,
    pub output: Arc<BufferedSink>,
    pub name: Option<String>,
    /// `user@host:port`
    pub target: String,
}

impl std::fmt::Debug for StoredConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredConsole")
            .field("session_id", &self.session.id())
            .field("name", &self.name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl StoredConsole {
    /// Snapshot the console's metadata.
    pub async fn info(&self) -> ConsoleInfo {
        ConsoleInfo {
            session_id: self.session.id().to_string(),
            name: self.name.clone(),
            target: self.target.clone(),
            created_at: self.session.created_at().to_string(),
            login_state: self.session.login_state().to_string(),
            health_state: self.session.health_state().to_string(),
            check_count: self.session.check_count(),
            buffered_lines: self.output.len().await,
            closed: self.session.is_closed(),
        }
    }
}

/// DashMap-backed console registry.
pub struct ConsoleRegistry {
    consoles: DashMap<String, Arc<StoredConsole>>,
}

impl ConsoleRegistry {
    pub fn new() -> Self {
        Self {
            consoles: DashMap::new(),
        }
    }

    pub fn insert(&self, console: StoredConsole) -> Arc<StoredConsole> {
        let console = Arc::new(console);
        self.consoles
            .insert(console.session.id().to_string(), console.clone());
        console
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<StoredConsole>> {
        self.consoles.get(session_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<StoredConsole>> {
        self.consoles.remove(session_id).map(|(_, console)| console)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.consoles.contains_key(session_id)
    }

    /// All consoles, cloned out so no shard lock is held across awaits.
    pub fn all(&self) -> Vec<Arc<StoredConsole>> {
        self.consoles
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for ConsoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide console registry.
pub static CONSOLES: Lazy<ConsoleRegistry> = Lazy::new(ConsoleRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    fn console(name: Option<&str>) -> StoredConsole {
        let (session, _rx) = Session::new(8);
        StoredConsole {
            session,
            output: Arc::new(BufferedSink::new()),
            name: name.map(str::to_string),
            target: "ops@jump.example.com:22".to_string(),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = ConsoleRegistry::new();
        let stored = registry.insert(console(Some("prod")));
        let id = stored.session.id().to_string();

        assert!(registry.contains(&id));
        assert_eq!(
            registry.get(&id).and_then(|c| c.name.clone()).as_deref(),
            Some("prod")
        );
        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_debug_names_console() {
        let stored = console(Some("prod"));
        let text = format!("{:?}", stored);
        assert!(text.contains(stored.session.id()));
        assert!(text.contains("ops@jump.example.com:22"));
    }

    #[test]
    fn test_all_lists_every_console() {
        let registry = ConsoleRegistry::new();
        registry.insert(console(None));
        registry.insert(console(None));
        assert_eq!(registry.all().len(), 2);
    }

    #[tokio::test]
    async fn test_info_reflects_session_state() {
        let stored = console(None);
        let info = stored.info().await;
        assert_eq!(info.login_state, "menu");
        assert_eq!(info.health_state, "idle");
        assert_eq!(info.buffered_lines, 0);
        assert!(!info.closed);
        assert_eq!(info.target, "ops@jump.example.com:22");
    }
}
