//! Registered set: `name → { registered, fingerprint }`, the ancillary bookkeeping shared
//! by C7, C8, C9, and C10. Mutation is serialized by a single reader-writer lock; writers
//! are always followed by the caller issuing a corresponding `registry.add`/`remove`.

use std::collections::HashMap;

use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEntry {
    pub registered: bool,
    pub fingerprint: String,
}

#[derive(Default)]
pub struct RegisteredSet {
    entries: RwLock<HashMap<String, RegisteredEntry>>,
}

impl RegisteredSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.registered)
            .unwrap_or(false)
    }

    pub async fn fingerprint(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.fingerprint.clone())
    }

    pub async fn mark_registered(&self, name: &str, fingerprint: String) {
        self.entries.write().await.insert(
            name.to_string(),
            RegisteredEntry {
                registered: true,
                fingerprint,
            },
        );
    }

    pub async fn unregister(&self, name: &str) {
        self.entries.write().await.remove(name);
    }

    pub async fn registered_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_then_query_round_trips() {
        let set = RegisteredSet::new();
        assert!(!set.is_registered("dev").await);

        set.mark_registered("dev", "fp1".to_string()).await;
        assert!(set.is_registered("dev").await);
        assert_eq!(set.fingerprint("dev").await.as_deref(), Some("fp1"));

        set.unregister("dev").await;
        assert!(!set.is_registered("dev").await);
        assert_eq!(set.fingerprint("dev").await, None);
    }

    #[tokio::test]
    async fn registered_names_reflects_current_membership() {
        let set = RegisteredSet::new();
        set.mark_registered("a", "fp".to_string()).await;
        set.mark_registered("b", "fp".to_string()).await;
        let mut names = set.registered_names().await;
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
