use crate::error::{BtError, BtResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

pub const DEFAULT_NAMESPACE: &str = "default";
const ACTIVITY_LOG_CAPACITY: usize = 1024;

/// A single entry stored in a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: Option<String>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityOp {
    Set,
    Delete,
    Clear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub op: ActivityOp,
    pub namespace: String,
    pub key: String,
    pub actor: Option<String>,
    pub old_version: Option<u64>,
    pub new_version: Option<u64>,
}

pub type Namespace = HashMap<String, Entry>;

/// A write callback fired outside the critical section: (key, new, old).
pub type Observer = Arc<dyn Fn(&str, Option<&Value>, Option<&Value>) + Send + Sync>;

struct Subscription {
    id: u64,
    observer: Observer,
}

struct Inner {
    namespaces: HashMap<String, Namespace>,
    subscriptions: HashMap<(String, String), Vec<Subscription>>,
    activity_log: VecDeque<ActivityRecord>,
    implicit_namespaces: bool,
}

impl Inner {
    fn new(implicit_namespaces: bool) -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), HashMap::new());
        Self {
            namespaces,
            subscriptions: HashMap::new(),
            activity_log: VecDeque::new(),
            implicit_namespaces,
        }
    }

    fn push_activity(&mut self, record: ActivityRecord) {
        if self.activity_log.len() >= ACTIVITY_LOG_CAPACITY {
            self.activity_log.pop_front();
        }
        self.activity_log.push_back(record);
    }
}

/// A pending callback fire, collected under the write lock and drained after
/// release so observers never re-enter the mutex (spec §4.2/§5).
struct PendingCallback {
    namespace: String,
    key: String,
    new_value: Option<Value>,
    old_value: Option<Value>,
}

/// Namespaced, observable, optionally snapshottable key-value store shared
/// between leaves of a behavior tree.
///
/// Cheaply cloneable: clones share the same underlying store via `Arc`.
#[derive(Clone)]
pub struct Blackboard {
    inner: Arc<RwLock<Inner>>,
    next_sub_id: Arc<AtomicU64>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self::with_implicit_namespaces(true)
    }

    pub fn with_implicit_namespaces(implicit_namespaces: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::new(implicit_namespaces))),
            next_sub_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Idempotent: succeeds whether `name` is new or already present.
    pub async fn create_namespace(&self, name: &str) {
        let mut inner = self.inner.write().await;
        inner
            .namespaces
            .entry(name.to_string())
            .or_insert_with(HashMap::new);
    }

    #[instrument(skip(self, value), fields(namespace, key))]
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        namespace: &str,
        actor: Option<&str>,
    ) -> BtResult<()> {
        let (old_value, new_version, old_version, callback) = {
            let mut inner = self.inner.write().await;

            if !inner.namespaces.contains_key(namespace) {
                if inner.implicit_namespaces {
                    inner.namespaces.insert(namespace.to_string(), HashMap::new());
                } else {
                    return Err(BtError::ConfigInvalid(format!(
                        "namespace '{namespace}' does not exist and implicit creation is disabled"
                    )));
                }
            }

            let now = Utc::now();
            let ns = inner.namespaces.get_mut(namespace).expect("just ensured");
            let old_entry = ns.get(key).cloned();
            let old_value = old_entry.as_ref().map(|e| e.value.clone());
            let old_version = old_entry.as_ref().map(|e| e.version);
            let new_version = old_version.map(|v| v + 1).unwrap_or(1);

            let entry = Entry {
                value: value.clone(),
                created_at: old_entry.map(|e| e.created_at).unwrap_or(now),
                last_modified_at: now,
                last_modified_by: actor.map(str::to_string),
                version: new_version,
            };
            ns.insert(key.to_string(), entry);

            inner.push_activity(ActivityRecord {
                timestamp: now,
                op: ActivityOp::Set,
                namespace: namespace.to_string(),
                key: key.to_string(),
                actor: actor.map(str::to_string),
                old_version,
                new_version: Some(new_version),
            });

            let callback = PendingCallback {
                namespace: namespace.to_string(),
                key: key.to_string(),
                new_value: Some(value),
                old_value: old_value.clone(),
            };
            (old_value, new_version, old_version, callback)
        };
        debug!(namespace, key, new_version, ?old_version, "blackboard set");
        self.fire_callbacks(std::iter::once(callback)).await;
        let _ = old_value;
        Ok(())
    }

    pub async fn get(&self, key: &str, namespace: &str) -> BtResult<Value> {
        let inner = self.inner.read().await;
        inner
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|e| e.value.clone())
            .ok_or_else(|| BtError::KeyNotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    pub async fn get_or(&self, key: &str, namespace: &str, default: Value) -> Value {
        self.get(key, namespace).await.unwrap_or(default)
    }

    pub async fn get_entry(&self, key: &str, namespace: &str) -> Option<Entry> {
        let inner = self.inner.read().await;
        inner.namespaces.get(namespace).and_then(|ns| ns.get(key)).cloned()
    }

    /// Removes `key` if present. A delete on a missing key is a no-op,
    /// reported via the `Ok(false)` return rather than raised as an error.
    #[instrument(skip(self), fields(namespace, key))]
    pub async fn delete(&self, key: &str, namespace: &str, actor: Option<&str>) -> BtResult<bool> {
        let (removed, callback) = {
            let mut inner = self.inner.write().await;
            let now = Utc::now();
            let removed_entry = inner
                .namespaces
                .get_mut(namespace)
                .and_then(|ns| ns.remove(key));

            let Some(entry) = removed_entry else {
                return Ok(false);
            };

            inner.push_activity(ActivityRecord {
                timestamp: now,
                op: ActivityOp::Delete,
                namespace: namespace.to_string(),
                key: key.to_string(),
                actor: actor.map(str::to_string),
                old_version: Some(entry.version),
                new_version: None,
            });

            let callback = PendingCallback {
                namespace: namespace.to_string(),
                key: key.to_string(),
                new_value: None,
                old_value: Some(entry.value),
            };
            (true, callback)
        };
        self.fire_callbacks(std::iter::once(callback)).await;
        Ok(removed)
    }

    /// Wipes a namespace, or all namespaces when `namespace` is `None`.
    pub async fn clear(&self, namespace: Option<&str>) {
        let (now, touched, callbacks) = {
            let mut inner = self.inner.write().await;
            let now = Utc::now();
            let targets: Vec<String> = match namespace {
                Some(ns) => vec![ns.to_string()],
                None => inner.namespaces.keys().cloned().collect(),
            };

            let mut callbacks = Vec::new();
            for ns_name in &targets {
                if let Some(ns) = inner.namespaces.get_mut(ns_name) {
                    for (key, entry) in ns.drain() {
                        callbacks.push(PendingCallback {
                            namespace: ns_name.clone(),
                            key,
                            new_value: None,
                            old_value: Some(entry.value),
                        });
                    }
                }
                inner.push_activity(ActivityRecord {
                    timestamp: now,
                    op: ActivityOp::Clear,
                    namespace: ns_name.clone(),
                    key: String::new(),
                    actor: None,
                    old_version: None,
                    new_version: None,
                });
            }
            (now, targets, callbacks)
        };
        let _ = (now, touched);
        self.fire_callbacks(callbacks.into_iter()).await;
    }

    pub async fn subscribe(&self, key: &str, namespace: &str, observer: Observer) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner
            .subscriptions
            .entry((namespace.to_string(), key.to_string()))
            .or_insert_with(Vec::new)
            .push(Subscription { id, observer });
        id
    }

    pub async fn unsubscribe(&self, key: &str, namespace: &str, id: u64) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner
            .subscriptions
            .get_mut(&(namespace.to_string(), key.to_string()))
        {
            subs.retain(|s| s.id != id);
        }
    }

    async fn fire_callbacks(&self, callbacks: impl Iterator<Item = PendingCallback>) {
        for cb in callbacks {
            let subs = {
                let inner = self.inner.read().await;
                inner
                    .subscriptions
                    .get(&(cb.namespace.clone(), cb.key.clone()))
                    .map(|v| v.iter().map(|s| s.observer.clone()).collect::<Vec<_>>())
                    .unwrap_or_default()
            };
            for observer in subs {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    observer(&cb.key, cb.new_value.as_ref(), cb.old_value.as_ref());
                }));
                if result.is_err() {
                    warn!(
                        namespace = cb.namespace,
                        key = cb.key,
                        "blackboard observer panicked; continuing"
                    );
                }
            }
        }
    }

    pub async fn activity_log(&self) -> Vec<ActivityRecord> {
        self.inner.read().await.activity_log.iter().cloned().collect()
    }

    /// Serializes all namespaces and entries to a structured file
    /// (spec §6 snapshot file schema). The activity log is not persisted.
    pub async fn save(&self, path: impl AsRef<Path>) -> BtResult<()> {
        let path = path.as_ref();
        let doc = {
            let inner = self.inner.read().await;
            BlackboardFile {
                version: 1,
                namespaces: inner.namespaces.clone(),
            }
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json)
            .await
            .map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Loads namespaces and entries from a file saved by [`Blackboard::save`].
    /// Versions resume from the stored values.
    pub async fn load(&self, path: impl AsRef<Path>) -> BtResult<()> {
        let json = fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;
        let doc: BlackboardFile =
            serde_json::from_str(&json).map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;

        let mut inner = self.inner.write().await;
        inner.namespaces = doc.namespaces;
        inner
            .namespaces
            .entry(DEFAULT_NAMESPACE.to_string())
            .or_insert_with(HashMap::new);
        Ok(())
    }

    /// Deep-copies the current namespaces, used by `TreeManager::take_snapshot`.
    pub async fn deep_copy(&self) -> HashMap<String, Namespace> {
        self.inner.read().await.namespaces.clone()
    }

    /// Restores namespaces from a prior deep copy (used by `restore_snapshot`).
    pub async fn restore(&self, namespaces: HashMap<String, Namespace>) {
        let mut inner = self.inner.write().await;
        inner.namespaces = namespaces;
    }
}

#[derive(Serialize, Deserialize)]
struct BlackboardFile {
    version: u32,
    namespaces: HashMap<String, Namespace>,
}

/// A scoped view over a [`Blackboard`] that filters operations to an
/// allowed set of namespaces and, optionally, allowed read/write key sets.
#[derive(Clone)]
pub struct Client {
    blackboard: Blackboard,
    allowed_namespaces: HashSet<String>,
    read_keys: Option<HashSet<String>>,
    write_keys: Option<HashSet<String>>,
    actor_id: String,
}

impl Client {
    pub fn new(blackboard: Blackboard, actor_id: impl Into<String>) -> Self {
        let mut allowed_namespaces = HashSet::new();
        allowed_namespaces.insert(DEFAULT_NAMESPACE.to_string());
        Self {
            blackboard,
            allowed_namespaces,
            read_keys: None,
            write_keys: None,
            actor_id: actor_id.into(),
        }
    }

    pub fn allow_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.allowed_namespaces.insert(namespace.into());
        self
    }

    pub fn restrict_reads(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.read_keys = Some(keys.into_iter().collect());
        self
    }

    pub fn restrict_writes(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.write_keys = Some(keys.into_iter().collect());
        self
    }

    fn check_namespace(&self, namespace: &str, key: &str) -> BtResult<()> {
        if !self.allowed_namespaces.contains(namespace) {
            return Err(BtError::AccessDenied {
                actor: self.actor_id.clone(),
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub async fn get(&self, key: &str, namespace: &str) -> BtResult<Value> {
        self.check_namespace(namespace, key)?;
        if let Some(allowed) = &self.read_keys {
            if !allowed.contains(key) {
                return Err(BtError::AccessDenied {
                    actor: self.actor_id.clone(),
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                });
            }
        }
        self.blackboard.get(key, namespace).await
    }

    pub async fn set(&self, key: &str, value: Value, namespace: &str) -> BtResult<()> {
        self.check_namespace(namespace, key)?;
        if let Some(allowed) = &self.write_keys {
            if !allowed.contains(key) {
                return Err(BtError::AccessDenied {
                    actor: self.actor_id.clone(),
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                });
            }
        }
        self.blackboard
            .set(key, value, namespace, Some(&self.actor_id))
            .await
    }

    pub async fn delete(&self, key: &str, namespace: &str) -> BtResult<bool> {
        self.check_namespace(namespace, key)?;
        self.blackboard
            .delete(key, namespace, Some(&self.actor_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let bb = Blackboard::new();
        bb.set("battery_level", json!(85), DEFAULT_NAMESPACE, None)
            .await
            .unwrap();
        let v = bb.get("battery_level", DEFAULT_NAMESPACE).await.unwrap();
        assert_eq!(v, json!(85));
    }

    #[tokio::test]
    async fn missing_key_without_default_fails() {
        let bb = Blackboard::new();
        let err = bb.get("nope", DEFAULT_NAMESPACE).await.unwrap_err();
        assert!(matches!(err, BtError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_key_with_default_succeeds() {
        let bb = Blackboard::new();
        let v = bb.get_or("nope", DEFAULT_NAMESPACE, json!(0)).await;
        assert_eq!(v, json!(0));
    }

    #[tokio::test]
    async fn version_strictly_increases_across_writes() {
        let bb = Blackboard::new();
        bb.set("k", json!(1), DEFAULT_NAMESPACE, None).await.unwrap();
        let v1 = bb.get_entry("k", DEFAULT_NAMESPACE).await.unwrap().version;
        bb.set("k", json!(2), DEFAULT_NAMESPACE, None).await.unwrap();
        let v2 = bb.get_entry("k", DEFAULT_NAMESPACE).await.unwrap().version;
        bb.set("k", json!(3), DEFAULT_NAMESPACE, None).await.unwrap();
        let v3 = bb.get_entry("k", DEFAULT_NAMESPACE).await.unwrap().version;
        assert!(v1 < v2);
        assert!(v2 < v3);
    }

    #[tokio::test]
    async fn delete_missing_key_is_a_reported_no_op() {
        let bb = Blackboard::new();
        let removed = bb.delete("nope", DEFAULT_NAMESPACE, None).await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn subscriber_observes_writes_in_order() {
        let bb = Blackboard::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bb.subscribe(
            "k",
            DEFAULT_NAMESPACE,
            Arc::new(move |_k, new, _old| {
                seen2.lock().unwrap().push(new.cloned());
            }),
        )
        .await;

        bb.set("k", json!(1), DEFAULT_NAMESPACE, None).await.unwrap();
        bb.set("k", json!(2), DEFAULT_NAMESPACE, None).await.unwrap();
        bb.delete("k", DEFAULT_NAMESPACE, None).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![Some(json!(1)), Some(json!(2)), None]);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_others() {
        let bb = Blackboard::new();
        let count = Arc::new(AtomicUsize::new(0));
        bb.subscribe(
            "k",
            DEFAULT_NAMESPACE,
            Arc::new(|_k, _n, _o| panic!("boom")),
        )
        .await;
        let c = count.clone();
        bb.subscribe(
            "k",
            DEFAULT_NAMESPACE,
            Arc::new(move |_k, _n, _o| {
                c.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        )
        .await;

        bb.set("k", json!(1), DEFAULT_NAMESPACE, None).await.unwrap();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_denies_access_outside_allowed_namespace() {
        let bb = Blackboard::new();
        let client = Client::new(bb.clone(), "leaf-1");
        let err = client.get("k", "secrets").await.unwrap_err();
        assert!(matches!(err, BtError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn client_allows_scoped_namespace() {
        let bb = Blackboard::new();
        let client = Client::new(bb.clone(), "leaf-1").allow_namespace("robot");
        client.set("x", json!(1), "robot").await.unwrap();
        assert_eq!(client.get("x", "robot").await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn save_and_load_round_trip_preserves_versions() {
        let dir = std::env::temp_dir().join(format!("bt_bb_test_{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("snapshot.json");

        let bb = Blackboard::new();
        bb.set("k", json!("v1"), DEFAULT_NAMESPACE, None).await.unwrap();
        bb.set("k", json!("v2"), DEFAULT_NAMESPACE, None).await.unwrap();
        bb.save(&path).await.unwrap();

        let restored = Blackboard::new();
        restored.load(&path).await.unwrap();
        let entry = restored.get_entry("k", DEFAULT_NAMESPACE).await.unwrap();
        assert_eq!(entry.value, json!("v2"));
        assert_eq!(entry.version, 2);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
