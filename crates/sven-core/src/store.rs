// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Multi-session registry: resolves, appends to, compacts, and prunes
//! [`Session`]s keyed by a caller-chosen [`SessionKey`].
//!
//! Sessions live behind a map-level lock (for create/delete/rename) and each
//! session behind its own lock (for append/compact), so two callers writing
//! to different sessions never block each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use sven_config::{CompactionStrategy, SessionStoreConfig};
use sven_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};

use crate::compact::compact_session_with_strategy;
use crate::error::SessionError;
use crate::session::Session;

/// Bound on the number of durable facts retained per session; once the map
/// would exceed it, arbitrary entries are evicted to make room (the map
/// does not track insertion order).
const MAX_FACTS_PER_SESSION: usize = 200;

const MEMORY_FLUSH_PROMPT: &str = "\
Extract durable facts worth remembering across a context compaction — user \
preferences, stable decisions, identifiers, file paths. Reply with one \
`key: value` pair per line. Do not restate transient conversational detail.";

/// Identifies one session within a store. Two callers resolving the same key
/// concurrently are guaranteed to land on the same [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session plus the bookkeeping the store needs that doesn't belong on
/// [`Session`] itself (last-activity clock, preventive-compaction flag).
struct Entry {
    session: Arc<Mutex<Session>>,
    last_activity: Mutex<Instant>,
    /// Set while a preventive compaction has been scheduled for this session
    /// but not yet run, so concurrent appends don't each queue their own.
    compaction_pending: std::sync::atomic::AtomicBool,
    /// Durable facts extracted by memory-flush turns, last-writer-wins.
    facts: Mutex<HashMap<String, String>>,
}

/// Serializable point-in-time snapshot of a session, returned by
/// [`SessionStore::export`] and consumed by [`SessionStore::import`] to
/// reconstruct an indistinguishable session elsewhere (or after a `delete`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub max_tokens: usize,
    pub max_output_tokens: usize,
    pub schema_overhead: usize,
    pub cache_read_total: u32,
    pub cache_write_total: u32,
    pub facts: HashMap<String, String>,
}

/// Registry of in-process conversation sessions.
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: RwLock<HashMap<SessionKey, Arc<Entry>>>,
    default_max_tokens: usize,
    /// Used for the `summarize` strategy's memory-flush turn and the
    /// summarization call itself. `None` stores fall back to `Sliding`
    /// whenever `Summarize` is configured, since there's no model to call.
    model: Option<Arc<dyn ModelProvider>>,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig, default_max_tokens: usize) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            default_max_tokens,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ModelProvider>) -> Self {
        self.model = Some(model);
        self
    }

    /// Return the session for `key`, creating it if it doesn't exist yet.
    /// Idempotent under concurrent callers: the map-level write lock is only
    /// taken when the key is actually missing, and re-checked after
    /// acquisition in case another caller won the race.
    pub async fn resolve(&self, key: &SessionKey) -> Arc<Mutex<Session>> {
        if let Some(entry) = self.sessions.read().await.get(key) {
            *entry.last_activity.lock().await = Instant::now();
            return entry.session.clone();
        }
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(key) {
            return entry.session.clone();
        }
        let entry = Arc::new(Entry {
            session: Arc::new(Mutex::new(Session::new(self.default_max_tokens))),
            last_activity: Mutex::new(Instant::now()),
            compaction_pending: std::sync::atomic::AtomicBool::new(false),
            facts: Mutex::new(HashMap::new()),
        });
        sessions.insert(key.clone(), entry.clone());
        entry.session.clone()
    }

    /// Append `msg` to the session for `key`, then run a preventive
    /// compaction if the session just crossed `compaction_threshold`. At
    /// most one preventive compaction is ever pending per session — a second
    /// append that also crosses the threshold while the first compaction is
    /// already running is a no-op on this front.
    pub async fn append(&self, key: &SessionKey, msg: Message) -> anyhow::Result<()> {
        let entry = self.entry_for(key).await;
        *entry.last_activity.lock().await = Instant::now();

        {
            let mut session = entry.session.lock().await;
            session.push(msg);
        }

        let over_threshold = {
            let session = entry.session.lock().await;
            session.messages.len() as f32
                >= self.config.max_messages as f32 * self.config.compaction_threshold
        };
        if !over_threshold {
            return Ok(());
        }
        if entry
            .compaction_pending
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Ok(());
        }
        let result = self.compact(key, self.config.compaction_strategy.clone()).await;
        entry
            .compaction_pending
            .store(false, std::sync::atomic::Ordering::SeqCst);
        result
    }

    /// Return the last `n` messages of the session, oldest first.
    pub async fn recent(&self, key: &SessionKey, n: usize) -> Vec<Message> {
        let entry = self.entry_for(key).await;
        let session = entry.session.lock().await;
        let len = session.messages.len();
        session.messages[len.saturating_sub(n)..].to_vec()
    }

    /// Rewrite the session's history in place using `strategy`.
    ///
    /// `Summarize` keeps the teacher's original behaviour of replacing the
    /// history with a single summarisation request for the next model turn —
    /// it does not itself call the model; the caller's agent loop does that
    /// on its next round. Deterministic strategies (`Truncate`/`Sliding`)
    /// apply immediately and recompute `token_count`.
    pub async fn compact(&self, key: &SessionKey, strategy: CompactionStrategy) -> anyhow::Result<()> {
        if matches!(strategy, CompactionStrategy::Summarize) && self.model.is_some() {
            self.flush_memory(key).await?;
        }

        let entry = self.entry_for(key).await;
        let mut session = entry.session.lock().await;
        let system_msg = session
            .messages
            .first()
            .filter(|m| m.role == sven_model::Role::System)
            .cloned();
        let keep_n = ((session.messages.len() as f32) * self.config.compaction_keep_ratio)
            .round() as usize;
        match strategy {
            CompactionStrategy::Truncate => {
                crate::compact::emergency_compact(&mut session.messages, system_msg, keep_n.max(1));
            }
            CompactionStrategy::Sliding => {
                crate::compact::sliding_compact(&mut session.messages, system_msg, keep_n.max(1));
            }
            CompactionStrategy::Summarize => {
                compact_session_with_strategy(&mut session.messages, system_msg, &strategy);
            }
        }
        session.recalculate_tokens();
        Ok(())
    }

    /// Durable facts extracted by memory-flush turns for this session.
    pub async fn facts(&self, key: &SessionKey) -> HashMap<String, String> {
        let entry = self.entry_for(key).await;
        entry.facts.lock().await.clone()
    }

    /// Ask the model to extract durable facts from the current history and
    /// merge them into the session's facts map (last-writer-wins), before a
    /// `summarize` compaction discards that history. Runs sequentially and
    /// to completion before returning, so the facts are guaranteed present
    /// by the time the caller issues the summarization call — running the
    /// two concurrently would let the summary miss facts extracted a moment
    /// too late.
    async fn flush_memory(&self, key: &SessionKey) -> anyhow::Result<()> {
        let Some(model) = self.model.clone() else {
            return Ok(());
        };
        let entry = self.entry_for(key).await;
        let history = {
            let session = entry.session.lock().await;
            session.messages.clone()
        };
        if history.is_empty() {
            return Ok(());
        }

        let mut req = CompletionRequest::default();
        req.messages = history;
        req.messages.push(Message::user(MEMORY_FLUSH_PROMPT));

        let mut stream = model.complete(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let ResponseEvent::TextDelta(delta) = event? {
                text.push_str(&delta);
            }
        }

        let mut facts = entry.facts.lock().await;
        for line in text.lines() {
            let Some((k, v)) = line.split_once(':') else { continue };
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                continue;
            }
            facts.insert(k.to_string(), v.to_string());
        }
        while facts.len() > MAX_FACTS_PER_SESSION {
            let Some(oldest) = facts.keys().next().cloned() else { break };
            facts.remove(&oldest);
        }
        Ok(())
    }

    pub async fn delete(&self, key: &SessionKey) -> bool {
        self.sessions.write().await.remove(key).is_some()
    }

    /// Serializable snapshot suitable for persistence or debugging.
    pub async fn export(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(key)?;
        let session = entry.session.lock().await;
        let facts = entry.facts.lock().await.clone();
        Some(SessionSnapshot {
            key: key.0.clone(),
            messages: session.messages.clone(),
            token_count: session.token_count,
            max_tokens: session.max_tokens,
            max_output_tokens: session.max_output_tokens,
            schema_overhead: session.schema_overhead,
            cache_read_total: session.cache_read_total,
            cache_write_total: session.cache_write_total,
            facts,
        })
    }

    /// Reconstruct a session from a prior [`Self::export`] snapshot under
    /// `key`, overwriting whatever (if anything) currently lives there.
    ///
    /// `export(session); delete(session); import(exported)` must yield a
    /// session indistinguishable from the original in history and facts —
    /// this is the inverse of `export` and is the only way to repopulate a
    /// store entry without replaying the conversation through the model.
    pub async fn import(&self, snapshot: SessionSnapshot) -> SessionKey {
        let key = SessionKey::new(snapshot.key);
        let mut session = Session::new(snapshot.max_tokens);
        session.max_output_tokens = snapshot.max_output_tokens;
        session.schema_overhead = snapshot.schema_overhead;
        session.cache_read_total = snapshot.cache_read_total;
        session.cache_write_total = snapshot.cache_write_total;
        session.push_many(snapshot.messages);

        let entry = Arc::new(Entry {
            session: Arc::new(Mutex::new(session)),
            last_activity: Mutex::new(Instant::now()),
            compaction_pending: std::sync::atomic::AtomicBool::new(false),
            facts: Mutex::new(snapshot.facts),
        });
        self.sessions.write().await.insert(key.clone(), entry);
        key
    }

    /// Move a session to a new key.
    pub async fn rename(&self, old: &SessionKey, new: SessionKey) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&new) {
            return Err(SessionError::KeyTaken(new.0));
        }
        match sessions.remove(old) {
            Some(entry) => {
                sessions.insert(new, entry);
                Ok(())
            }
            None => Err(SessionError::NotFound(old.0.clone())),
        }
    }

    /// Evict sessions whose last activity exceeds the configured TTL.
    /// Returns the keys that were pruned.
    pub async fn prune(&self) -> Vec<SessionKey> {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let mut sessions = self.sessions.write().await;
        let mut stale = Vec::new();
        for (key, entry) in sessions.iter() {
            if entry.last_activity.lock().await.elapsed() >= ttl {
                stale.push(key.clone());
            }
        }
        for key in &stale {
            sessions.remove(key);
        }
        stale
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn entry_for(&self, key: &SessionKey) -> Arc<Entry> {
        if let Some(entry) = self.sessions.read().await.get(key) {
            return entry.clone();
        }
        self.resolve(key).await;
        self.sessions.read().await.get(key).cloned().expect("just resolved")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sven_model::Message;

    fn store(max_messages: usize) -> SessionStore {
        SessionStore::new(
            SessionStoreConfig {
                max_messages,
                compaction_threshold: 0.8,
                compaction_strategy: CompactionStrategy::Sliding,
                compaction_keep_ratio: 0.5,
                session_ttl_secs: 3600,
            },
            100_000,
        )
    }

    #[tokio::test]
    async fn resolve_creates_session_on_first_call() {
        let store = store(100);
        let key = SessionKey::new("a");
        assert_eq!(store.len().await, 0);
        store.resolve(&key).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn resolve_is_idempotent_for_same_key() {
        let store = store(100);
        let key = SessionKey::new("a");
        let s1 = store.resolve(&key).await;
        let s2 = store.resolve(&key).await;
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn resolve_concurrent_callers_share_one_session() {
        let store = Arc::new(store(100));
        let key = SessionKey::new("shared");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { store.resolve(&key).await }));
        }
        let mut sessions = Vec::new();
        for h in handles {
            sessions.push(h.await.unwrap());
        }
        for s in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], s));
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn append_increments_message_count() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("hi")).await.unwrap();
        let recent = store.recent(&key, 10).await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn append_triggers_preventive_compaction_past_threshold() {
        let store = store(4); // threshold 0.8 → compacts once len >= 3.2, i.e. at 4 messages
        let key = SessionKey::new("a");
        for i in 0..5 {
            store
                .append(&key, Message::user(format!("msg {i}")))
                .await
                .unwrap();
        }
        let recent = store.recent(&key, 100).await;
        // Sliding compaction with keep_ratio 0.5 should have dropped some history.
        assert!(recent.len() < 5);
    }

    #[tokio::test]
    async fn recent_returns_last_n_in_order() {
        let store = store(100);
        let key = SessionKey::new("a");
        for i in 0..5 {
            store
                .append(&key, Message::user(format!("{i}")))
                .await
                .unwrap();
        }
        let recent = store.recent(&key, 2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].as_text(), Some("3"));
        assert_eq!(recent[1].as_text(), Some("4"));
    }

    #[tokio::test]
    async fn recent_n_larger_than_history_returns_all() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("only")).await.unwrap();
        let recent = store.recent(&key, 50).await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn compact_truncate_keeps_tail_only() {
        let store = store(100);
        let key = SessionKey::new("a");
        for i in 0..10 {
            store
                .append(&key, Message::user(format!("{i}")))
                .await
                .unwrap();
        }
        store.compact(&key, CompactionStrategy::Truncate).await.unwrap();
        let recent = store.recent(&key, 100).await;
        assert!(recent.len() < 10);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.resolve(&key).await;
        assert!(store.delete(&key).await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn delete_unknown_key_returns_false() {
        let store = store(100);
        assert!(!store.delete(&SessionKey::new("nope")).await);
    }

    #[tokio::test]
    async fn export_returns_none_for_unknown_key() {
        let store = store(100);
        assert!(store.export(&SessionKey::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn export_returns_snapshot_with_messages() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("hi")).await.unwrap();
        let snap = store.export(&key).await.unwrap();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.key, "a");
    }

    #[tokio::test]
    async fn export_delete_import_round_trip_is_indistinguishable() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("hello")).await.unwrap();
        store.append(&key, Message::assistant("hi there")).await.unwrap();
        store.entry_for(&key).await.facts.lock().await.insert(
            "preferred_language".to_string(),
            "Rust".to_string(),
        );

        let before = store.export(&key).await.unwrap();

        assert!(store.delete(&key).await);
        assert!(store.export(&key).await.is_none());

        let restored_key = store.import(before.clone()).await;
        assert_eq!(restored_key, key);

        let after = store.export(&restored_key).await.unwrap();
        assert_eq!(
            serde_json::to_string(&after.messages).unwrap(),
            serde_json::to_string(&before.messages).unwrap(),
        );
        assert_eq!(after.token_count, before.token_count);
        assert_eq!(after.max_tokens, before.max_tokens);
        assert_eq!(after.facts, before.facts);
        assert_eq!(after.facts.get("preferred_language"), Some(&"Rust".to_string()));
    }

    #[tokio::test]
    async fn import_overwrites_an_existing_session_at_the_same_key() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("original")).await.unwrap();
        let snap = store.export(&key).await.unwrap();

        store.append(&key, Message::user("mutated after export")).await.unwrap();
        assert_eq!(store.export(&key).await.unwrap().messages.len(), 2);

        store.import(snap).await;
        assert_eq!(store.export(&key).await.unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn rename_moves_session_to_new_key() {
        let store = store(100);
        let old = SessionKey::new("old");
        let new = SessionKey::new("new");
        store.append(&old, Message::user("hi")).await.unwrap();
        store.rename(&old, new.clone()).await.unwrap();
        assert!(store.export(&old).await.is_none());
        assert!(store.export(&new).await.is_some());
    }

    #[tokio::test]
    async fn rename_fails_if_new_key_taken() {
        let store = store(100);
        let old = SessionKey::new("old");
        let new = SessionKey::new("new");
        store.resolve(&old).await;
        store.resolve(&new).await;
        assert!(matches!(
            store.rename(&old, new).await,
            Err(crate::error::SessionError::KeyTaken(_))
        ));
    }

    #[tokio::test]
    async fn rename_fails_if_old_key_missing() {
        let store = store(100);
        assert!(matches!(
            store.rename(&SessionKey::new("nope"), SessionKey::new("new")).await,
            Err(crate::error::SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prune_evicts_nothing_within_ttl() {
        let store = store(100);
        let key = SessionKey::new("a");
        store.resolve(&key).await;
        let pruned = store.prune().await;
        assert!(pruned.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn summarize_flushes_facts_before_compacting() {
        use sven_model::ScriptedMockProvider;

        let model = Arc::new(ScriptedMockProvider::new(vec![vec![ResponseEvent::TextDelta(
            "preferred_language: Rust\nworks_at: Acme".into(),
        )]]));
        let store = SessionStore::new(
            SessionStoreConfig {
                max_messages: 100,
                compaction_threshold: 0.8,
                compaction_strategy: CompactionStrategy::Summarize,
                compaction_keep_ratio: 0.5,
                session_ttl_secs: 3600,
            },
            100_000,
        )
        .with_model(model);
        let key = SessionKey::new("a");
        store.append(&key, Message::user("I use Rust")).await.unwrap();

        store.compact(&key, CompactionStrategy::Summarize).await.unwrap();

        let facts = store.facts(&key).await;
        assert_eq!(facts.get("preferred_language"), Some(&"Rust".to_string()));
        assert_eq!(facts.get("works_at"), Some(&"Acme".to_string()));
    }

    #[tokio::test]
    async fn summarize_without_model_skips_flush_but_still_compacts() {
        let store = SessionStore::new(
            SessionStoreConfig {
                max_messages: 100,
                compaction_threshold: 0.8,
                compaction_strategy: CompactionStrategy::Summarize,
                compaction_keep_ratio: 0.5,
                session_ttl_secs: 3600,
            },
            100_000,
        );
        let key = SessionKey::new("a");
        store.append(&key, Message::user("hello")).await.unwrap();
        store.compact(&key, CompactionStrategy::Summarize).await.unwrap();
        assert!(store.facts(&key).await.is_empty());
        let recent = store.recent(&key, 100).await;
        assert_eq!(recent.len(), 1); // system_msg absent, summary request replaces history
    }

    #[tokio::test]
    async fn prune_evicts_sessions_past_ttl() {
        let mut store = store(100);
        store.config.session_ttl_secs = 0;
        let key = SessionKey::new("a");
        store.resolve(&key).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let pruned = store.prune().await;
        assert_eq!(pruned, vec![key]);
        assert_eq!(store.len().await, 0);
    }
}
