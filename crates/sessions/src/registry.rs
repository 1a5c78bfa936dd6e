use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::{debug, info},
    uuid::Uuid,
};

/// Streaming preferences remembered across reconnects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub fps: Option<u32>,
    pub quality: Option<u8>,
    pub adaptive: Option<bool>,
    /// "widthxheight", e.g. "1280x720".
    pub resolution: Option<String>,
}

/// A stable client identity. The `token` is the opaque credential the client
/// presents on reconnect.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub settings: SessionSettings,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Weak reference: lookup only, the session never owns the browser.
    pub browser_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
}

struct Inner {
    /// id → session.
    sessions: HashMap<String, Session>,
    /// token → id. Mutated together with `sessions` under the same lock so
    /// the mapping stays bijective.
    tokens: HashMap<String, String>,
}

/// In-memory session registry with a secondary token index.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                tokens: HashMap::new(),
            }),
            timeout,
        }
    }

    /// Look up the session for `token` if present and unexpired, refreshing
    /// its activity and peer details; otherwise mint a fresh session.
    pub async fn get_or_create(
        &self,
        token: Option<&str>,
        ip_address: &str,
        user_agent: &str,
    ) -> Session {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let id = inner.tokens.get(token).cloned();
            if let Some(id) = id {
                let expired = inner
                    .sessions
                    .get(&id)
                    .map(|s| now.duration_since(s.last_activity) > self.timeout)
                    .unwrap_or(true);
                if expired {
                    remove_locked(&mut inner, &id);
                } else if let Some(session) = inner.sessions.get_mut(&id) {
                    session.last_activity = now;
                    if session.ip_address != ip_address {
                        session.ip_address = ip_address.to_string();
                    }
                    if session.user_agent != user_agent {
                        session.user_agent = user_agent.to_string();
                    }
                    debug!(session_id = %id, "session resumed");
                    return session.clone();
                }
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            token: Uuid::new_v4().to_string(),
            created_at: now,
            last_activity: now,
            settings: SessionSettings::default(),
            metadata: serde_json::Map::new(),
            browser_id: None,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
        };
        inner
            .tokens
            .insert(session.token.clone(), session.id.clone());
        inner.sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, "session created");
        session
    }

    /// Look up by session id, falling back to token.
    pub async fn get(&self, id_or_token: &str) -> Option<Session> {
        let inner = self.inner.lock().await;
        if let Some(s) = inner.sessions.get(id_or_token) {
            return Some(s.clone());
        }
        let id = inner.tokens.get(id_or_token)?;
        inner.sessions.get(id).cloned()
    }

    /// Apply `f` to the session, refreshing its activity. Returns the updated
    /// session if it exists.
    pub async fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session),
    ) -> Option<Session> {
        let mut inner = self.inner.lock().await;
        let session = inner.sessions.get_mut(id)?;
        f(session);
        session.last_activity = Instant::now();
        Some(session.clone())
    }

    /// Remove the session and its token mapping. Idempotent.
    pub async fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        remove_locked(&mut inner, id)
    }

    /// Resolve a token to its live session. An expired session is deleted and
    /// `None` returned.
    pub async fn validate(&self, token: &str) -> Option<Session> {
        let mut inner = self.inner.lock().await;
        let id = inner.tokens.get(token)?.clone();
        let expired = inner
            .sessions
            .get(&id)
            .map(|s| s.last_activity.elapsed() > self.timeout)
            .unwrap_or(true);
        if expired {
            remove_locked(&mut inner, &id);
            return None;
        }
        inner.sessions.get(&id).cloned()
    }

    /// Record (or clear) the browser instance this session last used.
    pub async fn set_browser_id(&self, id: &str, browser_id: Option<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(id) {
            session.browser_id = browser_id;
            session.last_activity = Instant::now();
        }
    }

    pub async fn all(&self) -> Vec<Session> {
        self.inner.lock().await.sessions.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Destroy every expired session. Returns how many were removed.
    pub async fn reap_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.last_activity.elapsed() > self.timeout)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            remove_locked(&mut inner, id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "reaped expired sessions");
        }
        expired.len()
    }
}

fn remove_locked(inner: &mut Inner, id: &str) -> bool {
    match inner.sessions.remove(id) {
        Some(session) => {
            inner.tokens.remove(&session.token);
            debug!(session_id = %id, "session removed");
            true
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(7200))
    }

    #[tokio::test]
    async fn create_and_resume_by_token() {
        let reg = registry();
        let first = reg.get_or_create(None, "10.0.0.1", "ua-1").await;
        assert_eq!(reg.count().await, 1);

        let resumed = reg
            .get_or_create(Some(&first.token), "10.0.0.2", "ua-2")
            .await;
        assert_eq!(resumed.id, first.id);
        assert_eq!(reg.count().await, 1);

        // Peer details refreshed on resume.
        let fetched = reg.get(&first.id).await.unwrap();
        assert_eq!(fetched.ip_address, "10.0.0.2");
        assert_eq!(fetched.user_agent, "ua-2");
    }

    #[tokio::test]
    async fn unknown_token_mints_new_session() {
        let reg = registry();
        let s = reg.get_or_create(Some("bogus"), "10.0.0.1", "ua").await;
        assert_ne!(s.token, "bogus");
        assert_eq!(reg.count().await, 1);
    }

    #[tokio::test]
    async fn token_index_stays_bijective() {
        let reg = registry();
        let a = reg.get_or_create(None, "1.1.1.1", "ua").await;
        let b = reg.get_or_create(None, "2.2.2.2", "ua").await;

        // Every live session resolvable through its token.
        assert_eq!(reg.get(&a.token).await.unwrap().id, a.id);
        assert_eq!(reg.get(&b.token).await.unwrap().id, b.id);

        assert!(reg.delete(&a.id).await);
        // Token entry removed with the session, no dangling mapping.
        assert!(reg.get(&a.token).await.is_none());
        assert_eq!(reg.get(&b.token).await.unwrap().id, b.id);

        // Second delete is a no-op.
        assert!(!reg.delete(&a.id).await);
    }

    #[tokio::test]
    async fn validate_deletes_expired() {
        let reg = SessionRegistry::new(Duration::from_millis(0));
        let s = reg.get_or_create(None, "1.1.1.1", "ua").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(reg.validate(&s.token).await.is_none());
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn reap_expired_removes_only_stale() {
        let reg = SessionRegistry::new(Duration::from_millis(50));
        let old = reg.get_or_create(None, "1.1.1.1", "ua").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let fresh = reg.get_or_create(None, "2.2.2.2", "ua").await;

        assert_eq!(reg.reap_expired().await, 1);
        assert!(reg.get(&old.id).await.is_none());
        assert!(reg.get(&fresh.id).await.is_some());
    }

    #[tokio::test]
    async fn browser_id_is_weak_reference() {
        let reg = registry();
        let s = reg.get_or_create(None, "1.1.1.1", "ua").await;
        reg.set_browser_id(&s.id, Some("browser-1".into())).await;
        assert_eq!(
            reg.get(&s.id).await.unwrap().browser_id.as_deref(),
            Some("browser-1")
        );
        reg.set_browser_id(&s.id, None).await;
        assert!(reg.get(&s.id).await.unwrap().browser_id.is_none());
    }

    #[tokio::test]
    async fn update_applies_settings() {
        let reg = registry();
        let s = reg.get_or_create(None, "1.1.1.1", "ua").await;
        let updated = reg
            .update(&s.id, |s| {
                s.settings.fps = Some(24);
                s.settings.resolution = Some("1920x1080".into());
            })
            .await
            .unwrap();
        assert_eq!(updated.settings.fps, Some(24));
        assert!(reg.update("missing", |_| {}).await.is_none());
    }
}
