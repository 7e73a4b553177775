//! Multi-tenant session lifecycle.
//!
//! One session per context id, each owning its conversation engine.
//! Sessions are created lazily on first reference and die on explicit
//! finish, on the idle-timeout sweep, or when the manager shuts down.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cleverchatty_agent::{
    AgentMessageCallback, ConversationEngine, EngineError, NotificationCallback,
};
use cleverchatty_core::config::CleverChattyConfig;
use cleverchatty_tools::ReverseCapability;

/// Sweep cadence for the idle reaper.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Session {
    pub context_id: String,
    pub client_agent_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Monotonic creation instant; the reaper measures idleness on this.
    created: tokio::time::Instant,
    pub engine: Arc<ConversationEngine>,
}

/// Wiring installed on every newly created engine.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub reverse: Option<Arc<dyn ReverseCapability>>,
    pub notifications: Option<NotificationCallback>,
    pub agent_messages: Option<AgentMessageCallback>,
}

pub struct SessionManager {
    config: CleverChattyConfig,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    hooks: SessionHooks,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create the manager and start its cleanup loop. The loop exits when
    /// `shutdown` is cancelled.
    pub fn start(
        config: CleverChattyConfig,
        hooks: SessionHooks,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            sessions: Arc::new(DashMap::new()),
            hooks,
            shutdown,
        });

        let weak = Arc::downgrade(&manager);
        let token = manager.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.reap_idle().await;
                    }
                    _ = token.cancelled() => {
                        if let Some(manager) = weak.upgrade() {
                            manager.finish_all().await;
                        }
                        break;
                    }
                }
            }
            info!("session cleanup loop stopped");
        });

        manager
    }

    /// Return the session for `context_id`, creating it on first use.
    pub async fn get_or_create(
        &self,
        context_id: &str,
        client_agent_id: Option<String>,
    ) -> Result<Arc<Session>, EngineError> {
        if let Some(existing) = self.sessions.get(context_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let engine =
            ConversationEngine::start(self.config.clone(), client_agent_id.clone()).await?;

        if let Some(reverse) = &self.hooks.reverse {
            engine.set_reverse_capability(Arc::clone(reverse));
        }
        if let Some(cb) = &self.hooks.agent_messages {
            engine.set_agent_message_callback(Arc::clone(cb));
        }
        if let Some(cb) = &self.hooks.notifications {
            engine.set_notification_callback(Arc::clone(cb)).await?;
        }

        let session = Arc::new(Session {
            context_id: context_id.to_string(),
            client_agent_id,
            created_at: chrono::Utc::now(),
            created: tokio::time::Instant::now(),
            engine,
        });

        // A concurrent creator may have won the race; keep the stored one
        // and finish ours.
        match self.sessions.entry(context_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let winner = Arc::clone(entry.get());
                drop(entry);
                session.engine.finish().await;
                Ok(winner)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
                info!(context_id, "session created");
                Ok(session)
            }
        }
    }

    pub fn get(&self, context_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(context_id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Explicitly terminate one session (`/bye` and friends).
    pub async fn finish(&self, context_id: &str) {
        if let Some((_, session)) = self.sessions.remove(context_id) {
            session.engine.finish().await;
            info!(context_id, "session finished");
        }
    }

    /// Evict sessions older than the configured timeout.
    async fn reap_idle(&self) {
        let timeout = Duration::from_secs(self.config.server.session_timeout);

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().created.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for context_id in expired {
            if let Some((_, session)) = self.sessions.remove(&context_id) {
                warn!(context_id = %context_id, "session timed out, reaping");
                session.engine.finish().await;
            }
        }
    }

    async fn finish_all(&self) {
        let all: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for context_id in all {
            self.finish(&context_id).await;
        }
    }
}
