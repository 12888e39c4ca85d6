//! Conversational memory
//!
//! Keeps per-session turns and remembered entities in a bounded LRU cache.
//! Idle sessions are cleared by [`ConversationalMemory::sweep_idle`], which
//! can also run on a background interval.
//!
//! Writes for one session are applied in the order their requests started:
//! [`ConversationalMemory::begin_turn`] hands out a sequence ticket and
//! [`ConversationalMemory::commit_turn`] waits for every earlier ticket of
//! the same session to commit or be dropped. Different sessions never wait
//! on each other.

mod resolver;
mod session;

pub use session::{extract_entities, identify_topic, ConversationTurn, Entity, EntityKind, Session};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use prism_common::config::MemoryConfig;
use prism_common::metrics::{record_reference_resolution, record_session_eviction, set_active_sessions};
use prism_common::text::truncate_chars;
use prism_search::ReferenceResolver;
use resolver::Resolver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Compact view of a session for the synthesis prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSummary {
    pub has_context: bool,
    pub current_topic: Option<String>,
    pub last_question: Option<String>,
    pub entities: Vec<String>,
    pub conversation_count: u64,
    pub recent_turns: Vec<(String, String)>,
}

impl ContextSummary {
    /// Render as prompt lines; empty when there is no history
    pub fn render(&self, max_answer_chars: usize) -> String {
        if !self.has_context {
            return String::new();
        }
        let mut lines = Vec::new();
        if let Some(topic) = &self.current_topic {
            lines.push(format!("Current topic: {topic}"));
        }
        if !self.entities.is_empty() {
            lines.push(format!("Mentioned: {}", self.entities.join(", ")));
        }
        for (question, answer) in &self.recent_turns {
            lines.push(format!("Q: {question}"));
            lines.push(format!("A: {}", truncate_chars(answer, max_answer_chars)));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub active_sessions: usize,
    pub total_turns: usize,
    pub tracked_entities: usize,
    pub pending_turns: usize,
}

#[derive(Debug, Default)]
struct TicketOrder {
    next_issue: u64,
    next_commit: u64,
    abandoned: BTreeSet<u64>,
}

impl TicketOrder {
    /// Skip over dropped tickets at the head of the queue
    fn advance(&mut self) {
        while self.abandoned.remove(&self.next_commit) {
            self.next_commit += 1;
        }
    }

    fn pending(&self) -> usize {
        (self.next_issue - self.next_commit) as usize
    }
}

#[derive(Debug)]
struct SessionSlot {
    session: Mutex<Session>,
    order: Mutex<TicketOrder>,
    turn_done: Notify,
}

impl SessionSlot {
    fn new(session_id: &str) -> Self {
        Self {
            session: Mutex::new(Session::new(session_id)),
            order: Mutex::new(TicketOrder::default()),
            turn_done: Notify::new(),
        }
    }
}

/// Position of one request in its session's write order.
///
/// Dropping a ticket without committing (failed or cancelled request)
/// releases the slot so later turns are not blocked.
#[derive(Debug)]
pub struct TurnTicket {
    session_id: String,
    seq: u64,
    slot: Arc<SessionSlot>,
    committed: bool,
}

impl TurnTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        {
            let mut order = self.slot.order.lock();
            order.abandoned.insert(self.seq);
            order.advance();
        }
        self.slot.turn_done.notify_waiters();
        tracing::debug!(session_id = %self.session_id, seq = self.seq, "Turn abandoned");
    }
}

/// Conversational memory
pub struct ConversationalMemory {
    config: MemoryConfig,
    sessions: Mutex<LruCache<String, Arc<SessionSlot>>>,
}

impl ConversationalMemory {
    pub fn new(config: MemoryConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn existing(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn slot_or_create(&self, session_id: &str) -> Arc<SessionSlot> {
        let mut sessions = self.sessions.lock();
        if let Some(slot) = sessions.get(session_id) {
            return slot.clone();
        }
        let slot = Arc::new(SessionSlot::new(session_id));
        if let Some((evicted, _)) = sessions.push(session_id.to_string(), slot.clone()) {
            if evicted != session_id {
                tracing::debug!(session_id = %evicted, "Session evicted (capacity)");
                record_session_eviction("capacity", 1);
            }
        }
        set_active_sessions(sessions.len());
        slot
    }

    /// Reserve the next write position for a session
    pub fn begin_turn(&self, session_id: &str) -> TurnTicket {
        let slot = self.slot_or_create(session_id);
        let seq = {
            let mut order = slot.order.lock();
            let seq = order.next_issue;
            order.next_issue += 1;
            seq
        };
        TurnTicket {
            session_id: session_id.to_string(),
            seq,
            slot,
            committed: false,
        }
    }

    /// Apply a turn once every earlier ticket of the session is settled
    pub async fn commit_turn(&self, mut ticket: TurnTicket, question: &str, answer: &str) {
        loop {
            let notified = ticket.slot.turn_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut order = ticket.slot.order.lock();
                order.advance();
                if order.next_commit == ticket.seq {
                    break;
                }
            }
            notified.await;
        }

        ticket
            .slot
            .session
            .lock()
            .push_turn(question, answer, self.config.max_turns, self.config.max_entities);
        {
            let mut order = ticket.slot.order.lock();
            order.next_commit += 1;
            order.advance();
        }
        ticket.committed = true;
        ticket.slot.turn_done.notify_waiters();

        // The session may have been swept or evicted while the request ran
        let mut sessions = self.sessions.lock();
        if !sessions.contains(&ticket.session_id) {
            sessions.put(ticket.session_id.clone(), ticket.slot.clone());
            set_active_sessions(sessions.len());
        }
        tracing::debug!(session_id = %ticket.session_id, seq = ticket.seq, "Turn committed");
    }

    /// Record a completed question/answer pair
    pub async fn update_context(&self, session_id: &str, question: &str, answer: &str) {
        let ticket = self.begin_turn(session_id);
        self.commit_turn(ticket, question, answer).await;
    }

    /// Replace pronouns and demonstratives with remembered entities.
    /// Unknown sessions and unconfident matches leave the text unchanged.
    pub fn resolve(&self, session_id: &str, text: &str) -> String {
        let Some(slot) = self.existing(session_id) else {
            return text.to_string();
        };
        let mut session = slot.session.lock();
        session.touch();
        if session.entities.is_empty() {
            return text.to_string();
        }

        let resolution = Resolver::new(&session, &self.config, text).resolve(text);
        record_reference_resolution(resolution.replaced > 0);
        if resolution.replaced > 0 {
            tracing::debug!(
                session_id,
                original = text,
                resolved = %resolution.text,
                replaced = resolution.replaced,
                "References resolved"
            );
        }
        resolution.text
    }

    pub fn context_summary(&self, session_id: &str) -> ContextSummary {
        let Some(slot) = self.existing(session_id) else {
            return ContextSummary::default();
        };
        let session = slot.session.lock();
        let last = session.turns.back();
        let skip = session.turns.len().saturating_sub(self.config.summary_turns);

        ContextSummary {
            has_context: !session.turns.is_empty(),
            current_topic: last.and_then(|t| t.topic.clone()),
            last_question: last.map(|t| t.question.clone()),
            entities: session
                .entities
                .iter()
                .filter(|e| e.kind != EntityKind::Topic)
                .map(|e| e.name.clone())
                .collect(),
            conversation_count: session.turn_count,
            recent_turns: session
                .turns
                .iter()
                .skip(skip)
                .map(|t| (t.question.clone(), t.answer.clone()))
                .collect(),
        }
    }

    pub fn clear_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let removed = sessions.pop(session_id).is_some();
        if removed {
            record_session_eviction("cleared", 1);
            set_active_sessions(sessions.len());
        }
        removed
    }

    /// Drop sessions idle for longer than the configured timeout.
    /// Sessions with turns in flight are kept.
    pub fn sweep_idle(&self) -> usize {
        let timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let mut sessions = self.sessions.lock();
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, slot)| {
                let pending = slot.order.lock().pending();
                pending == 0 && slot.session.lock().last_active.elapsed() >= timeout
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            sessions.pop(id);
        }
        if !idle.is_empty() {
            tracing::info!(evicted = idle.len(), remaining = sessions.len(), "Idle sessions cleared");
            record_session_eviction("idle", idle.len());
        }
        set_active_sessions(sessions.len());
        idle.len()
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `sweep_interval_secs`
    /// until the memory is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let memory: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(memory) = memory.upgrade() else {
                    break;
                };
                memory.sweep_idle();
            }
        })
    }

    pub fn stats(&self) -> MemoryStats {
        let sessions = self.sessions.lock();
        let mut stats = MemoryStats {
            active_sessions: sessions.len(),
            ..Default::default()
        };
        for (_, slot) in sessions.iter() {
            stats.pending_turns += slot.order.lock().pending();
            let session = slot.session.lock();
            stats.total_turns += session.turns.len();
            stats.tracked_entities += session.entities.len();
        }
        stats
    }
}

#[async_trait]
impl ReferenceResolver for ConversationalMemory {
    async fn resolve_references(&self, session_id: &str, text: &str) -> String {
        self.resolve(session_id, text)
    }
}
