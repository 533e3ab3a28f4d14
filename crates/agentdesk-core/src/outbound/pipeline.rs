//! Durable send, queue flushing, thread reconciliation and the turn lifecycle.
//!
//! All queue mutations go through one `tokio::sync::Mutex`, so an explicit
//! send, the periodic flush loop and a start-up flush never deliver the same
//! entry twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::queue::{Backoff, OutboundQueue, OutboundQueueEntry};
use super::store::KeyValueStore;
use super::threads::{ThreadAliases, is_provisional, new_provisional_id};
use crate::api::{ChatRequest, ChatTransport, MessageRecord, StoredMessage, ThreadApi};
use crate::auth::{TokenProvider, require_token};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::stream::{ErrorReason, interpret};
use crate::transcript::{
    ChatMessage, ERROR_FALLBACK_TEXT, Role, TurnOutcome, TurnReducer, TurnReport,
};

/// Collaborators injected into the pipeline.
pub struct PipelineDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub api: Arc<dyn ThreadApi>,
    pub transport: Arc<dyn ChatTransport>,
    pub tokens: Arc<dyn TokenProvider>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Agent addressed when a request does not name one
    pub agent_slug: String,
    pub idle_timeout: Duration,
    pub backoff: Backoff,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            agent_slug: config.agent_slug.clone(),
            idle_timeout: config.stream.idle_timeout(),
            backoff: Backoff::from_config(&config.outbound),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of [`ResiliencePipeline::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub local_id: String,
    pub thread_id: String,
    /// The backend acknowledged the message
    pub delivered: bool,
    /// The queue entry reached durable storage
    pub durable: bool,
}

impl SendReceipt {
    pub fn is_provisional(&self) -> bool {
        is_provisional(&self.thread_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
    /// Entries waiting for their provisional thread to be reconciled
    pub held: usize,
    /// Entries skipped because of backoff or an earlier failure in the thread
    pub deferred: usize,
    /// Entries still queued after the flush
    pub remaining: usize,
}

/// One user message plus the assistant reply it should produce.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub thread_id: Option<String>,
    pub message: String,
    pub agent_slug: Option<String>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct CompletedTurn {
    /// Thread the turn belongs to, canonical when the backend announced one
    pub thread_id: String,
    pub user: ChatMessage,
    pub assistant: ChatMessage,
    pub report: TurnReport,
    pub user_receipt: SendReceipt,
    /// `None` when there was nothing worth persisting
    pub assistant_receipt: Option<SendReceipt>,
}

/// Outcome of posting one queue entry.
enum Delivery {
    Acked,
    /// Later entries of the same thread must wait
    Retry,
    /// Every remaining entry would fail the same way, so the pass stops
    Halt,
}

struct PipelineState {
    queue: OutboundQueue,
    aliases: ThreadAliases,
    turns: HashMap<String, Vec<ChatMessage>>,
}

pub struct ResiliencePipeline {
    store: Arc<dyn KeyValueStore>,
    api: Arc<dyn ThreadApi>,
    transport: Arc<dyn ChatTransport>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    state: Mutex<PipelineState>,
}

impl ResiliencePipeline {
    /// Loads the persisted queue and alias table.
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> EngineResult<Self> {
        let queue = OutboundQueue::load(Arc::clone(&deps.store), settings.backoff)
            .map_err(|e| EngineError::persistence(format!("{e:#}")))?;
        let aliases = ThreadAliases::load(deps.store.as_ref())
            .map_err(|e| EngineError::persistence(format!("{e:#}")))?;

        if !queue.is_empty() {
            tracing::info!(pending = queue.len(), "loaded outbound queue");
        }

        Ok(Self {
            store: deps.store,
            api: deps.api,
            transport: deps.transport,
            tokens: deps.tokens,
            clock: deps.clock,
            settings,
            state: Mutex::new(PipelineState {
                queue,
                aliases,
                turns: HashMap::new(),
            }),
        })
    }

    /// Queues a message and tries to deliver it.
    ///
    /// The entry is written before any network call. Delivery failures leave
    /// it queued for [`Self::flush_queue`]; they are reported through the
    /// receipt, never as an error. Without `thread_id` a provisional thread
    /// is opened and the entry is held until it is reconciled.
    pub async fn send(&self, thread_id: Option<&str>, role: Role, content: &str) -> SendReceipt {
        let agent_slug = self.settings.agent_slug.clone();
        self.enqueue(thread_id, role, content, None, &agent_slug)
            .await
    }

    /// Delivers queued entries in creation order.
    ///
    /// An entry is removed only after the backend acknowledged it. Within a
    /// thread, an entry that fails or is still backing off blocks the ones
    /// behind it so the backend never sees messages out of order.
    pub async fn flush_queue(&self) -> FlushReport {
        let mut state = self.state.lock().await;
        let report = self.flush_locked(&mut state, None).await;
        if report.delivered > 0 || report.failed > 0 {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                remaining = report.remaining,
                "flushed outbound queue"
            );
        }
        report
    }

    /// Replaces every local reference to `provisional` with `canonical`.
    ///
    /// Queue entries, the alias table and cached turns are rewritten under
    /// the queue lock. Returns the number of queue entries rewritten.
    pub async fn reconcile_thread(&self, provisional: &str, canonical: &str) -> usize {
        if provisional == canonical {
            return 0;
        }

        let mut state = self.state.lock().await;
        let rewritten = state.queue.rewrite_thread(provisional, canonical);

        state.aliases.record(provisional, canonical);
        if let Err(err) = state.aliases.save(self.store.as_ref()) {
            tracing::warn!("Thread aliases not persisted: {err:#}");
        }

        if let Some(mut turns) = state.turns.remove(provisional) {
            for turn in &mut turns {
                turn.thread_id = Some(canonical.to_string());
            }
            state
                .turns
                .entry(canonical.to_string())
                .or_default()
                .extend(turns);
        }

        tracing::info!(provisional, canonical, rewritten, "reconciled thread id");
        rewritten
    }

    /// Rebuilds a thread's transcript from the backend.
    ///
    /// Stored assistant messages come back as a single orchestrator segment;
    /// the original multi-agent segmentation is not recoverable. Provisional
    /// threads are never sent to the backend, so their local turns are
    /// returned instead.
    pub async fn load_thread(&self, thread_id: &str) -> EngineResult<Vec<ChatMessage>> {
        let thread_id = self.state.lock().await.aliases.resolve(thread_id);
        if is_provisional(&thread_id) {
            return Ok(self.turns(&thread_id).await);
        }

        let stored = self.api.fetch_messages(&thread_id).await?;
        let now = self.clock.now();
        let messages: Vec<ChatMessage> = stored
            .into_iter()
            .enumerate()
            .filter_map(|(index, message)| replay_message(&thread_id, index, message, now))
            .collect();

        self.state
            .lock()
            .await
            .turns
            .insert(thread_id, messages.clone());
        Ok(messages)
    }

    /// Runs one full turn: queue the user message, stream the reply,
    /// reconcile the thread id and queue the finalized assistant message.
    ///
    /// Only a missing token fails the call. Stream and delivery failures end
    /// up in the returned turn and the queue.
    pub async fn run_turn(&self, request: TurnRequest) -> EngineResult<CompletedTurn> {
        require_token(self.tokens.as_ref())?;

        let agent_slug = request
            .agent_slug
            .clone()
            .unwrap_or_else(|| self.settings.agent_slug.clone());
        let user_receipt = self
            .enqueue(
                request.thread_id.as_deref(),
                Role::User,
                &request.message,
                None,
                &agent_slug,
            )
            .await;
        let mut thread_id = user_receipt.thread_id.clone();

        let mut user = ChatMessage::user(
            user_receipt.local_id.clone(),
            Some(thread_id.clone()),
            request.message.clone(),
            self.clock.now(),
        );
        self.remember_turn(&thread_id, user.clone()).await;

        let chat_request = ChatRequest {
            thread_id: (!is_provisional(&thread_id)).then(|| thread_id.clone()),
            agent_slug: agent_slug.clone(),
            message: request.message,
            client_message_id: user_receipt.local_id.clone(),
        };
        let mut reducer = TurnReducer::new(ChatMessage::streaming_assistant(
            uuid::Uuid::new_v4().to_string(),
            Some(thread_id.clone()),
            self.clock.now(),
        ));
        let report = self
            .drive(&chat_request, &mut reducer, &request.cancel)
            .await;

        if let Some(canonical) = report.thread_id.as_deref()
            && canonical != thread_id
        {
            if is_provisional(&thread_id) {
                self.reconcile_thread(&thread_id, canonical).await;
                thread_id = canonical.to_string();
            } else {
                tracing::warn!(
                    thread = %thread_id,
                    announced = canonical,
                    "ignoring thread id change for a canonical thread"
                );
                reducer.turn_mut().thread_id = Some(thread_id.clone());
            }
        }
        user.thread_id = Some(thread_id.clone());

        let assistant = reducer.into_turn();
        let assistant_receipt = if should_persist(&report, &assistant) {
            Some(
                self.enqueue(
                    Some(&thread_id),
                    Role::Assistant,
                    &assistant.content,
                    tool_calls_summary(&assistant),
                    &agent_slug,
                )
                .await,
            )
        } else {
            None
        };
        self.remember_turn(&thread_id, assistant.clone()).await;

        Ok(CompletedTurn {
            thread_id,
            user,
            assistant,
            report,
            user_receipt,
            assistant_receipt,
        })
    }

    /// Flushes the queue every `interval` until `cancel` fires.
    ///
    /// The first flush runs immediately.
    pub fn spawn_flush_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pipeline.flush_queue().await;
                    }
                }
            }
            tracing::debug!("flush loop stopped");
        })
    }

    /// Queue entries in creation order.
    pub async fn pending(&self) -> Vec<OutboundQueueEntry> {
        self.state.lock().await.queue.entries().to_vec()
    }

    /// Turns cached for a thread during this session.
    pub async fn turns(&self, thread_id: &str) -> Vec<ChatMessage> {
        let state = self.state.lock().await;
        let thread_id = state.aliases.resolve(thread_id);
        state.turns.get(&thread_id).cloned().unwrap_or_default()
    }

    async fn enqueue(
        &self,
        thread_id: Option<&str>,
        role: Role,
        content: &str,
        tool_calls_summary: Option<Value>,
        agent_slug: &str,
    ) -> SendReceipt {
        let mut state = self.state.lock().await;
        let thread_id = match thread_id {
            Some(id) => state.aliases.resolve(id),
            None => new_provisional_id(),
        };

        let entry = OutboundQueueEntry {
            local_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.clone(),
            role,
            content: content.to_string(),
            tool_calls_summary,
            attempts: 0,
            created_at: self.clock.now(),
            next_attempt_at: None,
            last_error: None,
            agent_slug: agent_slug.to_string(),
        };
        let local_id = entry.local_id.clone();
        let durable = state.queue.push(entry);

        if is_provisional(&thread_id) {
            tracing::debug!(%local_id, thread = %thread_id, "holding message for provisional thread");
        } else {
            self.flush_locked(&mut state, Some(&thread_id)).await;
        }
        let delivered = state.queue.get(&local_id).is_none();

        SendReceipt {
            local_id,
            thread_id,
            delivered,
            durable,
        }
    }

    async fn flush_locked(
        &self,
        state: &mut PipelineState,
        only_thread: Option<&str>,
    ) -> FlushReport {
        state.queue.retry_persist();

        let now = self.clock.now();
        let candidates: Vec<(String, String, bool, bool)> = state
            .queue
            .entries()
            .iter()
            .filter(|e| only_thread.is_none_or(|t| e.thread_id == t))
            .map(|e| (e.local_id.clone(), e.thread_id.clone(), e.is_held(), e.is_due(now)))
            .collect();

        let mut report = FlushReport::default();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut halted = false;
        for (local_id, thread_id, held, due) in candidates {
            if held {
                report.held += 1;
            } else if halted || !due || blocked.contains(&thread_id) {
                report.deferred += 1;
                blocked.insert(thread_id);
            } else {
                match self.deliver(state, &local_id).await {
                    Delivery::Acked => report.delivered += 1,
                    Delivery::Retry => {
                        report.failed += 1;
                        blocked.insert(thread_id);
                    }
                    Delivery::Halt => {
                        report.failed += 1;
                        halted = true;
                    }
                }
            }
        }
        report.remaining = state.queue.len();
        report
    }

    async fn deliver(&self, state: &mut PipelineState, local_id: &str) -> Delivery {
        let Some(entry) = state.queue.get(local_id) else {
            return Delivery::Retry;
        };
        let record = MessageRecord {
            thread_id: entry.thread_id.clone(),
            agent_slug: entry.agent_slug.clone(),
            role: entry.role,
            content: entry.content.clone(),
            tool_calls_summary: entry.tool_calls_summary.clone(),
            client_message_id: entry.local_id.clone(),
        };

        match self.api.post_message(&record).await {
            Ok(()) => {
                state.queue.remove(local_id);
                Delivery::Acked
            }
            Err(err) => {
                tracing::warn!(local_id, kind = %err.kind, "delivery failed: {}", err.message);
                state
                    .queue
                    .record_failure(local_id, &err.message, self.clock.now());
                if err.is_retryable() {
                    Delivery::Retry
                } else {
                    Delivery::Halt
                }
            }
        }
    }

    async fn drive(
        &self,
        request: &ChatRequest,
        reducer: &mut TurnReducer,
        cancel: &CancellationToken,
    ) -> TurnReport {
        let bytes = match self.transport.open(request).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(kind = %err.kind, "failed to open chat stream: {}", err.message);
                return reducer.finalize(TurnOutcome::Failed {
                    message: err.message,
                    reason: ErrorReason::from(err.kind),
                });
            }
        };

        let mut events = interpret(bytes, self.settings.idle_timeout);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return reducer.finalize(TurnOutcome::Failed {
                        message: "Turn cancelled".to_string(),
                        reason: ErrorReason::Connection,
                    });
                }
                event = events.next() => {
                    let Some(event) = event else { break };
                    if let Some(report) = reducer.apply(event) {
                        return report;
                    }
                }
            }
        }

        reducer.finalize(TurnOutcome::Failed {
            message: "Stream ended without a terminal event".to_string(),
            reason: ErrorReason::Connection,
        })
    }

    async fn remember_turn(&self, thread_id: &str, turn: ChatMessage) {
        self.state
            .lock()
            .await
            .turns
            .entry(thread_id.to_string())
            .or_default()
            .push(turn);
    }
}

/// The error fallback is a display placeholder, not something to store.
fn should_persist(report: &TurnReport, assistant: &ChatMessage) -> bool {
    if assistant.content.is_empty() {
        return false;
    }
    !(report.outcome.is_error() && assistant.content == ERROR_FALLBACK_TEXT)
}

/// `[{name, status, agent}]` for every tool call, in segment order.
fn tool_calls_summary(turn: &ChatMessage) -> Option<Value> {
    let summary: Vec<Value> = turn
        .segments
        .iter()
        .flat_map(|segment| {
            segment.tools.iter().map(|call| {
                json!({
                    "name": call.name,
                    "status": call.status.as_str(),
                    "agent": segment.speaker.label(),
                })
            })
        })
        .collect();
    (!summary.is_empty()).then(|| Value::Array(summary))
}

fn replay_message(
    thread_id: &str,
    index: usize,
    message: StoredMessage,
    fallback_time: DateTime<Utc>,
) -> Option<ChatMessage> {
    let Some(role) = Role::parse(&message.role) else {
        tracing::debug!(thread = thread_id, index, role = %message.role, "skipping stored message");
        return None;
    };
    let id = message
        .id
        .unwrap_or_else(|| format!("{thread_id}-{index}"));
    let created_at = message.created_at.unwrap_or(fallback_time);
    let thread_id = Some(thread_id.to_string());
    Some(match role {
        Role::User => ChatMessage::user(id, thread_id, message.content, created_at),
        Role::Assistant => {
            ChatMessage::replayed_assistant(id, thread_id, message.content, created_at)
        }
    })
}
