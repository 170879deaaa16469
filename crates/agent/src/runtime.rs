//! The agent runtime — session table, sliding window, tool-calling loop.
//!
//! `chat` is the single streaming entry point: it spawns a turn task and
//! hands back the event channel. Inside the turn, the loop alternates
//! between asking the model and executing the tools it requested, bounded
//! by the round cap, and always closes the stream with one terminal event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use crabwire_config::AgentSettings;
use crabwire_core::audit::{AuditEvent, AuditSink, preview};
use crabwire_core::error::{ProviderError, RouterError};
use crabwire_core::message::{Message, Role, Session, ToolCall};
use crabwire_core::provider::{ChatEvent, ChatOptions, ToolDefinition, Usage};
use crabwire_core::store::ConversationStore;
use crabwire_core::tool::{Confirmer, ToolContext};
use crabwire_providers::ModelRouter;
use crabwire_tools::ToolRegistry;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::AgentEvent;
use crate::tool_blocks::{self, ToolBlock};

/// Channel label recorded for conversations this runtime creates.
const CHANNEL: &str = "web";

/// Capacity of the per-turn event channel.
const EVENT_BUFFER: usize = 64;

/// Audit preview length for user input and tool output.
const PREVIEW_CHARS: usize = 120;

/// Per-call inputs to [`AgentRuntime::chat`] beyond the user text.
#[derive(Clone, Default)]
pub struct ChatParams {
    /// Sender identity, used for owner checks and audit records
    pub sender_id: String,

    /// Cooperative cancellation for the whole turn
    pub cancel: CancellationToken,

    /// Confirmation handshake for confirm-required tools. Absent means
    /// those tools fail closed.
    pub confirm: Option<Arc<dyn Confirmer>>,
}

impl ChatParams {
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirmer>) -> Self {
        self.confirm = Some(confirm);
        self
    }
}

/// How one model round ended.
enum RoundOutcome {
    /// Final text reply; the turn is over. A cancellation mid-stream lands
    /// here too, with whatever text arrived before the stop.
    Reply {
        text: String,
        model: String,
        usage: Option<Usage>,
    },

    /// The model requested tool calls.
    Tools {
        text: String,
        model: String,
        usage: Option<Usage>,
        calls: Vec<ToolCall>,
    },

    /// The generation failed; `text` holds any partial reply received.
    Failed { text: String, message: String },

    /// Cancellation fired before the stream opened.
    Cancelled,
}

/// The agent runtime.
///
/// Owns the session table and drives the conversation loop against the
/// router and the tool registry. Cloning is cheap; clones share sessions.
#[derive(Clone)]
pub struct AgentRuntime {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    router: Arc<ModelRouter>,
    tools: Arc<ToolRegistry>,
    store: Option<Arc<dyn ConversationStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    /// Primary model spec, e.g. "deepseek-chat" or "qwen/qwen-max"
    model: String,
    settings: AgentSettings,
}

impl AgentRuntime {
    pub fn new(
        router: Arc<ModelRouter>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            router,
            tools,
            store: None,
            audit: None,
            model: model.into(),
            settings,
        }
    }

    /// Attach a conversation store. Without one the runtime keeps sessions
    /// purely in memory, which is a supported mode.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Process one user message, streaming events back as they happen.
    ///
    /// The returned channel yields text deltas and tool-invocation events
    /// in the order they occur and closes after a single terminal event.
    pub fn chat(&self, session_id: &str, text: &str, params: ChatParams) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let runtime = self.clone();
        let session_id = session_id.to_string();
        let text = text.to_string();

        tokio::spawn(async move {
            runtime.run_turn(&session_id, &text, params, &tx).await;
        });

        rx
    }

    /// Conversation history, the newest `limit` messages ending `offset`
    /// back from the tail. Store-backed when configured, in-memory
    /// otherwise.
    pub async fn get_history(&self, session_id: &str, limit: u32, offset: u32) -> Vec<Message> {
        if let Some(store) = &self.store {
            match store.recent_messages(session_id, limit, offset).await {
                Ok(messages) => return messages,
                Err(e) => {
                    warn!(session = session_id, error = %e, "Falling back to in-memory history");
                }
            }
        }

        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(session_id) else {
            return Vec::new();
        };
        let end = session.messages.len().saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        session.messages[start..end].to_vec()
    }

    /// Number of sessions currently held in memory.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ── The turn ──────────────────────────────────────────────────────────

    async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        params: ChatParams,
        tx: &mpsc::Sender<AgentEvent>,
    ) {
        self.ensure_session(session_id, &params.sender_id).await;

        info!(session = session_id, chars = text.len(), "User message received");
        self.record(AuditEvent::UserInput {
            session_id: session_id.to_string(),
            sender_id: params.sender_id.clone(),
            preview: preview(text, PREVIEW_CHARS),
        });

        self.append(session_id, Message::user(text)).await;
        self.persist(session_id, Role::User, text).await;

        let is_owner = self.is_owner(&params.sender_id);
        let tool_definitions = self.tools.definitions_for(is_owner);

        let mut last_model: Option<String> = None;
        let mut last_usage: Option<Usage> = None;
        let mut rounds: u32 = 0;

        loop {
            match self.run_round(session_id, &tool_definitions, &params, tx).await {
                RoundOutcome::Reply { text, model, usage } => {
                    if !text.is_empty() {
                        self.append(session_id, Message::assistant(&text)).await;
                        self.persist(session_id, Role::Assistant, &text).await;
                    }
                    let model = if model.is_empty() {
                        last_model.clone()
                    } else {
                        Some(model)
                    };
                    let _ = tx
                        .send(AgentEvent::Done {
                            model,
                            usage: usage.or(last_usage.clone()),
                        })
                        .await;
                    break;
                }

                RoundOutcome::Tools {
                    text,
                    model,
                    usage,
                    calls,
                } => {
                    if !model.is_empty() {
                        last_model = Some(model);
                    }
                    if usage.is_some() {
                        last_usage = usage;
                    }
                    rounds += 1;

                    let stopped = self
                        .run_tools(session_id, &text, calls, is_owner, &params, tx)
                        .await;

                    if stopped || params.cancel.is_cancelled() {
                        let _ = tx
                            .send(AgentEvent::Done {
                                model: last_model.clone(),
                                usage: last_usage.clone(),
                            })
                            .await;
                        break;
                    }

                    if rounds >= self.settings.max_tool_rounds {
                        warn!(
                            session = session_id,
                            rounds, "Tool round cap reached, ending turn"
                        );
                        let _ = tx
                            .send(AgentEvent::Done {
                                model: last_model.clone(),
                                usage: last_usage.clone(),
                            })
                            .await;
                        break;
                    }
                }

                RoundOutcome::Failed { text, message } => {
                    if !text.is_empty() {
                        self.append(session_id, Message::assistant(&text)).await;
                        self.persist(session_id, Role::Assistant, &text).await;
                    }
                    let _ = tx.send(AgentEvent::Error { message }).await;
                    break;
                }

                RoundOutcome::Cancelled => {
                    let _ = tx
                        .send(AgentEvent::Done {
                            model: last_model.clone(),
                            usage: last_usage.clone(),
                        })
                        .await;
                    break;
                }
            }
        }

        self.compact(session_id).await;
    }

    /// One model round: send the window upstream, forward deltas, classify
    /// the terminal event.
    async fn run_round(
        &self,
        session_id: &str,
        tool_definitions: &[ToolDefinition],
        params: &ChatParams,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> RoundOutcome {
        let upstream = self.window_snapshot(session_id).await;

        let options = ChatOptions::new(&self.model)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens)
            .with_tools(tool_definitions.to_vec())
            .with_cancel(params.cancel.clone());

        let mut stream = match self.router.chat(&upstream, &options).await {
            Ok(stream) => stream,
            Err(RouterError::Provider(ProviderError::Cancelled)) => return RoundOutcome::Cancelled,
            Err(e) => {
                warn!(session = session_id, error = %e, "Generation failed to start");
                return RoundOutcome::Failed {
                    text: String::new(),
                    message: e.to_string(),
                };
            }
        };

        let mut text = String::new();
        while let Some(event) = stream.recv().await {
            match event {
                Ok(ChatEvent::Delta { text: delta }) => {
                    text.push_str(&delta);
                    if tx.send(AgentEvent::Delta { text: delta }).await.is_err() {
                        // Caller hung up; stop the backend too.
                        params.cancel.cancel();
                    }
                }
                Ok(ChatEvent::Done {
                    model,
                    usage,
                    tool_calls,
                }) => {
                    return if tool_calls.is_empty() {
                        RoundOutcome::Reply { text, model, usage }
                    } else {
                        RoundOutcome::Tools {
                            text,
                            model,
                            usage,
                            calls: tool_calls,
                        }
                    };
                }
                Err(ProviderError::Cancelled) => {
                    return RoundOutcome::Reply {
                        text,
                        model: String::new(),
                        usage: None,
                    };
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "Stream failed mid-generation");
                    return RoundOutcome::Failed {
                        text,
                        message: e.to_string(),
                    };
                }
            }
        }

        // The provider contract promises a terminal event; a dropped
        // channel must not wedge the turn.
        RoundOutcome::Reply {
            text,
            model: String::new(),
            usage: None,
        }
    }

    /// Execute one round of requested tool calls sequentially, in request
    /// order. Returns true when an outcome ends the turn without another
    /// model round.
    async fn run_tools(
        &self,
        session_id: &str,
        prose: &str,
        calls: Vec<ToolCall>,
        is_owner: bool,
        params: &ChatParams,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> bool {
        debug!(
            session = session_id,
            count = calls.len(),
            "Executing requested tool calls"
        );

        // The assistant message enters the session with its structured
        // calls before any tool runs, so every tool reply has its parent.
        self.append(session_id, Message::assistant_with_tools(prose, calls.clone()))
            .await;

        let mut blocks: Vec<ToolBlock> = Vec::with_capacity(calls.len());
        let mut stop = false;

        for call in &calls {
            let arguments = call.parsed_arguments();

            self.record(AuditEvent::ToolCallIssued {
                session_id: session_id.to_string(),
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let ctx = ToolContext {
                session_id: session_id.to_string(),
                sender_id: params.sender_id.clone(),
                is_owner,
                confirm: params.confirm.clone(),
                audit: self.audit.clone(),
            };

            let outcome = self.tools.execute(&call.name, arguments.clone(), &ctx).await;
            let success = outcome.is_success();
            let output = outcome.content().to_string();

            self.record(AuditEvent::ToolResult {
                session_id: session_id.to_string(),
                tool: call.name.clone(),
                success,
                preview: preview(&output, PREVIEW_CHARS),
            });

            let _ = tx
                .send(AgentEvent::ToolCall {
                    name: call.name.clone(),
                    arguments: arguments.clone(),
                    output: output.clone(),
                    success,
                })
                .await;

            self.append(session_id, Message::tool_result(&call.id, &output))
                .await;

            blocks.push(ToolBlock {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments,
                output,
                success,
            });

            if outcome.stops_round() {
                info!(session = session_id, tool = %call.name, "Tool outcome ends the turn");
                stop = true;
            }
        }

        // One store row for the whole round: prose plus a block per call,
        // so a later reload can tell tool records from plain text.
        self.persist(
            session_id,
            Role::Assistant,
            &tool_blocks::render(prose, &blocks),
        )
        .await;

        stop
    }

    // ── Session bookkeeping ───────────────────────────────────────────────

    /// Get or create the session, restoring recent history from the store
    /// on first sight of the id.
    async fn ensure_session(&self, session_id: &str, sender_id: &str) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.last_active_at = Utc::now();
                return;
            }
        }

        let mut restored = Vec::new();
        if let Some(store) = &self.store {
            if let Err(e) = store.ensure_conversation(session_id, CHANNEL, sender_id).await {
                warn!(session = session_id, error = %e, "Failed to register conversation");
            }
            match store
                .recent_messages(session_id, self.settings.context_window as u32, 0)
                .await
            {
                Ok(messages) => {
                    if !messages.is_empty() {
                        debug!(
                            session = session_id,
                            count = messages.len(),
                            "Restored history from store"
                        );
                    }
                    restored = messages;
                }
                Err(e) => warn!(session = session_id, error = %e, "Failed to load history"),
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        if session.messages.is_empty() {
            session.messages = restored;
        }
    }

    /// System prompt plus the sliding window of recent history — what goes
    /// upstream this round. The full history stays in the session.
    async fn window_snapshot(&self, session_id: &str) -> Vec<Message> {
        let sessions = self.sessions.read().await;
        let mut upstream = Vec::with_capacity(self.settings.context_window + 1);
        upstream.push(Message::system(&self.settings.system_prompt));

        if let Some(session) = sessions.get(session_id) {
            let mut window = session.window(self.settings.context_window);
            // A window must not open on an orphaned tool reply; backends
            // reject tool messages whose parent call is out of sight.
            while window.first().is_some_and(|m| m.role == Role::Tool) {
                window = &window[1..];
            }
            upstream.extend_from_slice(window);
        }

        upstream
    }

    async fn append(&self, session_id: &str, message: Message) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.push(message);
        }
    }

    /// Forward one message to the store, when one is configured. Store
    /// failures are logged and swallowed; persistence must not break chat.
    async fn persist(&self, session_id: &str, role: Role, content: &str) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.save_message(session_id, role, content).await {
            warn!(
                session = session_id,
                role = role.as_str(),
                error = %e,
                "Failed to persist message"
            );
        }
    }

    async fn compact(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            let dropped = session.compact(self.settings.context_window);
            if dropped > 0 {
                debug!(session = session_id, dropped, "Compacted in-memory history");
            }
        }
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(&event);
        }
    }

    fn is_owner(&self, sender_id: &str) -> bool {
        self.settings.owner_ids.is_empty()
            || self.settings.owner_ids.iter().any(|id| id == sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crabwire_core::error::ToolError;
    use crabwire_core::provider::{ChatStream, Provider};
    use crabwire_core::tool::{
        ConfirmError, ConfirmRequest, Tool, ToolPermission, ToolResult,
    };
    use crabwire_storage::InMemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ── Scripted provider ─────────────────────────────────────────────────

    type ScriptEvent = std::result::Result<ChatEvent, ProviderError>;

    /// A provider that replays canned event scripts, one per call, and
    /// records what each call was asked to do.
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Vec<ScriptEvent>>>,
        /// When set, the last script replays forever
        repeat_last: bool,
        seen_messages: Mutex<Vec<Vec<Message>>>,
        seen_tools: Mutex<Vec<Vec<ToolDefinition>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<ScriptEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                repeat_last: false,
                seen_messages: Mutex::new(Vec::new()),
                seen_tools: Mutex::new(Vec::new()),
            })
        }

        fn repeating(script: Vec<ScriptEvent>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(VecDeque::from([script])),
                repeat_last: true,
                seen_messages: Mutex::new(Vec::new()),
                seen_tools: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen_messages.lock().unwrap().len()
        }

        fn seen_messages(&self) -> Vec<Vec<Message>> {
            self.seen_messages.lock().unwrap().clone()
        }

        fn seen_tools(&self) -> Vec<Vec<ToolDefinition>> {
            self.seen_tools.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[Message],
            options: &ChatOptions,
        ) -> std::result::Result<ChatStream, ProviderError> {
            self.seen_messages.lock().unwrap().push(messages.to_vec());
            self.seen_tools.lock().unwrap().push(options.tools.clone());

            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if self.repeat_last && scripts.len() == 1 {
                    scripts.front().cloned().unwrap_or_default()
                } else {
                    scripts.pop_front().unwrap_or_else(|| vec![Ok(done(vec![]))])
                }
            };

            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    /// A provider whose chat() always fails with a fixed error.
    struct FailingProvider(ProviderError);

    #[async_trait]
    impl Provider for FailingProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> std::result::Result<ChatStream, ProviderError> {
            Err(self.0.clone())
        }
    }

    fn delta(text: &str) -> ScriptEvent {
        Ok(ChatEvent::Delta { text: text.into() })
    }

    fn done(tool_calls: Vec<ToolCall>) -> ChatEvent {
        ChatEvent::Done {
            model: "scripted-model".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            tool_calls,
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    // ── Test tools ────────────────────────────────────────────────────────

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the text argument"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    /// Owner-only and confirm-required, like write_file.
    struct GuardedTool;

    #[async_trait]
    impl Tool for GuardedTool {
        fn name(&self) -> &str {
            "guarded"
        }
        fn description(&self) -> &str {
            "A dangerous operation"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        fn permission(&self) -> ToolPermission {
            ToolPermission::Owner
        }
        fn confirm_required(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("did the dangerous thing"))
        }
    }

    struct ScriptedConfirmer {
        reply: bool,
    }

    #[async_trait]
    impl Confirmer for ScriptedConfirmer {
        async fn confirm(
            &self,
            _request: &ConfirmRequest,
        ) -> std::result::Result<bool, ConfirmError> {
            Ok(self.reply)
        }
    }

    struct CapturingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
        }
    }

    impl AuditSink for CapturingSink {
        fn record(&self, event: &AuditEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    // ── Harness ───────────────────────────────────────────────────────────

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        registry
    }

    fn runtime_with(provider: Arc<dyn Provider>, tools: ToolRegistry) -> AgentRuntime {
        let mut router = ModelRouter::new();
        router.register(provider, None);
        AgentRuntime::new(
            Arc::new(router),
            Arc::new(tools),
            "scripted/scripted-model",
            AgentSettings::default(),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn joined_deltas(events: &[AgentEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    // ── Plain replies ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn plain_reply_streams_and_lands_in_history() {
        let provider = ScriptedProvider::new(vec![vec![
            delta("Hel"),
            delta("lo!"),
            Ok(done(vec![])),
        ]]);
        let runtime = runtime_with(provider.clone(), ToolRegistry::new());

        let events = collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        assert_eq!(joined_deltas(&events), "Hello!");
        match events.last().unwrap() {
            AgentEvent::Done { model, usage } => {
                assert_eq!(model.as_deref(), Some("scripted-model"));
                assert_eq!(usage.as_ref().unwrap().total_tokens, 15);
            }
            other => panic!("Expected Done, got: {other:?}"),
        }

        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Hello!");
        assert_eq!(runtime.session_count().await, 1);
    }

    #[tokio::test]
    async fn system_prompt_prefixes_every_round() {
        let provider = ScriptedProvider::new(vec![vec![Ok(done(vec![]))]]);
        let runtime = runtime_with(provider.clone(), ToolRegistry::new());

        collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        let seen = provider.seen_messages();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][1].role, Role::User);
        assert_eq!(seen[0][1].content, "hi");
    }

    // ── Tool rounds ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_round_then_final_reply() {
        let provider = ScriptedProvider::new(vec![
            vec![
                delta("Checking... "),
                Ok(done(vec![tool_call("call_1", "echo", r#"{"text":"pong"}"#)])),
            ],
            vec![delta("The echo said pong"), Ok(done(vec![]))],
        ]);
        let runtime = runtime_with(provider.clone(), echo_registry());

        let events = collect(runtime.chat("s1", "ping?", ChatParams::new("u1"))).await;

        // Delta, ToolCall, Delta, Done — in occurrence order.
        assert_eq!(events[0].event_type(), "delta");
        match &events[1] {
            AgentEvent::ToolCall {
                name,
                output,
                success,
                ..
            } => {
                assert_eq!(name, "echo");
                assert_eq!(output, "pong");
                assert!(success);
            }
            other => panic!("Expected ToolCall, got: {other:?}"),
        }
        assert_eq!(events[2].event_type(), "delta");
        assert!(events[3].is_terminal());

        assert_eq!(provider.calls(), 2);

        // The second round saw the tool exchange it has to continue from.
        let second = &provider.seen_messages()[1];
        let assistant = second
            .iter()
            .find(|m| !m.tool_calls.is_empty())
            .expect("assistant message with tool calls");
        assert_eq!(assistant.tool_calls[0].id, "call_1");
        let tool_reply = second
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool reply");
        assert_eq!(tool_reply.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_reply.content, "pong");

        // History: user, assistant+calls, tool, assistant.
        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, "The echo said pong");
    }

    #[tokio::test]
    async fn tool_loop_stops_at_round_cap() {
        let provider = ScriptedProvider::repeating(vec![Ok(done(vec![tool_call(
            "call_x",
            "echo",
            r#"{"text":"again"}"#,
        )]))]);
        let runtime = runtime_with(provider.clone(), echo_registry());

        let events = collect(runtime.chat("s1", "loop", ChatParams::new("u1"))).await;

        let default_cap = AgentSettings::default().max_tool_rounds as usize;
        let tool_events = events
            .iter()
            .filter(|e| e.event_type() == "tool_call")
            .count();
        assert_eq!(tool_events, default_cap);
        assert_eq!(provider.calls(), default_cap);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn declined_confirmation_ends_turn_without_another_round() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(GuardedTool)).unwrap();

        let provider = ScriptedProvider::repeating(vec![Ok(done(vec![tool_call(
            "call_1", "guarded", "{}",
        )]))]);
        let runtime = runtime_with(provider.clone(), registry);

        let params = ChatParams::new("u1")
            .with_confirm(Arc::new(ScriptedConfirmer { reply: false }));
        let events = collect(runtime.chat("s1", "do it", params)).await;

        // One model round, one refused tool, then straight to Done.
        assert_eq!(provider.calls(), 1);
        match &events[0] {
            AgentEvent::ToolCall {
                success, output, ..
            } => {
                assert!(!success);
                assert!(output.contains("declined"), "got: {output}");
            }
            other => panic!("Expected ToolCall, got: {other:?}"),
        }
        assert!(matches!(events[1], AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn approved_confirmation_continues_the_loop() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(GuardedTool)).unwrap();

        let provider = ScriptedProvider::new(vec![
            vec![Ok(done(vec![tool_call("call_1", "guarded", "{}")]))],
            vec![delta("Done as asked"), Ok(done(vec![]))],
        ]);
        let runtime = runtime_with(provider.clone(), registry);

        let params = ChatParams::new("u1")
            .with_confirm(Arc::new(ScriptedConfirmer { reply: true }));
        let events = collect(runtime.chat("s1", "do it", params)).await;

        assert_eq!(provider.calls(), 2);
        match &events[0] {
            AgentEvent::ToolCall { success, .. } => assert!(success),
            other => panic!("Expected ToolCall, got: {other:?}"),
        }
        assert_eq!(joined_deltas(&events), "Done as asked");
    }

    // ── Windowing and compaction ──────────────────────────────────────────

    #[tokio::test]
    async fn sliding_window_bounds_upstream_not_storage() {
        let store = Arc::new(InMemoryStore::new());
        store.ensure_conversation("s1", "web", "u1").await.unwrap();
        for i in 0..10 {
            store
                .save_message("s1", Role::User, &format!("old {i}"))
                .await
                .unwrap();
        }

        let provider = ScriptedProvider::new(vec![vec![delta("ok"), Ok(done(vec![]))]]);
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);
        let mut settings = AgentSettings::default();
        settings.context_window = 4;
        let runtime = AgentRuntime::new(
            Arc::new(router),
            Arc::new(ToolRegistry::new()),
            "scripted/scripted-model",
            settings,
        )
        .with_store(store.clone());

        collect(runtime.chat("s1", "new message", ChatParams::new("u1"))).await;

        // Upstream: system prompt + exactly the window.
        let seen = &provider.seen_messages()[0];
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[1].content, "old 7");
        assert_eq!(seen[4].content, "new message");

        // The store kept everything: 10 old + user + assistant.
        assert_eq!(store.message_count("s1").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn in_memory_history_compacts_past_double_window() {
        let provider = ScriptedProvider::repeating(vec![delta("ok"), Ok(done(vec![]))]);
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);
        let mut settings = AgentSettings::default();
        settings.context_window = 2;
        let runtime = AgentRuntime::new(
            Arc::new(router),
            Arc::new(ToolRegistry::new()),
            "scripted/scripted-model",
            settings,
        );

        for i in 0..3 {
            collect(runtime.chat("s1", &format!("turn {i}"), ChatParams::new("u1"))).await;
        }

        // 6 messages grew past 2×2 and were cut back to the window.
        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "turn 2");
        assert_eq!(history[1].content, "ok");
    }

    #[tokio::test]
    async fn window_never_opens_on_a_tool_reply() {
        let provider = ScriptedProvider::new(vec![
            vec![Ok(done(vec![tool_call("call_1", "echo", r#"{"text":"x"}"#)]))],
            vec![delta("first done"), Ok(done(vec![]))],
            vec![delta("second done"), Ok(done(vec![]))],
        ]);
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);
        let mut settings = AgentSettings::default();
        settings.context_window = 3;
        let runtime = AgentRuntime::new(
            Arc::new(router),
            Arc::new(echo_registry()),
            "scripted/scripted-model",
            settings,
        );

        // Turn 1 leaves [user, assistant+calls, tool, assistant] in memory.
        collect(runtime.chat("s1", "turn 1", ChatParams::new("u1"))).await;
        // Turn 2's window of 3 would start on the tool reply.
        collect(runtime.chat("s1", "turn 2", ChatParams::new("u1"))).await;

        let seen = provider.seen_messages();
        let third = &seen[2];
        assert_eq!(third[0].role, Role::System);
        // The orphaned tool reply was trimmed, not sent.
        assert_ne!(third[1].role, Role::Tool);
        assert_eq!(third.last().unwrap().content, "turn 2");
    }

    // ── Failure and cancellation ──────────────────────────────────────────

    #[tokio::test]
    async fn partial_reply_survives_stream_failure() {
        let provider = ScriptedProvider::new(vec![vec![
            delta("Half a reply"),
            Err(ProviderError::Network("connection reset".into())),
        ]]);
        let runtime = runtime_with(provider, ToolRegistry::new());

        let events = collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        match events.last().unwrap() {
            AgentEvent::Error { message } => assert!(message.contains("connection reset")),
            other => panic!("Expected Error, got: {other:?}"),
        }

        // The partial text was committed, not discarded.
        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Half a reply");
    }

    #[tokio::test]
    async fn client_error_surfaces_without_retry_noise() {
        let provider = Arc::new(FailingProvider(ProviderError::AuthenticationFailed {
            provider: "scripted".into(),
            message: "bad key".into(),
        }));
        let runtime = runtime_with(provider, ToolRegistry::new());

        let events = collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Error { message } => {
                assert!(message.contains("unauthorized") || message.contains("bad key"));
            }
            other => panic!("Expected Error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_before_stream_yields_clean_done() {
        let provider = Arc::new(FailingProvider(ProviderError::Cancelled));
        let runtime = runtime_with(provider, ToolRegistry::new());

        let events = collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::Done { .. }));

        // Only the user message is in history.
        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_persists_received_text() {
        let provider = ScriptedProvider::new(vec![vec![
            delta("Before the stop"),
            Err(ProviderError::Cancelled),
        ]]);
        let runtime = runtime_with(provider, ToolRegistry::new());

        let events = collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        // A terminal Done, never an Error.
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
        let history = runtime.get_history("s1", 100, 0).await;
        assert_eq!(history[1].content, "Before the stop");
    }

    // ── Ownership and audit ───────────────────────────────────────────────

    #[tokio::test]
    async fn non_owners_are_offered_public_tools_only() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        registry.register(Box::new(GuardedTool)).unwrap();

        let provider = ScriptedProvider::repeating(vec![Ok(done(vec![]))]);
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);
        let mut settings = AgentSettings::default();
        settings.owner_ids = vec!["alice".into()];
        let runtime = AgentRuntime::new(
            Arc::new(router),
            Arc::new(registry),
            "scripted/scripted-model",
            settings,
        );

        collect(runtime.chat("s1", "hi", ChatParams::new("bob"))).await;
        collect(runtime.chat("s2", "hi", ChatParams::new("alice"))).await;

        let seen = provider.seen_tools();
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[0][0].name, "echo");
        assert_eq!(seen[1].len(), 2);
    }

    #[tokio::test]
    async fn audit_trail_covers_input_and_tools() {
        let sink = CapturingSink::new();
        let provider = ScriptedProvider::new(vec![
            vec![Ok(done(vec![tool_call("call_1", "echo", r#"{"text":"x"}"#)]))],
            vec![delta("ok"), Ok(done(vec![]))],
        ]);
        let runtime = runtime_with(provider, echo_registry()).with_audit(sink.clone());

        collect(runtime.chat("s1", "hi", ChatParams::new("u1"))).await;

        assert_eq!(
            sink.kinds(),
            vec!["user_input", "tool_call_issued", "tool_result"]
        );
    }

    // ── Store round-trips ─────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_rounds_persist_as_sentinel_blocks() {
        let store = Arc::new(InMemoryStore::new());
        let provider = ScriptedProvider::new(vec![
            vec![
                delta("Looking it up. "),
                Ok(done(vec![tool_call("call_1", "echo", r#"{"text":"found"}"#)])),
            ],
            vec![delta("It said: found"), Ok(done(vec![]))],
        ]);
        let runtime = runtime_with(provider, echo_registry()).with_store(store.clone());

        collect(runtime.chat("s1", "look this up", ChatParams::new("u1"))).await;

        let rows = store.all_messages("s1").await.unwrap();
        // user, assistant round with blocks, final assistant — and no
        // separate tool rows.
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|m| m.role != Role::Tool));

        let (prose, blocks) = tool_blocks::parse(&rows[1].content);
        assert_eq!(prose, "Looking it up.");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "echo");
        assert_eq!(blocks[0].output, "found");
        assert!(blocks[0].success);
    }

    #[tokio::test]
    async fn history_restores_from_store_for_new_session_object() {
        let store = Arc::new(InMemoryStore::new());
        let provider = ScriptedProvider::new(vec![
            vec![delta("first answer"), Ok(done(vec![]))],
            vec![delta("second answer"), Ok(done(vec![]))],
        ]);
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);

        let first = AgentRuntime::new(
            Arc::new(router),
            Arc::new(ToolRegistry::new()),
            "scripted/scripted-model",
            AgentSettings::default(),
        )
        .with_store(store.clone());
        collect(first.chat("s1", "remember me", ChatParams::new("u1"))).await;

        // A fresh runtime over the same store: the session table is empty
        // but the history comes back.
        let mut router = ModelRouter::new();
        router.register(provider.clone(), None);
        let second = AgentRuntime::new(
            Arc::new(router),
            Arc::new(ToolRegistry::new()),
            "scripted/scripted-model",
            AgentSettings::default(),
        )
        .with_store(store.clone());
        collect(second.chat("s1", "still there?", ChatParams::new("u1"))).await;

        let seen = provider.seen_messages();
        let restored = &seen[1];
        assert!(restored.iter().any(|m| m.content == "remember me"));
        assert!(restored.iter().any(|m| m.content == "first answer"));
        assert_eq!(restored.last().unwrap().content, "still there?");
    }
}
