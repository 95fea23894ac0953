//! # Flow executor
//!
//! Runs a chain of middleware steps for one conversation. Each step receives
//! the request context, a response API and a `Next` handle; it can prompt
//! the user (suspending until the reply arrives), then either end its branch
//! or hand control to further steps. The execution settles when every
//! spawned branch has settled, or on the first step error.

use anyhow::anyhow;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::buttons::ButtonRouter;
use crate::error::{FlowError, FlowResult};
use crate::promise::{PromiseManager, TimeoutFn};
use crate::service::ChatService;
use crate::state::{ChatData, RequestRecord, StateManager};
use crate::strings;

/// One caller-supplied button option. The id comes back from
/// `ask_for_input`; the label is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub label: String,
}

impl Button {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Coercion applied to a free-text reply before the checker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputKind {
    #[default]
    Text,
    Number,
    Boolean,
}

/// A coerced reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl InputValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            InputValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            InputValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InputValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        match self {
            InputValue::Text(text) => serde_json::Value::String(text),
            InputValue::Number(value) => serde_json::json!(value),
            InputValue::Boolean(value) => serde_json::Value::Bool(value),
        }
    }
}

/// Outcome of a caller-supplied input checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Accept,
    /// Reject with the generic invalid-input notice.
    Reject,
    /// Reject with caller-supplied feedback.
    RejectWith(String),
}

pub type Checker = Arc<dyn Fn(&InputValue) -> CheckOutcome + Send + Sync>;

/// What `ask_for_input` should prompt for: free text with coercion and an
/// optional checker, or a button choice.
#[derive(Default, Clone)]
pub struct InputRequest {
    pub text: Option<String>,
    pub buttons: Option<Vec<Vec<Button>>>,
    pub kind: InputKind,
    pub checker: Option<Checker>,
}

impl InputRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            text: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn buttons(rows: Vec<Vec<Button>>) -> Self {
        Self {
            buttons: Some(rows),
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.text = Some(prompt.into());
        self
    }

    pub fn kind(mut self, kind: InputKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(&InputValue) -> CheckOutcome + Send + Sync + 'static,
    {
        self.checker = Some(Arc::new(checker));
        self
    }
}

/// Everything a step knows about the conversation it runs in. Handles are
/// passed down explicitly; steps never reach for process-wide state.
pub struct RequestContext {
    pub user_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    /// Content of the message that started the flow.
    pub content: String,
    pub chat: Arc<dyn ChatService>,
    pub state: StateManager,
}

impl RequestContext {
    /// Key of the single outstanding exchange this conversation may have.
    pub fn conversation_key(&self) -> String {
        format!("{}:{}", self.user_id, self.channel_id)
    }

    pub async fn chat_data(&self) -> anyhow::Result<Option<ChatData>> {
        self.state.get_chat_data(&self.channel_id).await
    }

    /// Typed counterpart of [`chat_data`](Self::chat_data) for flows that
    /// define their own record type.
    pub async fn chat_data_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> anyhow::Result<Option<T>> {
        self.state.get_chat_data_as(&self.channel_id).await
    }

    pub async fn set_chat_data_as<T: serde::Serialize>(&self, data: &T) -> anyhow::Result<()> {
        self.state.set_chat_data_as(&self.channel_id, data).await
    }

    /// Shallow-merges `patch` onto the conversation's accumulated data.
    pub async fn update_chat_data(&self, patch: ChatData) -> anyhow::Result<ChatData> {
        self.state.update_chat_data(&self.channel_id, patch).await
    }

    /// Read-modify-write; the closure returns the new full data.
    pub async fn update_chat_data_with<F>(&self, update: F) -> anyhow::Result<ChatData>
    where
        F: FnOnce(ChatData) -> ChatData + Send,
    {
        self.state
            .update_chat_data_with(&self.channel_id, update)
            .await
    }
}

pub type StepFuture = BoxFuture<'static, anyhow::Result<()>>;

/// One unit of conversation logic.
pub type Step = Arc<dyn Fn(Arc<RequestContext>, Responder, Next) -> StepFuture + Send + Sync>;

/// Wraps an async function into a [`Step`].
pub fn step<F, Fut>(f: F) -> Step
where
    F: Fn(Arc<RequestContext>, Responder, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx, responder, next| Box::pin(f(ctx, responder, next)))
}

/// Sends one message to the conversation's origin channel; handed to the
/// timeout callback so it can notify the user.
pub type MessageSend = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Per-listener callback fired whenever an awaited reply times out.
pub type TimeoutCallback =
    Arc<dyn Fn(Arc<RequestContext>, MessageSend) -> BoxFuture<'static, ()> + Send + Sync>;

/// Timeout callback that just sends a fixed notice.
pub fn timeout_notice(text: impl Into<String>) -> TimeoutCallback {
    let text = text.into();
    Arc::new(move |_ctx, send| {
        let text = text.clone();
        Box::pin(async move {
            let _ = send(text).await;
        })
    })
}

struct ExecStatus {
    completed: bool,
    failure: Option<FlowError>,
}

struct ExecState {
    chain: Vec<Step>,
    active: AtomicUsize,
    status: Mutex<ExecStatus>,
    done: Notify,
}

impl ExecState {
    fn is_completed(&self) -> bool {
        self.status.lock().unwrap().completed
    }

    fn fail(&self, err: FlowError) {
        let mut status = self.status.lock().unwrap();
        if status.completed {
            return;
        }
        status.completed = true;
        status.failure = Some(err);
        drop(status);
        self.done.notify_one();
    }

    /// One branch finished. The execution completes successfully when the
    /// last branch leaves with no failure recorded.
    fn leave(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut status = self.status.lock().unwrap();
            status.completed = true;
            drop(status);
            self.done.notify_one();
        }
    }

    async fn wait_done(&self) {
        loop {
            if self.is_completed() {
                return;
            }
            self.done.notified().await;
        }
    }
}

/// Hands control to subsequent steps. Cloneable so a step can stash it in a
/// spawned task; invocations after the execution completed are no-ops.
#[derive(Clone)]
pub struct Next {
    ctx: Arc<RequestContext>,
    responder: Responder,
    exec: Arc<ExecState>,
}

impl Next {
    /// Runs one follow-up step, suspending the caller until it (and any
    /// steps it chains inline) returns.
    pub async fn invoke(&self, next_step: Step) {
        self.run_sequence(vec![next_step]).await;
    }

    /// Fans out into independent continuations, one tracked task each. The
    /// overall execution settles only after all of them settle.
    pub async fn fan_out(&self, steps: Vec<Step>) {
        for next_step in steps {
            if self.exec.is_completed() {
                return;
            }
            let branch = self.clone();
            self.exec.active.fetch_add(1, Ordering::AcqRel);
            tokio::spawn(async move {
                let result =
                    (next_step)(branch.ctx.clone(), branch.responder.clone(), branch.clone()).await;
                if let Err(err) = result {
                    branch.exec.fail(FlowError::from_step(err));
                }
                branch.exec.leave();
            });
        }
    }

    /// Seeds the execution with the full configured chain.
    pub(crate) async fn start(&self) {
        let chain = self.exec.chain.clone();
        self.run_sequence(chain).await;
    }

    async fn run_sequence(&self, steps: Vec<Step>) {
        if self.exec.is_completed() {
            return;
        }
        self.exec.active.fetch_add(1, Ordering::AcqRel);
        let mut failure = None;
        for next_step in steps {
            if let Err(err) =
                (next_step)(self.ctx.clone(), self.responder.clone(), self.clone()).await
            {
                failure = Some(err);
                break;
            }
        }
        if let Some(err) = failure {
            self.exec.fail(FlowError::from_step(err));
        }
        self.exec.leave();
    }
}

/// The response API handed to every step. Every method that awaits a reply
/// suspends the step until the exchange settles.
#[derive(Clone)]
pub struct Responder {
    ctx: Arc<RequestContext>,
    promises: PromiseManager,
    buttons: Arc<ButtonRouter>,
    request_timeout: Duration,
    on_timeout: TimeoutCallback,
}

impl Responder {
    /// Fire-and-forget message to the conversation's origin channel.
    pub async fn send(&self, message: &str) -> FlowResult<()> {
        self.ctx
            .chat
            .send_text(&self.ctx.channel_id, message)
            .await
            .map(|_| ())
            .map_err(FlowError::Transport)
    }

    /// Optionally sends a prompt, then awaits exactly one raw text reply
    /// with the engine's default request timeout.
    pub async fn request_data(&self, prompt: Option<&str>) -> FlowResult<RequestRecord> {
        if let Some(prompt) = prompt {
            self.send(prompt).await?;
        }
        self.await_reply().await
    }

    /// Unified free-text / button prompt. Free text is coerced per
    /// `InputRequest::kind` and run through the checker, re-prompting until
    /// a value is accepted; buttons resolve with the clicked option id.
    /// Timeouts and discards are propagated, never retried.
    pub async fn ask_for_input(&self, request: InputRequest) -> FlowResult<InputValue> {
        if let Some(rows) = &request.buttons {
            let prompt = request
                .text
                .as_deref()
                .unwrap_or(strings::SELECT_AN_OPTION);
            let option_id = self.ask_with_buttons(prompt, rows).await?;
            return Ok(InputValue::Text(option_id));
        }

        let Some(prompt) = request.text.as_deref() else {
            return Err(FlowError::Step(anyhow!(
                "ask_for_input requires 'text' or 'buttons'"
            )));
        };

        self.send(prompt).await?;
        loop {
            let reply = self.await_reply().await?;

            let mut feedback = None;
            if let Some(value) = coerce(&reply.response, request.kind) {
                match request.checker.as_ref() {
                    None => return Ok(value),
                    Some(checker) => match checker(&value) {
                        CheckOutcome::Accept => return Ok(value),
                        CheckOutcome::Reject => {}
                        CheckOutcome::RejectWith(message) => feedback = Some(message),
                    },
                }
            }

            let feedback = feedback.unwrap_or_else(|| strings::INVALID_INPUT.to_string());
            self.send(&feedback).await?;
            self.send(prompt).await?;
        }
    }

    /// Two-button yes/no question.
    pub async fn boolean_question(&self, question: &str) -> FlowResult<bool> {
        let rows = vec![vec![
            Button::new("yes", strings::YES_LABEL),
            Button::new("no", strings::NO_LABEL),
        ]];
        let option_id = self.ask_with_buttons(question, &rows).await?;
        Ok(option_id == "yes")
    }

    /// Renders the button rows (batched per the platform's five-row limit)
    /// and waits for the first click. Stray text messages are answered with
    /// a "use the buttons" notice and do not affect the button wait; the
    /// click discards the concurrently pending free-text wait.
    async fn ask_with_buttons(&self, prompt: &str, rows: &[Vec<Button>]) -> FlowResult<String> {
        self.send(prompt).await?;

        let wait = self.buttons.register(rows);
        let group_id = wait.group_id;
        for batch in &wait.batches {
            if let Err(err) = self
                .ctx
                .chat
                .send_buttons(&self.ctx.channel_id, batch)
                .await
            {
                self.buttons.cancel(group_id);
                return Err(FlowError::Transport(err));
            }
        }

        let key = self.ctx.conversation_key();
        let click = wait.clicked();
        tokio::pin!(click);

        let result = loop {
            tokio::select! {
                picked = &mut click => match picked {
                    Ok(option_id) => {
                        self.promises
                            .discard_promise(&key, strings::REASON_BUTTON_PRESSED)
                            .await;
                        break Ok(option_id);
                    }
                    Err(_) => {
                        break Err(FlowError::Discarded("button-group-cancelled".to_string()));
                    }
                },
                reply = self.await_reply() => match reply {
                    Ok(_) => {
                        if let Err(err) = self.send(strings::USE_THE_BUTTONS).await {
                            break Err(err);
                        }
                    }
                    Err(err) => break Err(err),
                },
            }
        };

        self.buttons.cancel(group_id);
        result
    }

    async fn await_reply(&self) -> FlowResult<RequestRecord> {
        let key = self.ctx.conversation_key();

        let send: MessageSend = {
            let chat = self.ctx.chat.clone();
            let channel_id = self.ctx.channel_id.clone();
            Arc::new(move |message| {
                let chat = chat.clone();
                let channel_id = channel_id.clone();
                Box::pin(async move { chat.send_text(&channel_id, &message).await.map(|_| ()) })
            })
        };
        let on_timeout: TimeoutFn = {
            let callback = self.on_timeout.clone();
            let ctx = self.ctx.clone();
            Box::new(move || callback(ctx, send))
        };

        self.promises
            .create_promise(&key, self.request_timeout, Some(on_timeout))
            .await
    }
}

fn coerce(response: &str, kind: InputKind) -> Option<InputValue> {
    match kind {
        InputKind::Text => Some(InputValue::Text(response.to_string())),
        // "NaN" and "inf" parse as f64 but are not valid answers.
        InputKind::Number => response
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(InputValue::Number),
        InputKind::Boolean => match response.trim().to_ascii_lowercase().as_str() {
            "true" => Some(InputValue::Boolean(true)),
            "false" => Some(InputValue::Boolean(false)),
            _ => None,
        },
    }
}

/// Orchestrates one listener's step chain. One executor serves many
/// conversations; all per-execution state lives in `execute`.
pub struct FlowExecutor {
    chain: Vec<Step>,
    promises: PromiseManager,
    buttons: Arc<ButtonRouter>,
    request_timeout: Duration,
    on_timeout: TimeoutCallback,
}

impl FlowExecutor {
    pub fn new(
        chain: Vec<Step>,
        promises: PromiseManager,
        buttons: Arc<ButtonRouter>,
        request_timeout: Duration,
        on_timeout: TimeoutCallback,
    ) -> Self {
        Self {
            chain,
            promises,
            buttons,
            request_timeout,
            on_timeout,
        }
    }

    /// Runs the configured chain for one conversation. Fails on the first
    /// step error; succeeds once every branch has settled.
    pub async fn execute(&self, ctx: Arc<RequestContext>) -> FlowResult<()> {
        let responder = Responder {
            ctx: ctx.clone(),
            promises: self.promises.clone(),
            buttons: self.buttons.clone(),
            request_timeout: self.request_timeout,
            on_timeout: self.on_timeout.clone(),
        };
        let exec = Arc::new(ExecState {
            chain: self.chain.clone(),
            active: AtomicUsize::new(0),
            status: Mutex::new(ExecStatus {
                completed: false,
                failure: None,
            }),
            done: Notify::new(),
        });
        let next = Next {
            ctx,
            responder,
            exec: exec.clone(),
        };

        next.start().await;
        exec.wait_done().await;

        let failure = exec.status.lock().unwrap().failure.take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
