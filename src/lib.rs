//! # Chatflow
//!
//! A conversational-flow engine for Discord bots. Dialogue logic is written
//! as a chain of async "step" functions; each step can send messages, await
//! a single user reply (free text or button click) with timeout semantics,
//! and hand control to further steps. In-flight conversation state lives in
//! an external key/value store so a pending exchange survives a restart as a
//! detectable marker.
//!
//! Layering, leaves first:
//! - `store`: the persistent key/value store behind a trait (in-memory, or
//!   Redis with the `redis` feature).
//! - `state`: typed facade for chat data and pending-request records.
//! - `promise`: turns "a reply will arrive as a gateway event eventually"
//!   into an awaitable future with poll + push wake, timeout and discard.
//! - `resolver`: correlates an inbound raw message to a pending request.
//! - `buttons`: process-local correlation registry for button groups.
//! - `flow`: the executor running step chains and the response API steps use.
//! - `listener`: transport-agnostic event sink routing messages into the
//!   resolver or a fresh flow execution.
//! - `discord`: serenity adapter (`ChatService` impl, gateway handler, and
//!   the `ChatApp` wiring facade).

pub mod buttons;
pub mod config;
pub mod discord;
pub mod error;
pub mod flow;
pub mod listener;
pub mod promise;
pub mod resolver;
pub mod service;
pub mod state;
pub mod store;
pub mod strings;

pub use config::EngineConfig;
pub use error::{FlowError, FlowResult};
pub use discord::ChatApp;
pub use flow::{
    Button, CheckOutcome, Checker, FlowExecutor, InputKind, InputRequest, InputValue, MessageSend,
    Next, RequestContext, Responder, Step, TimeoutCallback, step, timeout_notice,
};
pub use listener::{ChannelCreateCallback, ChatListener, ListenerProps};
pub use promise::PromiseManager;
pub use resolver::MessageResolver;
pub use service::{ButtonClick, ChannelCreated, ChatService, InboundMessage, RenderedButton};
pub use state::{ChatData, RequestRecord, RequestStatus, StateManager};
pub use store::{MemoryStore, StateStore};
