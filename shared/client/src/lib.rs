//! Single-shot client of the session offload service.
//!
//! A run opens one [`Connection`], sends one deadline-bound `AddSession`
//! ([`do_sessionoffload`]), then launches one background unit
//! ([`do_client_background`]) and waits on a [`CompletionSignal`] before
//! releasing the connection. [`Coordinator`] sequences those steps.

mod background;
mod completion;
mod connection;
mod coordinator;
mod deadline;
mod error;
mod invoker;
pub mod logging;
mod session_table;

pub use background::{
    do_client_background, spawn_background, BackgroundPlan, BackgroundSummary, MAX_JITTER,
    MAX_PAGE_SIZE,
};
pub use completion::{CompletionSignal, CompletionToken};
pub use connection::{normalize_target, Connection, CONNECT_TIMEOUT, DEFAULT_ADDR};
pub use coordinator::{run_session_offload, Coordinator, CoordinatorState, RunReport};
pub use deadline::{DeadlineContext, SESSION_OFFLOAD_TIMEOUT};
pub use error::OffloadError;
pub use invoker::{do_sessionoffload, example_session};
pub use session_table::{GrpcSessionTable, SessionOffload};

pub use offload_proto as proto;
