//! Application layer containing business logic and shared state.

pub mod dispatcher;
pub mod service;
pub mod state;

pub use dispatcher::{DispatcherConfig, WebhookDispatcher, spawn_dispatcher};
pub use service::PaymentService;
pub use state::AppState;
