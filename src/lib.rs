//! Merchant payment gateway core.
//!
//! Payment/invoice/refund lifecycle state machine combined with a durable,
//! at-least-once webhook delivery subsystem. Layered as domain (types,
//! repository traits, errors), app (service, dispatcher, shared state),
//! infra (Postgres, HMAC signing, proof bridge), and api (axum handlers).

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
