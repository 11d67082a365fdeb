//! Infrastructure layer implementations.

pub mod database;
pub mod proof;
pub mod signature;

pub use database::{PostgresClient, PostgresConfig};
pub use proof::{HttpProofRecorder, NoopProofRecorder, ProofBridgeConfig};
