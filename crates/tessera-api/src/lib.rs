//! Tessera API Library
//!
//! HTTP handlers, application state and setup for the ingest service. The
//! binary in `main.rs` wires these together; integration tests build the
//! router directly against in-memory repositories.

mod api_doc;
mod handlers;
mod telemetry;

pub mod error;
pub mod principal;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use principal::{Caller, PRINCIPAL_HEADER};
pub use state::AppState;
