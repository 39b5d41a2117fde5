//! Stockroom - inventory API behind a role-based access control engine.
//!
//! The binary wires these modules together; they are public so the
//! integration tests can drive them directly.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
pub mod token;
pub mod user_sync;
pub mod web;
