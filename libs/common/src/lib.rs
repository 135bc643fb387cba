//! Common library for the Converse backend
//!
//! This crate provides shared functionality used by the service crates,
//! currently database connectivity and the error types that go with it.

pub mod database;
pub mod error;
