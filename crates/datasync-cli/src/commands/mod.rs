//! CLI command implementations
//!
//! Each module takes an [`ApiClient`](crate::api::ApiClient) plus its
//! arguments and prints either the formatted view or the raw JSON.

pub mod catalog;
pub mod health;
pub mod workflow;
