//! Kiriman Core Library
//!
//! This crate provides the core functionality for the Kiriman logistics
//! back office: master-data management, business identifier generation,
//! and the transactional shipment lifecycle.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod migrator;
pub mod services;
pub mod validation;

use serde::Serialize;

pub use errors::ServiceError;

// Common response wrapper consumed by the HTTP layer. Controllers translate
// this envelope into redirects or JSON; the services below only ever see
// `Result<T, ServiceError>`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Wraps a service result, using `ok_message` for the success arm and the
    /// error's display form otherwise.
    pub fn from_result(result: Result<T, ServiceError>, ok_message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(ok_message, data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}
