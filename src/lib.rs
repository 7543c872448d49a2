// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! medscan: personal health-records client
//!
//! Logs in against the health-records backend, uploads prescription and
//! lab-report photos or PDFs for AI analysis, keeps the scan history, medical
//! background, preferences and family profiles in a local key-value store.

pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod model;
pub mod profiles;
pub mod state;
pub mod store;
pub mod upload;

pub use config::AppConfig;
pub use error::{MedscanError, Result};
