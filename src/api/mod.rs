// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Health-records backend client
//!
//! Two thin service groups share one reqwest client: [`auth`] for
//! register/login/logout and [`med`] for uploads, medical info and history.
//! The state container only sees the [`Backend`] trait.

pub mod auth;
pub mod med;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;
use crate::model::{HistoryItem, MedicalHistory, TokenResponse};
use crate::upload::UploadFile;
use crate::{MedscanError, Result};

/// Operations the client needs from the backend
#[async_trait]
pub trait Backend: Send + Sync {
    async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<Value>;

    async fn login(&self, email: &str, password: &str) -> Result<TokenResponse>;

    /// Best-effort; failures are logged, never returned
    async fn logout(&self, token: &str);

    async fn upload_medicine_image(&self, token: &str, file: &UploadFile) -> Result<Value>;

    async fn upload_report_image(&self, token: &str, file: &UploadFile) -> Result<Value>;

    async fn upload_report_pdf(&self, token: &str, file: &UploadFile) -> Result<Value>;

    async fn medical_info(&self, token: &str) -> Result<MedicalHistory>;

    async fn update_medical_info(&self, token: &str, history: &MedicalHistory) -> Result<Value>;

    /// Scan history, newest first as the backend orders it; 404 means none
    async fn history(&self, token: &str) -> Result<Vec<HistoryItem>>;
}

/// reqwest implementation of [`Backend`]
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<Value> {
        HttpBackend::register(self, email, password, full_name).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        HttpBackend::login(self, email, password).await
    }

    async fn logout(&self, token: &str) {
        HttpBackend::logout(self, token).await
    }

    async fn upload_medicine_image(&self, token: &str, file: &UploadFile) -> Result<Value> {
        HttpBackend::upload_medicine_image(self, token, file).await
    }

    async fn upload_report_image(&self, token: &str, file: &UploadFile) -> Result<Value> {
        HttpBackend::upload_report_image(self, token, file).await
    }

    async fn upload_report_pdf(&self, token: &str, file: &UploadFile) -> Result<Value> {
        HttpBackend::upload_report_pdf(self, token, file).await
    }

    async fn medical_info(&self, token: &str) -> Result<MedicalHistory> {
        HttpBackend::medical_info(self, token).await
    }

    async fn update_medical_info(&self, token: &str, history: &MedicalHistory) -> Result<Value> {
        HttpBackend::update_medical_info(self, token, history).await
    }

    async fn history(&self, token: &str) -> Result<Vec<HistoryItem>> {
        HttpBackend::history(self, token).await
    }
}

/// Pull a human-readable message out of an error body
///
/// Understands `{"detail": "..."}`, validation lists `{"detail": [{"msg": ...}]}`
/// and `{"message": "..."}`.
pub fn server_message(body: &Value) -> Option<String> {
    match body.get("detail") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !msgs.is_empty() {
                return Some(msgs.join("\n"));
            }
        }
        _ => {}
    }

    body.get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(String::from)
}

/// Pass a 2xx response through; turn anything else into [`MedscanError::Server`]
pub(crate) async fn ensure_success(response: Response, fallback: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| server_message(&body))
        .unwrap_or_else(|| fallback.to_string());

    debug!("Backend returned {}: {}", status, message);
    Err(MedscanError::Server {
        status: status.as_u16(),
        message,
    })
}
