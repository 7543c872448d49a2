// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! `/auth/*` endpoints

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{ensure_success, HttpBackend};
use crate::model::TokenResponse;
use crate::Result;

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    full_name: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

impl HttpBackend {
    /// Create an account; returns the backend's user record
    pub async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<Value> {
        debug!("POST /auth/register for {}", email);

        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(&RegisterRequest { email, password, full_name })
            .send()
            .await?;

        let response = ensure_success(response, "Registration failed").await?;
        Ok(response.json().await?)
    }

    /// Exchange credentials for a bearer token
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        debug!("POST /auth/login for {}", email);

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let response = ensure_success(response, "Login failed").await?;
        Ok(response.json().await?)
    }

    /// Tell the backend the token is done with
    ///
    /// Never fails: the local session is cleared regardless.
    pub async fn logout(&self, token: &str) {
        let result = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => debug!("Backend logout acknowledged"),
            Ok(response) => warn!(
                "Backend logout failed ({}), clearing local state anyway",
                response.status()
            ),
            Err(e) => error!("Logout error: {}", e),
        }
    }
}
