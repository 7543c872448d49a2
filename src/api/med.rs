// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! `/med/*` endpoints: uploads, medical info, scan history

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::{ensure_success, HttpBackend};
use crate::model::{HistoryItem, MedicalHistory};
use crate::upload::UploadFile;
use crate::Result;

impl HttpBackend {
    /// Send one file as a single multipart field and return the analysis JSON
    async fn upload(
        &self,
        path: &str,
        field: &'static str,
        token: &str,
        file: &UploadFile,
        fallback: &str,
    ) -> Result<Value> {
        debug!("POST {} ({} bytes, {})", path, file.bytes.len(), file.mime());

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.part_name())
            .mime_str(file.mime())?;
        let form = Form::new().part(field, part);

        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let response = ensure_success(response, fallback).await?;
        Ok(response.json().await?)
    }

    pub async fn upload_medicine_image(&self, token: &str, file: &UploadFile) -> Result<Value> {
        self.upload(
            "/med/upload-medicine-image",
            "image",
            token,
            file,
            "Failed to upload medicine image",
        )
        .await
    }

    pub async fn upload_report_image(&self, token: &str, file: &UploadFile) -> Result<Value> {
        self.upload(
            "/med/upload-medical-report-image",
            "image",
            token,
            file,
            "Failed to upload report image",
        )
        .await
    }

    pub async fn upload_report_pdf(&self, token: &str, file: &UploadFile) -> Result<Value> {
        self.upload(
            "/med/upload-medical-report-pdf",
            "file",
            token,
            file,
            "Failed to upload PDF",
        )
        .await
    }

    pub async fn medical_info(&self, token: &str) -> Result<MedicalHistory> {
        let response = self
            .client
            .get(self.url("/med/infoget"))
            .bearer_auth(token)
            .send()
            .await?;

        let response = ensure_success(response, "Failed to fetch medical history").await?;
        Ok(response.json().await?)
    }

    pub async fn update_medical_info(&self, token: &str, history: &MedicalHistory) -> Result<Value> {
        let response = self
            .client
            .post(self.url("/med/infoupdate"))
            .bearer_auth(token)
            .json(history)
            .send()
            .await?;

        let response = ensure_success(response, "Failed to update medical history").await?;
        Ok(response.json().await?)
    }

    /// Scan history; a 404 means the user has none yet
    pub async fn history(&self, token: &str) -> Result<Vec<HistoryItem>> {
        let response = self
            .client
            .get(self.url("/med/history"))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No history on the backend yet");
            return Ok(Vec::new());
        }

        let response = ensure_success(response, "Failed to fetch history").await?;
        let values: Vec<Value> = response.json().await?;
        Ok(HistoryItem::decode_list(values))
    }
}
