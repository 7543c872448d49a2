// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Structured extraction from prescription and lab-report photos
//!
//! The image goes to a hosted vision model with a fixed prompt. Whatever text
//! comes back must parse into the typed records below, otherwise the call
//! fails.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::AiConfig;
use crate::{MedscanError, Result};

const PRESCRIPTION_PROMPT: &str = "Extract medical information from this prescription image and return a JSON object with:
- doctor: Doctor's name (string)
- date: Date of prescription (string in YYYY-MM-DD format)
- diagnosis: Diagnosis or notes (string)
- medicines: Array of objects with name, dosage, frequency, duration_days
- follow_up_date: Follow-up date if mentioned (string or null)

Be precise and only extract information that is clearly visible. Return valid JSON only.";

const LAB_REPORT_PROMPT: &str = "Extract lab test information from this report and return a JSON object with:
- test_name: Test name (e.g., CBC, LFT, KFT, Lipid Profile, Thyroid, Vitamin D)
- date: Date of report (string in YYYY-MM-DD format)
- values: Array of objects with name, value, reference_range, status

For status determination:
- Mark as \"high\" if value exceeds upper reference range
- Mark as \"low\" if value below lower reference range
- Mark as \"normal\" if within reference range

Be precise with numeric values and reference ranges. Return valid JSON only.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration_days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabValue {
    pub name: String,
    pub value: f64,
    pub reference_range: String,
    pub status: LabStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionExtraction {
    pub doctor: String,
    pub date: String,
    pub diagnosis: String,
    pub medicines: Vec<Medicine>,
    pub follow_up_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabReportExtraction {
    pub test_name: String,
    pub date: String,
    pub values: Vec<LabValue>,
}

impl LabReportExtraction {
    /// Values outside their reference range
    pub fn flagged(&self) -> Vec<&LabValue> {
        self.values.iter().filter(|v| v.status != LabStatus::Normal).collect()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions endpoint
pub struct VisionClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl VisionClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn extract_prescription(&self, image_base64: &str) -> Result<PrescriptionExtraction> {
        self.extract(PRESCRIPTION_PROMPT, image_base64).await.map_err(|e| {
            error!("Error extracting prescription data: {}", e);
            MedscanError::Extraction("Failed to extract prescription data".to_string())
        })
    }

    pub async fn extract_lab_report(&self, image_base64: &str) -> Result<LabReportExtraction> {
        self.extract(LAB_REPORT_PROMPT, image_base64).await.map_err(|e| {
            error!("Error extracting lab report data: {}", e);
            MedscanError::Extraction("Failed to extract lab report data".to_string())
        })
    }

    async fn extract<T: DeserializeOwned>(&self, prompt: &str, image_base64: &str) -> Result<T> {
        let text = self.generate_with_image(prompt, image_base64).await?;
        parse_model_json(&text)
    }

    /// One vision request; returns the model's reply text
    async fn generate_with_image(&self, prompt: &str, image_base64: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{}", image_base64)}}
                ]
            }]
        });

        debug!("Sending vision request: model={}", self.model);

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            return Err(MedscanError::Server {
                status: response.status().as_u16(),
                message: format!("Vision model returned status {}", response.status()),
            });
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MedscanError::Extraction("Vision model returned no content".to_string()))
    }
}

/// Parse the model reply as JSON into `T`
///
/// Models often wrap JSON in a Markdown fence; that wrapper is stripped.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    Ok(serde_json::from_str(body)?)
}

/// Fixed prescription for when no model is reachable
pub fn mock_prescription_extraction() -> PrescriptionExtraction {
    PrescriptionExtraction {
        doctor: "Dr. Sharma".to_string(),
        date: "2024-01-15".to_string(),
        diagnosis: "Hypertension and Acid Reflux".to_string(),
        medicines: vec![
            Medicine {
                name: "Omeprazole".to_string(),
                dosage: "20mg".to_string(),
                frequency: "Once daily before breakfast".to_string(),
                duration_days: 14.0,
            },
            Medicine {
                name: "Amlodipine".to_string(),
                dosage: "5mg".to_string(),
                frequency: "Once daily after dinner".to_string(),
                duration_days: 30.0,
            },
        ],
        follow_up_date: Some("2024-02-15".to_string()),
    }
}

/// Fixed lab report for when no model is reachable
pub fn mock_lab_report_extraction() -> LabReportExtraction {
    let value = |name: &str, value: f64, range: &str| LabValue {
        name: name.to_string(),
        value,
        reference_range: range.to_string(),
        status: LabStatus::Normal,
    };

    LabReportExtraction {
        test_name: "Complete Blood Count (CBC)".to_string(),
        date: "2024-01-10".to_string(),
        values: vec![
            value("Hemoglobin", 14.5, "13.5-17.5 g/dL"),
            value("WBC Count", 6800.0, "4000-11000 cells/μL"),
            value("Platelet Count", 280000.0, "150000-450000 cells/μL"),
            value("RBC Count", 4.8, "4.5-5.9 million/μL"),
        ],
    }
}
