// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Plain records shared by the state container, the backend client and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// The signed-in account as the client knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
}

impl User {
    /// Account derived from a login email: the display name is the local part
    pub fn from_email(email: &str) -> Self {
        let name = email.split('@').next().unwrap_or(email).to_string();
        Self {
            name,
            email: email.to_string(),
        }
    }
}

/// Colour scheme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        })
    }
}

impl FromStr for Theme {
    type Err = crate::MedscanError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(crate::MedscanError::Validation(format!(
                "Unknown theme '{}' (expected light, dark or system)",
                other
            ))),
        }
    }
}

/// What an analysed upload was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Med,
    Report,
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Med => "medicine",
            Self::Report => "report",
        })
    }
}

/// One AI-analysed upload as returned by `/med/history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    /// Hosted image URL
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_ref: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date: String,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    /// Raw analysis payload, shape decided by the backend
    #[serde(default)]
    pub response: Option<Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl HistoryItem {
    /// Decode a history listing item by item
    ///
    /// Entries that do not fit are logged and dropped so one bad record
    /// cannot hide the rest.
    pub fn decode_list(values: Vec<Value>) -> Vec<HistoryItem> {
        values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<HistoryItem>(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping unreadable history item: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Best short label for list views
    pub fn headline(&self) -> String {
        let field = match self.kind {
            HistoryKind::Med => "drug_name",
            HistoryKind::Report => "summary",
        };
        self.response
            .as_ref()
            .and_then(|r| r.get(field))
            .and_then(|v| v.as_str())
            .map(|s| {
                let line = s.lines().next().unwrap_or_default();
                if line.chars().count() > 60 {
                    format!("{}...", line.chars().take(57).collect::<String>())
                } else {
                    line.to_string()
                }
            })
            .unwrap_or_else(|| "(no analysis)".to_string())
    }
}

/// Medical background kept on the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalInfo {
    #[serde(default)]
    pub conditions: String,
    #[serde(default)]
    pub allergies: String,
    #[serde(default)]
    pub medications: String,
}

/// Partial edit of [`MedicalInfo`]; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct MedicalInfoPatch {
    pub conditions: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
}

impl MedicalInfoPatch {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_none() && self.allergies.is_none() && self.medications.is_none()
    }
}

impl MedicalInfo {
    pub fn merge(&self, patch: MedicalInfoPatch) -> Self {
        Self {
            conditions: patch.conditions.unwrap_or_else(|| self.conditions.clone()),
            allergies: patch.allergies.unwrap_or_else(|| self.allergies.clone()),
            medications: patch.medications.unwrap_or_else(|| self.medications.clone()),
        }
    }
}

/// Wire shape of `/med/infoget` and `/med/infoupdate`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalHistory {
    #[serde(default)]
    pub chronic_condition: String,
    #[serde(default)]
    pub allergy: String,
    #[serde(default)]
    pub current_medication: String,
}

impl From<MedicalHistory> for MedicalInfo {
    fn from(h: MedicalHistory) -> Self {
        Self {
            conditions: h.chronic_condition,
            allergies: h.allergy,
            medications: h.current_medication,
        }
    }
}

impl From<&MedicalInfo> for MedicalHistory {
    fn from(info: &MedicalInfo) -> Self {
        Self {
            chronic_condition: info.conditions.clone(),
            allergy: info.allergies.clone(),
            current_medication: info.medications.clone(),
        }
    }
}

/// Reply of `/auth/login`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        })
    }
}

impl FromStr for Gender {
    type Err = crate::MedscanError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            other => Err(crate::MedscanError::Validation(format!(
                "Unknown gender '{}' (expected male, female or other)",
                other
            ))),
        }
    }
}

/// A family member tracked on this device only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
