//! Wire types exchanged with the RFP backend.
//!
//! Collections are carried as raw JSON values: the client never drops, reorders
//! or reshapes entries the backend produced.
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Structured representation of an uploaded RFP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfpDocument {
    pub rfp_id: String,
    pub structured_data: StructuredData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub sections: Vec<Value>,
    #[serde(default)]
    pub questions: Vec<Value>,
    #[serde(default)]
    pub requirements: Vec<Value>,
}

/// AI-authored draft tied to exactly one [`RfpDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    #[serde(default)]
    pub rfp_id: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub sections: Vec<Value>,
    #[serde(default)]
    pub questions: Vec<Value>,
    #[serde(default)]
    pub requirements: Vec<Value>,
}

impl GeneratedResponse {
    /// Copy of this response with edits applied and review metadata stamped.
    pub fn reviewed(&self, edits: &ResponseEdits, refined_text: Option<&str>) -> Self {
        let mut edited = self.clone();
        apply_field_edits(&mut edited.sections, &edits.sections, "ai_response");
        apply_field_edits(&mut edited.questions, &edits.questions, "ai_answer");
        apply_field_edits(&mut edited.requirements, &edits.requirements, "ai_explanation");

        let mut metadata = match edited.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert(
            "edited_at".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        metadata.insert("status".to_string(), Value::String("reviewed".to_string()));
        if let Some(text) = refined_text {
            metadata.insert("refined_text".to_string(), Value::String(text.to_string()));
        }
        edited.metadata = Value::Object(metadata);
        edited
    }
}

/// User edits keyed by entry `id`.
///
/// Ids are matched against the entry's `id` field whether the backend sent it as
/// a number or a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEdits {
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub questions: BTreeMap<String, String>,
    #[serde(default)]
    pub requirements: BTreeMap<String, String>,
}

impl ResponseEdits {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.questions.is_empty() && self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len() + self.questions.len() + self.requirements.len()
    }
}

fn apply_field_edits(entries: &mut [Value], edits: &BTreeMap<String, String>, field: &str) {
    if edits.is_empty() {
        return;
    }
    for entry in entries.iter_mut() {
        let Some(id) = entry.get("id").and_then(entry_id) else {
            continue;
        };
        let Some(text) = edits.get(&id) else {
            continue;
        };
        if let Value::Object(map) = entry {
            map.insert(field.to_string(), Value::String(text.clone()));
        }
    }
}

fn entry_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Handles for the finalized proposal documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalArtifacts {
    pub docx: String,
    pub pdf: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedText {
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDocsUpload {
    pub message: String,
    pub vector_store_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyDocsStatus {
    pub exists: bool,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Docx,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn default_filename(self, rfp_id: &str) -> String {
        format!("{rfp_id}_proposal.{}", self.as_str())
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
