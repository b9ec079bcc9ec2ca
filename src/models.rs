use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One row of the input CSV.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkItem {
    pub original_url: String,
    pub target_url: String,
    pub image_type: String,
    pub prompt: String,
}

/// Generation parameters forwarded to the predict endpoint as-is.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    pub sample_count: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub person_generation: Option<String>,
    pub safety_setting: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// `data:<mime>;base64,<payload>`
    pub image_url: String,
    pub enhanced_prompt: Option<String>,
}

/// Outcome of one work item, written to the results JSON.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub entry: WorkItem,
    pub image_url: String,
    pub storage_url: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[BatchRecord]) -> Self {
        let succeeded = records.iter().filter(|r| r.success).count();
        Self { total: records.len(), succeeded, failed: records.len() - succeeded }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminGenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub samples: Option<u32>,
    #[serde(flatten)]
    pub options: GenerateOptions,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminGenerateResponse {
    pub success: bool,
    pub data: Option<GeneratedImage>,
    pub error: Option<String>,
}

impl AdminGenerateResponse {
    pub fn ok(data: GeneratedImage) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: Uuid,
    pub uri: String,
    pub prompt: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub enhanced_prompt: Option<String>,
    pub size: Option<ImageSize>,
    pub images: Option<Vec<String>>, // every uri when more than one sample was requested
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn failed_record_omits_storage_url() {
        let record = BatchRecord {
            entry: WorkItem {
                original_url: "https://old.example/windows".into(),
                target_url: "/windows/vinyl".into(),
                image_type: "windows".into(),
                prompt: "a white vinyl window".into(),
            },
            image_url: String::new(),
            storage_url: None,
            success: false,
            error: Some("no images were generated".into()),
            timestamp: DateTime::parse_from_rfc3339("2025-05-01T12:00:00Z").unwrap().with_timezone(&Utc),
            processing_time_ms: 12,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "entry": {
                    "original_url": "https://old.example/windows",
                    "target_url": "/windows/vinyl",
                    "image_type": "windows",
                    "prompt": "a white vinyl window"
                },
                "imageUrl": "",
                "success": false,
                "error": "no images were generated",
                "timestamp": "2025-05-01T12:00:00Z",
                "processingTimeMs": 12
            })
        );
    }

    #[test]
    fn admin_request_keeps_unknown_options() {
        let body: AdminGenerateRequest = serde_json::from_value(json!({
            "prompt": "bay window",
            "samples": 2,
            "aspectRatio": "16:9",
            "addWatermark": false
        }))
        .unwrap();
        assert_eq!(body.prompt.as_deref(), Some("bay window"));
        assert_eq!(body.samples, Some(2));
        assert_eq!(body.options.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(body.options.extra.get("addWatermark"), Some(&json!(false)));
        assert!(!body.options.extra.contains_key("prompt"));
    }

    #[test]
    fn summary_counts_outcomes() {
        assert_eq!(
            BatchSummary::from_records(&[]),
            BatchSummary { total: 0, succeeded: 0, failed: 0 }
        );
    }
}
