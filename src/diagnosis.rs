use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::gemini::{GenerationRequest, ModelClient};
use crate::models::{Diagnosis, RawDiagnosis};

// ── Prompt and output contract ───────────────────────────────────────────────

pub const UNDETERMINED_DISEASE: &str = "Unknown Dermatosis (Consult a specialist)";
pub const UNDETERMINED_FIELD: &str = "Not determinable from image.";

const IMAGE_MIME_TYPE: &str = "image/png";
const TEMPERATURE: f32 = 0.0;

static INSTRUCTION: Lazy<String> = Lazy::new(|| {
    format!(
        "You are an expert dermatological triage assistant. Analyze the visible skin condition in \
         the provided image. Based on the image, identify the most probable condition and provide \
         concise, accurate information for the causes, precautions, and recommended treatments \
         (tablets/creams). Ensure your output strictly adheres to the required JSON schema. If the \
         image is not a skin condition, is not clearly visible, or is non-diagnostic, set the \
         'disease' field to '{}' and fill other fields with '{}'",
        UNDETERMINED_DISEASE, UNDETERMINED_FIELD
    )
});

pub static DIAGNOSIS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "OBJECT",
        "properties": {
            "disease": {
                "type": "STRING",
                "description": format!(
                    "The most probable dermatological condition. If unclear, use '{}'",
                    UNDETERMINED_DISEASE
                )
            },
            "causes": {
                "type": "STRING",
                "description": "A brief summary of the primary causes."
            },
            "precautions": {
                "type": "STRING",
                "description": "Key protective and preventative measures."
            },
            "tablets": {
                "type": "STRING",
                "description": "Examples of prescription or oral treatments (for triage awareness)."
            },
            "creams": {
                "type": "STRING",
                "description": "Examples of topical treatments/creams (for triage awareness)."
            }
        },
        "required": ["disease", "causes", "precautions", "tablets", "creams"]
    })
});

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis Error: Gemini Client not initialized (API Key missing).")]
    NotConfigured,
    #[error("Analysis Error: API call failed or returned invalid data. Details: {0}")]
    Upstream(String),
}

// ── Requester ────────────────────────────────────────────────────────────────

/// Turns a decoded image into a [`Diagnosis`] with a single model call.
pub struct DiagnosisRequester {
    client: Option<Arc<dyn ModelClient>>,
}

impl DiagnosisRequester {
    pub fn new(client: Option<Arc<dyn ModelClient>>) -> Self {
        DiagnosisRequester { client }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub async fn diagnose(&self, image: DynamicImage) -> Result<Diagnosis, AnalysisError> {
        let client = self.client.as_ref().ok_or(AnalysisError::NotConfigured)?;

        let png = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| upstream("PNG encoding task failed", e))?
            .map_err(|e| upstream("could not re-encode image as PNG", e))?;

        let request = GenerationRequest {
            instruction: INSTRUCTION.as_str(),
            image: &png,
            mime_type: IMAGE_MIME_TYPE,
            schema: &DIAGNOSIS_SCHEMA,
            temperature: TEMPERATURE,
        };

        let text = client
            .generate(&request)
            .await
            .map_err(|e| upstream("model call failed", e))?;

        parse_diagnosis(&text).map_err(|e| upstream("response was not valid diagnosis JSON", e))
    }
}

fn upstream(context: &str, err: impl std::fmt::Display) -> AnalysisError {
    tracing::warn!(error = %err, "{}", context);
    AnalysisError::Upstream(err.to_string())
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Parses the model's text and fills any missing field with its fallback.
/// Anything but a JSON object is rejected; serde would otherwise read an
/// array into the struct by position.
pub fn parse_diagnosis(text: &str) -> Result<Diagnosis, serde_json::Error> {
    let value: Value = serde_json::from_str(text.trim())?;
    if !value.is_object() {
        return Err(serde::de::Error::custom(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let raw: RawDiagnosis = serde_json::from_value(value)?;
    Ok(raw.into())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
