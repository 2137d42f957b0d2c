//! Shared fixtures for unit tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use crate::gemini::{GenerationRequest, ModelClient, ModelError};

/// What a [`StubClient`] saw on its most recent call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub instruction: String,
    pub image: Vec<u8>,
    pub mime_type: String,
    pub schema: Value,
    pub temperature: f32,
}

/// Model client that replays a canned reply and counts calls.
pub struct StubClient {
    reply: Result<String, String>,
    calls: AtomicUsize,
    last: Mutex<Option<SeenRequest>>,
}

impl StubClient {
    pub fn ok(text: &str) -> Arc<Self> {
        Self::with_reply(Ok(text.to_string()))
    }

    pub fn failing(detail: &str) -> Arc<Self> {
        Self::with_reply(Err(detail.to_string()))
    }

    fn with_reply(reply: Result<String, String>) -> Arc<Self> {
        Arc::new(StubClient {
            reply,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for StubClient {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(SeenRequest {
            instruction: request.instruction.to_string(),
            image: request.image.to_vec(),
            mime_type: request.mime_type.to_string(),
            schema: request.schema.clone(),
            temperature: request.temperature,
        });
        self.reply.clone().map_err(ModelError::Request)
    }
}

pub fn sample_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([200, 120, 90])))
}

pub fn encoded(format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    sample_image().write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub const FULL_DIAGNOSIS: &str = r#"{"disease":"Eczema","causes":"Dry skin","precautions":"Moisturise","tablets":"Antihistamines","creams":"Hydrocortisone"}"#;
