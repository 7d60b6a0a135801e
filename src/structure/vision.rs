use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::document::SourceDocument;

/// Images at or below this size are treated as icons or logos, not flowcharts.
pub const MIN_ALGORITHM_IMAGE_BYTES: usize = 10_000;

pub const ALGORITHM_PROMPT: &str = "Analyze this medical flowchart/algorithm from a Clinical Practice Guidelines document.

Convert it to a step-by-step text description that can be used for retrieval. Format as:

Step 1: [Initial assessment/question]
- If [condition A] → [action/next step]
- If [condition B] → [action/next step]

Step 2: [Next decision point]
...

Include all decision points, conditions, and outcomes visible in the flowchart.
Focus on clinical decision-making logic.";

/// Turns a flowchart image into text. Implementations report every failure
/// as `None`; they never return an error to the caller.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(&self, image: &[u8], mime_type: &str, page_number: u32) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct OpenAiVisionConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

/// Vision client for any OpenAI-compatible chat completions endpoint
/// (OpenRouter, Gemini's compatibility layer, a local gateway).
pub struct OpenAiVisionDescriber {
    client: reqwest::Client,
    config: OpenAiVisionConfig,
}

impl OpenAiVisionDescriber {
    pub fn new(config: OpenAiVisionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn request_description(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, VisionError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let data_url = format!("data:{mime_type};base64,{}", STANDARD.encode(image));

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": ALGORITHM_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
        });

        debug!(url = %url, model = %self.config.model, "vision request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| VisionError::Parse("missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl VisionDescriber for OpenAiVisionDescriber {
    async fn describe(&self, image: &[u8], mime_type: &str, page_number: u32) -> Option<String> {
        match self.request_description(image, mime_type).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!(page = page_number, "vision model returned an empty description");
                None
            }
            Err(err) => {
                warn!(page = page_number, error = %err, "vision analysis failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VisionOptions {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for VisionOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmDescription {
    pub page: u32,
    pub index: usize,
    pub description: String,
    pub image_size: usize,
}

#[derive(Debug, Default)]
pub struct AlgorithmExtraction {
    pub algorithms: Vec<AlgorithmDescription>,
    pub images_considered: usize,
    pub skipped_small_images: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Describes every flowchart-sized image with bounded concurrency. Results
/// come back ordered by page and image position regardless of finish order.
pub async fn describe_algorithms(
    document: &SourceDocument,
    describer: &dyn VisionDescriber,
    options: VisionOptions,
) -> AlgorithmExtraction {
    let mut extraction = AlgorithmExtraction::default();

    let candidates = document
        .pages
        .iter()
        .flat_map(|page| page.images.iter().map(move |image| (page.number, image)))
        .filter(|(_, image)| {
            if image.data.len() <= MIN_ALGORITHM_IMAGE_BYTES {
                extraction.skipped_small_images += 1;
                false
            } else {
                true
            }
        })
        .collect::<Vec<_>>();
    extraction.images_considered = candidates.len();

    let outcomes = stream::iter(candidates)
        .map(|(page, image)| async move {
            let outcome = tokio::time::timeout(
                options.timeout,
                describer.describe(&image.data, &image.mime_type, page),
            )
            .await;
            (page, image.index, image.data.len(), outcome)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    for (page, index, image_size, outcome) in outcomes {
        match outcome {
            Ok(Some(description)) => extraction.algorithms.push(AlgorithmDescription {
                page,
                index,
                description,
                image_size,
            }),
            Ok(None) => extraction.failed += 1,
            Err(_) => {
                warn!(
                    page,
                    index,
                    timeout_secs = options.timeout.as_secs_f32(),
                    "vision analysis timed out"
                );
                extraction.timed_out += 1;
            }
        }
    }

    extraction
        .algorithms
        .sort_by(|a, b| a.page.cmp(&b.page).then(a.index.cmp(&b.index)));

    info!(
        described = extraction.algorithms.len(),
        skipped_small = extraction.skipped_small_images,
        failed = extraction.failed,
        timed_out = extraction.timed_out,
        "described algorithm images"
    );
    extraction
}
