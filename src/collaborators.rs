//! Clients for the services that classify comments and write report text.
//!
//! The sentiment classifier and topic pipeline live in an inference sidecar
//! reached over HTTP; report text comes from Gemini. Both sit behind traits
//! so the pipeline can run against in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{FeedbackError, Result};
use crate::models::{CategoryShare, Keyword, Sentiment, TopicAssignment};

pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const SYSTEM_INSTRUCTION: &str = "You are an LLM-driven recommendation system. You are tasked to give accurate and specific recommendations especially on improving weaknesses.";

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    /// One label per input text, same order.
    async fn predict(&self, texts: &[String]) -> Result<Vec<Sentiment>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicModelOutput {
    pub assignments: Vec<TopicAssignment>,
    pub top_keywords: Vec<Keyword>,
    pub category_distribution: Vec<CategoryShare>,
}

#[async_trait]
pub trait TopicModeler: Send + Sync {
    async fn process(&self, texts: &[String]) -> Result<TopicModelOutput>;
}

#[async_trait]
pub trait RecommendationGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct TextsRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    comments: Vec<ProcessedComment>,
    #[serde(default)]
    top_words: Vec<(String, f64)>,
    #[serde(default)]
    category_counts: Vec<CategoryCount>,
}

#[derive(Debug, Deserialize)]
struct ProcessedComment {
    #[serde(rename = "Final_Topic")]
    final_topic: String,
    #[serde(rename = "Topic_Probability", default)]
    topic_probability: f64,
}

#[derive(Debug, Deserialize)]
struct CategoryCount {
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Probability")]
    probability: f64,
}

fn parse_predictions(labels: Vec<String>) -> Result<Vec<Sentiment>> {
    labels
        .iter()
        .map(|label| {
            Sentiment::from_label(label).ok_or_else(|| {
                FeedbackError::Collaborator(format!("unexpected sentiment label {label:?}"))
            })
        })
        .collect()
}

impl From<ProcessResponse> for TopicModelOutput {
    fn from(response: ProcessResponse) -> Self {
        let mut top_keywords: Vec<Keyword> = response
            .top_words
            .into_iter()
            .map(|(word, weight)| Keyword { word, weight })
            .collect();
        top_keywords.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top_keywords.truncate(20);

        Self {
            assignments: response
                .comments
                .into_iter()
                .map(|comment| TopicAssignment {
                    topic: comment.final_topic,
                    probability: comment.topic_probability,
                })
                .collect(),
            top_keywords,
            category_distribution: response
                .category_counts
                .into_iter()
                .map(|count| CategoryShare {
                    category: count.category,
                    percentage: count.probability,
                })
                .collect(),
        }
    }
}

/// HTTP client for the inference sidecar hosting both classifiers.
pub struct InferenceClient {
    base_url: String,
    client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SentimentClassifier for InferenceClient {
    async fn predict(&self, texts: &[String]) -> Result<Vec<Sentiment>> {
        debug!(count = texts.len(), "requesting sentiment predictions");
        let response: PredictResponse = self
            .client
            .post(format!("{}/sentiment/predict", self.base_url))
            .json(&TextsRequest { texts })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_predictions(response.predictions)
    }
}

#[async_trait]
impl TopicModeler for InferenceClient {
    async fn process(&self, texts: &[String]) -> Result<TopicModelOutput> {
        debug!(count = texts.len(), "requesting topic assignments");
        let response: ProcessResponse = self
            .client
            .post(format!("{}/topics/process", self.base_url))
            .json(&TextsRequest { texts })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.into())
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.4,
        }
    }
}

pub struct GeminiGenerator {
    config: GeminiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

fn extract_text(response: GeminiResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(FeedbackError::Collaborator(
            "generator returned no text".to_string(),
        ));
    }
    Ok(text.trim().to_string())
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RecommendationGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(FeedbackError::Collaborator(
                "GEMINI_API_KEY not set".to_string(),
            ));
        }

        let body = json!({
            "system_instruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.config.temperature },
        });

        debug!(model = %self.config.model, "requesting recommendation text");
        let response: GeminiResponse = self
            .client
            .post(format!(
                "{}/{}:generateContent",
                GEMINI_ENDPOINT, self.config.model
            ))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_text(response)
    }
}
