//! Request/response JSON for the provider API. Field names are contractual.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    pub fn from_prompt(prompt: &str) -> Self {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            tools: Vec::new(),
            generation_config: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Tool {
    #[serde(rename = "google_search")]
    pub google_search: Value,
}

impl Tool {
    pub fn search_grounding() -> Self {
        Tool {
            google_search: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct GenerationConfig {
    pub temperature: f64,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    pub fn tokens_used(&self) -> i64 {
        self.usage_metadata
            .as_ref()
            .map(|u| u.prompt_token_count + u.candidates_token_count)
            .unwrap_or(0)
    }

    /// Concatenated text of the first candidate's parts.
    pub fn reply_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    #[serde(rename = "groundingMetadata")]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: i64,
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct GroundingMetadata {
    #[serde(rename = "groundingChunks", default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
pub struct WebChunk {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub title: String,
}
