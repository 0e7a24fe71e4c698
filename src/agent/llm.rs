//! LLM-backed executor.
//!
//! Runs one configured framework by sending each section to Ollama's chat
//! API as a single prompt and parsing the first JSON value in the reply.

use super::executor::{AgentExecutor, SectionContext, SectionOutput};
use crate::config::{FrameworkConfig, ModelConfig};
use crate::error::SectionError;
use crate::models::SectionSpec;
use crate::store::value_text;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Longest artifact excerpt included in a prompt.
const MAX_ARTIFACT_CHARS: usize = 2000;

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Executor for a framework defined in configuration.
pub struct LlmExecutor {
    model: ModelConfig,
    framework: FrameworkConfig,
    http_client: reqwest::Client,
}

impl LlmExecutor {
    /// Create an executor for one framework.
    pub fn new(model: ModelConfig, framework: FrameworkConfig) -> anyhow::Result<Self> {
        info!(
            "Initializing executor for framework {} with model {}",
            framework.id, model.name
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(model.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            model,
            framework,
            http_client,
        })
    }

    pub fn framework_id(&self) -> &str {
        &self.framework.id
    }

    /// Build the user prompt for a section.
    fn build_prompt(&self, section_id: &str, context: &SectionContext) -> String {
        let section = self.framework.section(section_id);
        let title = section.map_or(context.section.title.as_str(), |s| s.title.as_str());

        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Framework: {} ({})\n",
            self.framework.title, self.framework.id
        ));
        if !self.framework.instructions.is_empty() {
            prompt.push_str(&format!("{}\n", self.framework.instructions));
        }
        prompt.push_str(&format!("\n=== SECTION: {} ===\n", title));
        if let Some(instructions) = section.and_then(|s| s.prompt.as_deref()) {
            prompt.push_str(instructions);
            prompt.push('\n');
        }

        prompt.push_str("\n=== SYSTEM DESCRIPTION ===\n");
        prompt.push_str(&context.system_description);
        prompt.push_str("\n=== END OF SYSTEM DESCRIPTION ===\n");

        if !context.artifacts.is_empty() {
            let mut keys: Vec<&String> = context.artifacts.keys().collect();
            keys.sort();
            prompt.push_str("\n=== PRIOR RESULTS ===\n");
            for key in keys {
                let text = value_text(&context.artifacts[key]);
                prompt.push_str(&format!("### {}\n{}\n", key, truncate(&text, MAX_ARTIFACT_CHARS)));
            }
        }

        if !context.related.is_empty() {
            prompt.push_str("\n=== RELATED CONTEXT ===\n");
            for hit in &context.related {
                prompt.push_str(&format!("- {}\n", truncate(&hit.content, MAX_ARTIFACT_CHARS)));
            }
        }

        prompt.push_str("\nRespond with a single JSON object only.");
        prompt
    }

    /// Send a prompt and return the raw reply text.
    async fn send_prompt(&self, prompt: &str) -> Result<String, SectionError> {
        let url = format!("{}/api/chat", self.model.ollama_url);

        let request = OllamaChatRequest {
            model: self.model.name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.model.temperature,
            },
        };

        debug!("Sending section prompt ({} chars) to {}", prompt.len(), url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SectionError::Service(format!(
                        "Request timed out after {}s",
                        self.model.timeout_seconds
                    ))
                } else if e.is_connect() {
                    SectionError::Service(format!(
                        "Cannot connect to Ollama at {}",
                        self.model.ollama_url
                    ))
                } else {
                    SectionError::Service(format!("Failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SectionError::Service(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| SectionError::InvalidOutput(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl AgentExecutor for LlmExecutor {
    fn list_sections(&self) -> Vec<SectionSpec> {
        self.framework.sections.iter().map(|s| s.spec()).collect()
    }

    async fn analyze_section(
        &self,
        section_id: &str,
        context: &SectionContext,
    ) -> Result<SectionOutput, SectionError> {
        let section = self
            .framework
            .section(section_id)
            .ok_or_else(|| SectionError::UnknownSection(section_id.to_string()))?;

        let prompt = self.build_prompt(section_id, context);
        let reply = self.send_prompt(&prompt).await?;
        let content = parse_content(&reply)?;

        let mut output = SectionOutput::new(content.clone());
        if let Some(ref key) = section.artifact_key {
            output = output.with_artifact(key.clone(), content);
        }
        Ok(output)
    }
}

/// Extract structured content from a model reply.
///
/// Tries the whole reply, then a fenced ```json block, then the outermost
/// `{...}` span. Anything else is kept as text.
pub fn parse_content(reply: &str) -> Result<Value, SectionError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(SectionError::InvalidOutput("empty reply".to_string()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(start) = trimmed.find("```json") {
        let body = &trimmed[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(body[..end].trim()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Ok(json!({ "text": trimmed }))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

/// System prompt for section analysis
const SYSTEM_PROMPT: &str = r#"You are an expert security analyst performing a structured security review.
Follow the requested methodology exactly and answer only with the JSON structure requested for the section.
Use identifiers consistently across sections so results can be cross-referenced."#;
