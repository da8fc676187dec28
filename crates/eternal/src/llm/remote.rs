//! Remote LLM service using OpenAI-compatible APIs
//!
//! Implements the LlmService trait over `/chat/completions` and
//! `/embeddings`. Works with any OpenAI-compatible endpoint; the API key is
//! read from the environment variable named in config.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::cache::{CacheStats, EmbeddingCache};
use crate::llm::prompts::{
    DAILY_REFLECTION_PROMPT, ENDURING_FACTS_PROMPT, EVOLVE_QUERY_PROMPT, EXTRACT_FACTS_PROMPT,
    EXTRACT_TRIPLES_PROMPT, MONTHLY_SUMMARY_PROMPT, PREDICT_INTENT_PROMPT,
    PROFILE_INSIGHTS_PROMPT, RATE_IMPORTANCE_PROMPT, REASON_PROMPT, RELATIONSHIP_PROMPT,
    SUGGEST_CATEGORY_PROMPT, SUMMARIZE_CATEGORY_PROMPT, WEEKLY_SUMMARY_PROMPT, bullet_list,
};
use crate::llm::provider::LlmService;
use crate::llm::types::{
    DailyReflection, ExtractedFact, ExtractedTriple, LlmError, MonthlySummary, ProfileInsight,
    Relationship, WeeklySummary,
};

const MAX_RETRIES: u32 = 3;

/// LLM service backed by an OpenAI-compatible HTTP API
#[derive(Debug)]
pub struct RemoteLlm {
    client: Client,
    config: LlmConfig,
    api_key: String,
    cache: EmbeddingCache,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl RemoteLlm {
    /// Create a new remote service with the given configuration
    ///
    /// Returns an error if the API key environment variable is not set.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            LlmError::Config(format!("API key env var '{}' not set", config.api_key_env))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        info!(
            "RemoteLlm initialized with chat model: {}, embedding model: {}, api_url: {}",
            config.chat_model, config.embedding_model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            cache: EmbeddingCache::new(config.embedding_cache_capacity),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// POST a JSON body with exponential backoff on rate limits and
    /// transport errors (1s, 2s, 4s).
    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let url = format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            endpoint
        );
        debug!("Calling remote API at: {}", url);

        let mut last_error = None;
        let mut delay = Duration::from_secs(1);

        for attempt in 0..MAX_RETRIES {
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == 429 {
                        warn!(
                            "Rate limited on attempt {}/{}, waiting {:?}",
                            attempt + 1,
                            MAX_RETRIES,
                            delay
                        );
                        last_error = Some(format!("rate limited ({status})"));
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(LlmError::Api(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    return response
                        .json()
                        .await
                        .map_err(|e| LlmError::Parse(e.to_string()));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt < MAX_RETRIES - 1 {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(LlmError::Api(format!(
            "Failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    async fn chat(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.config.chat_model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let completion: ChatCompletionResponse = self.post("chat/completions", &request).await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }

    async fn chat_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        temperature: f32,
    ) -> Result<T, LlmError> {
        let response = self.chat(prompt, temperature).await?;
        parse_json(&response)
    }
}

/// Parse model output as JSON, tolerating code fences and leading prose
fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, LlmError> {
    let trimmed = response.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let start = unfenced.find(['[', '{']).unwrap_or(0);
    serde_json::from_str(&unfenced[start..])
        .map_err(|e| LlmError::Parse(format!("Failed to parse model JSON: {e}")))
}

/// First number in a response like "7", "7/10" or "Rating: 7"
fn parse_rating(response: &str) -> Option<f32> {
    response
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|s| !s.is_empty() && s.chars().any(|c| c.is_ascii_digit()))
        .and_then(|s| s.trim_matches('.').parse::<f32>().ok())
}

#[async_trait]
impl LlmService for RemoteLlm {
    async fn extract_facts(&self, text: &str) -> Result<Vec<ExtractedFact>, LlmError> {
        let prompt = EXTRACT_FACTS_PROMPT.replace("{text}", text);
        let facts: Vec<ExtractedFact> = self.chat_json(&prompt, 0.2).await?;
        Ok(facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .map(|mut f| {
                f.importance = f.importance.map(|i| i.clamp(0.0, 1.0));
                f
            })
            .collect())
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache.get(t)).collect();
        let missing: Vec<String> = texts
            .iter()
            .zip(&results)
            .filter(|(_, cached)| cached.is_none())
            .map(|(text, _)| text.clone())
            .collect();

        if !missing.is_empty() {
            let request = EmbeddingRequest {
                model: &self.config.embedding_model,
                input: &missing,
            };
            let mut response: EmbeddingResponse = self.post("embeddings", &request).await?;
            if response.data.len() != missing.len() {
                return Err(LlmError::Parse(format!(
                    "Requested {} embeddings, received {}",
                    missing.len(),
                    response.data.len()
                )));
            }
            response.data.sort_by_key(|d| d.index);

            let mut fresh = missing.into_iter().zip(response.data);
            for slot in results.iter_mut().filter(|slot| slot.is_none()) {
                if let Some((text, data)) = fresh.next() {
                    self.cache.put(text, data.embedding.clone());
                    *slot = Some(data.embedding);
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or(LlmError::EmptyResponse))
            .collect()
    }

    async fn evolve_query(&self, query: &str, context: &str) -> Result<String, LlmError> {
        let context = if context.trim().is_empty() {
            "(no recent conversation)"
        } else {
            context
        };
        let prompt = EVOLVE_QUERY_PROMPT
            .replace("{context}", context)
            .replace("{query}", query);
        let evolved = self.chat(&prompt, 0.2).await?;
        Ok(evolved.trim().trim_matches('"').to_string())
    }

    async fn reason_from_context(
        &self,
        query: &str,
        items: &[String],
        summaries: &[String],
    ) -> Result<String, LlmError> {
        let prompt = REASON_PROMPT
            .replace("{query}", query)
            .replace("{items}", &bullet_list(items, "(none)"))
            .replace("{summaries}", &bullet_list(summaries, "(none)"));
        self.chat(&prompt, 0.5).await
    }

    async fn suggest_category(
        &self,
        fact: &str,
        candidates: &[String],
    ) -> Result<String, LlmError> {
        let prompt = SUGGEST_CATEGORY_PROMPT
            .replace("{fact}", fact)
            .replace("{candidates}", &bullet_list(candidates, "None useful found."));
        let path = self.chat(&prompt, 0.2).await?;
        Ok(path.trim().to_lowercase())
    }

    async fn summarize_category(&self, path: &str, items: &[String]) -> Result<String, LlmError> {
        let prompt = SUMMARIZE_CATEGORY_PROMPT
            .replace("{path}", path)
            .replace("{items}", &bullet_list(items, "(none)"));
        let summary = self.chat(&prompt, 0.3).await?;
        Ok(summary.trim().to_string())
    }

    async fn rate_importance(&self, content: &str) -> Result<f32, LlmError> {
        let prompt = RATE_IMPORTANCE_PROMPT.replace("{content}", content);
        let response = self.chat(&prompt, 0.0).await?;
        let rating = parse_rating(&response)
            .ok_or_else(|| LlmError::Parse(format!("No rating in response: {response}")))?;
        Ok(rating.clamp(1.0, 10.0) / 10.0)
    }

    async fn is_update_or_correction(
        &self,
        new_content: &str,
        old_content: &str,
    ) -> Result<Relationship, LlmError> {
        let prompt = RELATIONSHIP_PROMPT
            .replace("{new}", new_content)
            .replace("{old}", old_content);
        let verdict = self.chat(&prompt, 0.0).await?;
        Ok(Relationship::parse_verdict(&verdict))
    }

    async fn extract_triples(&self, text: &str) -> Result<Vec<ExtractedTriple>, LlmError> {
        let prompt = EXTRACT_TRIPLES_PROMPT.replace("{text}", text);
        let triples: Vec<ExtractedTriple> = self.chat_json(&prompt, 0.1).await?;
        Ok(triples
            .into_iter()
            .filter(|t| {
                !t.subject.trim().is_empty()
                    && !t.predicate.trim().is_empty()
                    && !t.object.trim().is_empty()
            })
            .collect())
    }

    async fn predict_next_intent(
        &self,
        context: &serde_json::Value,
        patterns: &[String],
    ) -> Result<String, LlmError> {
        let context = serde_json::to_string_pretty(context)
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let prompt = PREDICT_INTENT_PROMPT
            .replace("{context}", &context)
            .replace("{patterns}", &bullet_list(patterns, "(none)"));
        let prediction = self.chat(&prompt, 0.4).await?;
        Ok(prediction.trim().to_string())
    }

    async fn extract_enduring_facts(&self, transcript: &str) -> Result<String, LlmError> {
        let prompt = ENDURING_FACTS_PROMPT.replace("{transcript}", transcript);
        self.chat(&prompt, 0.2).await
    }

    async fn extract_profile_insights(
        &self,
        text: &str,
    ) -> Result<Vec<ProfileInsight>, LlmError> {
        let prompt = PROFILE_INSIGHTS_PROMPT.replace("{text}", text);
        self.chat_json(&prompt, 0.2).await
    }

    async fn generate_daily_reflection(
        &self,
        items: &[String],
        date: &str,
    ) -> Result<DailyReflection, LlmError> {
        let prompt = DAILY_REFLECTION_PROMPT
            .replace("{date}", date)
            .replace("{items}", &bullet_list(items, "(none)"));
        self.chat_json(&prompt, 0.4).await
    }

    async fn generate_weekly_summary(
        &self,
        daily_reflections: &[String],
        week: &str,
    ) -> Result<WeeklySummary, LlmError> {
        let prompt = WEEKLY_SUMMARY_PROMPT
            .replace("{week}", week)
            .replace("{items}", &bullet_list(daily_reflections, "(none)"));
        self.chat_json(&prompt, 0.4).await
    }

    async fn generate_monthly_summary(
        &self,
        weekly_summaries: &[String],
        month: &str,
    ) -> Result<MonthlySummary, LlmError> {
        let prompt = MONTHLY_SUMMARY_PROMPT
            .replace("{month}", month)
            .replace("{items}", &bullet_list(weekly_summaries, "(none)"));
        self.chat_json(&prompt, 0.4).await
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
