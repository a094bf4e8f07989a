//! Generation provider abstraction and Ollama implementation.
//!
//! Exposes single-shot generation, a finite non-restartable token stream,
//! and a secondary sentiment-analysis call. Streaming uses Ollama's NDJSON
//! framing over `POST /api/generate` with `stream: true`.

use std::future::Future;
use std::pin::Pin;

use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::GenerationConfig;
use crate::core::errors::{EngineError, EngineResult};

/// Boxed future type for generation operations.
pub type GenFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A finite stream of generation chunks. Not restartable: a retry must
/// request a new stream.
pub type GenerationStream = Pin<Box<dyn Stream<Item = EngineResult<GenerationChunk>> + Send>>;

/// Output of a single-shot generation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Generated text.
    pub text: String,
    /// Tokens consumed by the call, when the provider reports them.
    pub tokens_used: u32,
}

/// One incremental fragment of generated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationChunk {
    /// Text fragment, possibly empty on the terminal chunk.
    pub content: String,
    /// True exactly once, on the terminal chunk.
    pub finished: bool,
}

/// Sentiment estimate for a piece of text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentimentEstimate {
    /// Overall polarity label, e.g. "positive" | "neutral" | "negative".
    pub sentiment: String,
    /// Strength of the sentiment in [0, 1].
    pub intensity: f64,
    /// Dominant emotions, most salient first.
    pub emotions: Vec<String>,
}

impl SentimentEstimate {
    /// The neutral default used when the sentiment call fails.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            sentiment: "neutral".to_string(),
            intensity: 0.0,
            emotions: Vec::new(),
        }
    }

    /// The most salient emotion, falling back to the polarity label.
    #[must_use]
    pub fn dominant_emotion(&self) -> String {
        self.emotions
            .first()
            .cloned()
            .unwrap_or_else(|| self.sentiment.clone())
    }
}

/// Trait abstraction over generation models.
pub trait GenerationProvider: Send + Sync {
    /// Generate a complete response for a prompt.
    ///
    /// # Errors
    /// Returns a generation failure if the request fails.
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> GenFuture<'_, EngineResult<GenerationOutput>>;

    /// Open a token stream for a prompt.
    ///
    /// # Errors
    /// Returns a generation failure if the stream cannot be opened.
    fn stream_generate(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> GenFuture<'_, EngineResult<GenerationStream>>;

    /// Estimate the sentiment of a text.
    ///
    /// # Errors
    /// Returns a generation failure if the request fails or the estimate
    /// cannot be parsed.
    fn analyze_sentiment(&self, text: &str) -> GenFuture<'_, EngineResult<SentimentEstimate>>;
}

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    done: bool,
}

/// Ollama generation provider over `POST /api/generate`.
#[derive(Clone)]
pub struct OllamaGenerationProvider {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OllamaGenerationProvider {
    /// Create a new Ollama generation provider from config.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &GenerationConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn post_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stream: bool,
    ) -> EngineResult<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature,
            },
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| EngineError::Generation(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Generation(format!(
                "generation endpoint returned {status}"
            )));
        }

        Ok(response)
    }
}

impl GenerationProvider for OllamaGenerationProvider {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> GenFuture<'_, EngineResult<GenerationOutput>> {
        let prompt = prompt.to_string();
        Box::pin(async move {
            let response = self
                .post_generate(&prompt, max_tokens, temperature, false)
                .await?;
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|err| EngineError::Generation(err.to_string()))?;

            let text = parsed
                .response
                .ok_or_else(|| EngineError::Generation("missing response field".to_string()))?;
            Ok(GenerationOutput {
                text,
                tokens_used: parsed.eval_count.unwrap_or(0),
            })
        })
    }

    fn stream_generate(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> GenFuture<'_, EngineResult<GenerationStream>> {
        let prompt = prompt.to_string();
        Box::pin(async move {
            let response = self
                .post_generate(&prompt, self.max_tokens, temperature, true)
                .await?;

            // NDJSON: one JSON object per line, `done: true` on the last.
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| EngineError::Generation(err.to_string())))
                .scan(Vec::new(), |buffer, chunk| {
                    let chunks = match chunk {
                        Ok(bytes) => {
                            buffer.extend_from_slice(&bytes);
                            let mut out = Vec::new();
                            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                                let line: Vec<u8> = buffer.drain(..=pos).collect();
                                let line = String::from_utf8_lossy(&line);
                                let line = line.trim();
                                if line.is_empty() {
                                    continue;
                                }
                                out.push(parse_stream_line(line));
                            }
                            out
                        }
                        Err(err) => vec![Err(err)],
                    };
                    futures::future::ready(Some(futures::stream::iter(chunks)))
                })
                .flatten();

            Ok(Box::pin(stream) as GenerationStream)
        })
    }

    fn analyze_sentiment(&self, text: &str) -> GenFuture<'_, EngineResult<SentimentEstimate>> {
        let prompt = format!(
            "Classify the sentiment of the following message. Answer with a single \
             JSON object of the form {{\"sentiment\": \"positive|neutral|negative\", \
             \"intensity\": 0.0, \"emotions\": [\"...\"]}} and nothing else.\n\n\
             Message: {text}"
        );
        Box::pin(async move {
            let response = self.post_generate(&prompt, 128, 0.0, false).await?;
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|err| EngineError::Generation(err.to_string()))?;
            let raw = parsed
                .response
                .ok_or_else(|| EngineError::Generation("missing response field".to_string()))?;
            parse_sentiment_json(&raw)
        })
    }
}

fn parse_stream_line(line: &str) -> EngineResult<GenerationChunk> {
    let parsed: GenerateResponse =
        serde_json::from_str(line).map_err(|err| EngineError::Generation(err.to_string()))?;
    Ok(GenerationChunk {
        content: parsed.response.unwrap_or_default(),
        finished: parsed.done,
    })
}

/// Extract the sentiment object from a model answer, tolerating prose
/// around the JSON.
fn parse_sentiment_json(raw: &str) -> EngineResult<SentimentEstimate> {
    let start = raw
        .find('{')
        .ok_or_else(|| EngineError::Generation("no JSON object in sentiment answer".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| EngineError::Generation("no JSON object in sentiment answer".to_string()))?;
    if end < start {
        return Err(EngineError::Generation(
            "malformed sentiment answer".to_string(),
        ));
    }

    let estimate: SentimentEstimate = serde_json::from_str(&raw[start..=end])
        .map_err(|err| EngineError::Generation(err.to_string()))?;
    Ok(estimate)
}
