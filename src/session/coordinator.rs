//! Generation session coordinator.
//!
//! Owns the per-companion turn state machine:
//! Idle -> Generating -> (Completing | Cancelled | Failed) -> Idle.
//!
//! A turn either fully completes (text delivered, memory committed,
//! companion stats updated, in that order) or leaves no trace. The commit
//! runs while the companion's lock is still held, so the next turn always
//! observes the previous turn's committed effects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::companion::profile::Companion;
use crate::companion::registry::CompanionRegistry;
use crate::core::config::EngineConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::TurnId;
use crate::memory::record::{DEFAULT_IMPORTANCE, MemoryRecord};
use crate::memory::store::MemoryStore;
use crate::prompt::assembler::{PromptInputs, PromptSpec, assemble, exchange_record};
use crate::providers::embedding::EmbeddingProvider;
use crate::providers::generation::{GenerationProvider, SentimentEstimate};
use crate::session::lock::{CompanionLocks, SessionGuard};
use crate::session::turn::ConversationTurn;

/// Category tag for committed exchange memories.
const EXCHANGE_CATEGORY: &str = "conversation";

/// Buffer size for streaming chunk delivery.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Number of follow-up suggestions requested per turn.
const SUGGESTION_COUNT: usize = 3;

/// A chat request for one turn.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Target companion.
    pub companion_id: crate::core::ids::CompanionId,
    /// Incoming user message.
    pub message: String,
    /// Recent conversation window, oldest first.
    pub history: Vec<ConversationTurn>,
    /// Optional external context rendered verbatim into the prompt.
    pub context: Option<serde_json::Value>,
}

/// A completed non-streaming turn.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    /// Generated text.
    pub text: String,
    /// Emotion label for the turn.
    pub emotion: String,
    /// Best-effort follow-up suggestions, possibly empty.
    pub suggestions: Vec<String>,
    /// Tokens consumed by the generation call.
    pub tokens_used: u32,
    /// Wall-clock processing time.
    pub processing_time_ms: u64,
    /// Identifier of the committed turn.
    pub turn_id: TurnId,
}

/// Event emitted on the streaming chat channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatStreamEvent {
    /// An incremental text fragment.
    Chunk {
        /// Fragment content.
        content: String,
    },
    /// Terminal success event; the turn has been committed.
    Complete,
    /// Terminal failure event; nothing was committed.
    Error {
        /// Machine-readable error code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },
}

/// Handle to an in-flight streaming turn.
pub struct ChatTurnStream {
    /// Event stream: zero or more chunks, then one terminal event.
    pub events: ReceiverStream<ChatStreamEvent>,
    /// Cancels the turn; no memory is committed after cancellation.
    pub cancel: CancellationToken,
}

/// Coordinator for generation sessions.
#[derive(Clone)]
pub struct SessionCoordinator {
    registry: Arc<CompanionRegistry>,
    memory: Arc<dyn MemoryStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    generation: Arc<dyn GenerationProvider>,
    locks: CompanionLocks,
    config: EngineConfig,
}

impl SessionCoordinator {
    /// Create a coordinator over explicitly injected components.
    #[must_use]
    pub fn new(
        registry: Arc<CompanionRegistry>,
        memory: Arc<dyn MemoryStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            memory,
            embedding,
            generation,
            locks: CompanionLocks::new(),
            config,
        }
    }

    /// Run one non-streaming turn.
    ///
    /// Cancellation is cooperative: dropping the returned future before it
    /// resolves releases the lock and commits nothing.
    ///
    /// # Errors
    /// `NotFound` for unknown or inactive companions, `Validation` for an
    /// empty message, `Busy` under lock contention, and provider-layer
    /// errors (`Embedding`/`Generation`/`Timeout`) when the turn fails.
    pub async fn chat(&self, request: ChatRequest) -> EngineResult<ChatResponse> {
        let started = Instant::now();
        let companion = self.lookup_active(&request).await?;
        let guard = self.locks.try_acquire(companion.id)?;

        let prompt = self.prepare(&companion, &request).await?;
        let output = timeout(
            Duration::from_secs(self.config.generation.timeout_seconds),
            self.generation.generate(
                &prompt.text,
                self.config.generation.max_tokens,
                self.config.generation.temperature,
            ),
        )
        .await
        .map_err(|_| EngineError::Timeout("generation"))??;

        let turn_id = TurnId::new();
        let sentiment = self
            .complete_turn(&companion, turn_id, &request.message, &output.text)
            .await;
        let suggestions = self.suggest(&companion, &request.message, &output.text).await;
        drop(guard);

        info!(companion = %companion.id, %turn_id, "Completed turn");
        Ok(ChatResponse {
            text: output.text,
            emotion: sentiment.dominant_emotion(),
            suggestions,
            tokens_used: output.tokens_used,
            processing_time_ms: started.elapsed().as_millis() as u64,
            turn_id,
        })
    }

    /// Start one streaming turn.
    ///
    /// Pre-flight failures (`NotFound`, `Validation`, `Busy`) are returned
    /// directly; once the stream is handed out, failures arrive as a
    /// terminal [`ChatStreamEvent::Error`]. Firing the cancellation token,
    /// or dropping the event stream, aborts the turn with no commit.
    ///
    /// # Errors
    /// See [`Self::chat`] for the pre-flight error set.
    pub async fn chat_stream(&self, request: ChatRequest) -> EngineResult<ChatTurnStream> {
        let companion = self.lookup_active(&request).await?;
        let guard = self.locks.try_acquire(companion.id)?;
        let cancel = guard.cancel_token();

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            this.run_stream_turn(guard, companion, request, tx).await;
        });

        Ok(ChatTurnStream {
            events: ReceiverStream::new(rx),
            cancel,
        })
    }

    /// Whether a generation is in flight for the companion.
    #[must_use]
    pub fn is_busy(&self, companion_id: crate::core::ids::CompanionId) -> bool {
        self.locks.is_busy(companion_id)
    }

    async fn lookup_active(&self, request: &ChatRequest) -> EngineResult<Companion> {
        if request.message.trim().is_empty() {
            return Err(EngineError::Validation(
                "message must not be empty".to_string(),
            ));
        }

        let companion = self.registry.get(request.companion_id).await?;
        if !companion.active {
            // Conversationally absent; memories remain.
            return Err(EngineError::NotFound(companion.id));
        }
        Ok(companion)
    }

    /// The Generating prologue: embed the message, retrieve context,
    /// assemble the prompt. Embedding failure is fatal to the turn;
    /// retrieval failure degrades to an empty memory context.
    async fn prepare(
        &self,
        companion: &Companion,
        request: &ChatRequest,
    ) -> EngineResult<PromptSpec> {
        let query_embedding = timeout(
            Duration::from_secs(self.config.embedding.timeout_seconds),
            self.embedding.embed(&request.message),
        )
        .await
        .map_err(|_| EngineError::Timeout("embedding"))??;

        let memories = match self
            .memory
            .retrieve(
                companion.id,
                query_embedding,
                self.config.retrieval.top_k,
                Utc::now(),
            )
            .await
        {
            Ok(memories) => memories,
            Err(err) => {
                warn!(companion = %companion.id, ?err, "Memory retrieval failed; continuing without context");
                Vec::new()
            }
        };

        let inputs = PromptInputs {
            companion: companion.clone(),
            memories,
            recent_turns: request.history.clone(),
            external_context: request.context.clone(),
            user_message: request.message.clone(),
        };
        Ok(assemble(
            inputs,
            &self.config.prompt,
            self.config.conversation.window,
        ))
    }

    async fn run_stream_turn(
        &self,
        guard: SessionGuard,
        companion: Companion,
        request: ChatRequest,
        tx: mpsc::Sender<ChatStreamEvent>,
    ) {
        let cancel = guard.cancel_token();

        let prompt = match self.prepare(&companion, &request).await {
            Ok(prompt) => prompt,
            Err(err) => {
                Self::send_error(&tx, &err).await;
                return;
            }
        };

        let stream = match self
            .generation
            .stream_generate(&prompt.text, self.config.generation.temperature)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                Self::send_error(&tx, &err).await;
                return;
            }
        };
        let mut stream = stream;

        let deadline = tokio::time::sleep(Duration::from_secs(
            self.config.generation.timeout_seconds,
        ));
        tokio::pin!(deadline);

        let mut buffer = String::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // The provider stream is dropped with the turn; no commit.
                    debug!(companion = %companion.id, "Turn cancelled mid-stream");
                    return;
                }
                () = &mut deadline => {
                    Self::send_error(&tx, &EngineError::Timeout("generation")).await;
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&chunk.content);
                        if !chunk.content.is_empty() {
                            let event = ChatStreamEvent::Chunk {
                                content: chunk.content,
                            };
                            if tx.send(event).await.is_err() {
                                // Receiver gone: caller disconnected.
                                debug!(companion = %companion.id, "Stream receiver dropped; cancelling turn");
                                cancel.cancel();
                                return;
                            }
                        }
                        if chunk.finished {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        Self::send_error(&tx, &err).await;
                        return;
                    }
                    None => {
                        let err = EngineError::Generation(
                            "stream ended without a terminal chunk".to_string(),
                        );
                        Self::send_error(&tx, &err).await;
                        return;
                    }
                }
            }
        }

        let turn_id = TurnId::new();
        self.complete_turn(&companion, turn_id, &request.message, &buffer)
            .await;
        let _ = tx.send(ChatStreamEvent::Complete).await;
        info!(companion = %companion.id, %turn_id, "Completed streamed turn");
        drop(guard);
    }

    /// The Completing phase, entered only after the full response text is
    /// known. Steps run in order; a failed memory write never withholds the
    /// already-delivered response, and a failed stat update is logged.
    async fn complete_turn(
        &self,
        companion: &Companion,
        turn_id: TurnId,
        user_message: &str,
        response_text: &str,
    ) -> SentimentEstimate {
        let sentiment = match timeout(
            Duration::from_secs(self.config.generation.sentiment_timeout_seconds),
            self.generation.analyze_sentiment(user_message),
        )
        .await
        {
            Ok(Ok(estimate)) => estimate,
            Ok(Err(err)) => {
                debug!(companion = %companion.id, ?err, "Sentiment analysis failed; using neutral");
                SentimentEstimate::neutral()
            }
            Err(_) => {
                debug!(companion = %companion.id, "Sentiment analysis timed out; using neutral");
                SentimentEstimate::neutral()
            }
        };

        if let Err(err) = self
            .write_exchange(companion, turn_id, user_message, response_text, &sentiment)
            .await
        {
            error!(companion = %companion.id, %turn_id, ?err, "Memory commit failed after delivered response");
        }

        if let Err(err) = self.registry.record_turn(companion.id, turn_id).await {
            error!(companion = %companion.id, %turn_id, ?err, "Companion stat update failed");
        }

        sentiment
    }

    async fn write_exchange(
        &self,
        companion: &Companion,
        turn_id: TurnId,
        user_message: &str,
        response_text: &str,
        sentiment: &SentimentEstimate,
    ) -> EngineResult<()> {
        let content = exchange_record(&companion.name, user_message, response_text);
        let embedding = timeout(
            Duration::from_secs(self.config.embedding.timeout_seconds),
            self.embedding.embed(&content),
        )
        .await
        .map_err(|_| EngineError::Timeout("embedding"))??;

        let metadata = serde_json::json!({
            "turn_id": turn_id,
            "sentiment": sentiment,
        });
        let record = MemoryRecord::new(
            companion.id,
            content,
            embedding,
            DEFAULT_IMPORTANCE,
            Some(EXCHANGE_CATEGORY.to_string()),
            metadata,
            None,
        )?;
        self.memory.insert(record).await
    }

    /// Tertiary best-effort follow-up suggestions; never fails the turn.
    async fn suggest(
        &self,
        companion: &Companion,
        user_message: &str,
        response_text: &str,
    ) -> Vec<String> {
        let prompt = format!(
            "The user said: {user_message}\n{} replied: {response_text}\n\
             Suggest {SUGGESTION_COUNT} short follow-up messages the user might \
             send next, one per line, without numbering.",
            companion.name
        );
        let result = timeout(
            Duration::from_secs(self.config.generation.suggestion_timeout_seconds),
            self.generation.generate(&prompt, 96, 0.8),
        )
        .await;

        match result {
            Ok(Ok(output)) => output
                .text
                .lines()
                .map(|line| line.trim_start_matches(['-', '*', ' ']).trim())
                .filter(|line| !line.is_empty())
                .take(SUGGESTION_COUNT)
                .map(str::to_string)
                .collect(),
            Ok(Err(err)) => {
                debug!(companion = %companion.id, ?err, "Suggestion generation failed");
                Vec::new()
            }
            Err(_) => {
                debug!(companion = %companion.id, "Suggestion generation timed out");
                Vec::new()
            }
        }
    }

    async fn send_error(tx: &mpsc::Sender<ChatStreamEvent>, err: &EngineError) {
        let _ = tx
            .send(ChatStreamEvent::Error {
                code: err.code(),
                message: err.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::store::InMemoryCompanionStore;
    use crate::companion::traits::PersonalityTraits;
    use crate::core::ids::{CompanionId, OwnerId};
    use crate::memory::mem_store::InMemoryMemoryStore;
    use crate::memory::ranking::RankedMemory;
    use crate::memory::store::{DecayParams, StoreFuture};
    use crate::providers::embedding::EmbedFuture;
    use crate::providers::generation::{GenFuture, GenerationChunk, GenerationOutput, GenerationStream};
    use chrono::{DateTime, Utc};

    struct MockEmbedding;

    impl EmbeddingProvider for MockEmbedding {
        fn embed(&self, text: &str) -> EmbedFuture<'_, EngineResult<Vec<f32>>> {
            let len = text.len() as f32;
            Box::pin(async move { Ok(vec![1.0, len % 7.0, 0.5]) })
        }

        fn ndims(&self) -> usize {
            3
        }
    }

    /// Scripted generation provider for fault injection.
    struct ScriptedGeneration {
        gen_delay: Duration,
        gen_fails: bool,
        chunk_delay: Duration,
        stream_script: Vec<Result<(String, bool), String>>,
        sentiment_fails: bool,
    }

    impl Default for ScriptedGeneration {
        fn default() -> Self {
            Self {
                gen_delay: Duration::ZERO,
                gen_fails: false,
                chunk_delay: Duration::ZERO,
                stream_script: vec![
                    Ok(("I like ".to_string(), false)),
                    Ok(("blue.".to_string(), false)),
                    Ok((String::new(), true)),
                ],
                sentiment_fails: false,
            }
        }
    }

    impl GenerationProvider for ScriptedGeneration {
        fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> GenFuture<'_, EngineResult<GenerationOutput>> {
            let delay = self.gen_delay;
            let fails = self.gen_fails;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fails {
                    return Err(EngineError::Generation("upstream failure".to_string()));
                }
                Ok(GenerationOutput {
                    text: "I like blue, like the evening sky.".to_string(),
                    tokens_used: 9,
                })
            })
        }

        fn stream_generate(
            &self,
            _prompt: &str,
            _temperature: f64,
        ) -> GenFuture<'_, EngineResult<GenerationStream>> {
            let delay = self.chunk_delay;
            let script = self.stream_script.clone();
            Box::pin(async move {
                let stream = futures::stream::iter(script.into_iter()).then(move |item| {
                    Box::pin(async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        match item {
                            Ok((content, finished)) => Ok(GenerationChunk { content, finished }),
                            Err(message) => Err(EngineError::Generation(message)),
                        }
                    })
                });
                Ok(Box::pin(stream) as GenerationStream)
            })
        }

        fn analyze_sentiment(&self, _text: &str) -> GenFuture<'_, EngineResult<SentimentEstimate>> {
            let fails = self.sentiment_fails;
            Box::pin(async move {
                if fails {
                    return Err(EngineError::Generation("sentiment down".to_string()));
                }
                Ok(SentimentEstimate {
                    sentiment: "positive".to_string(),
                    intensity: 0.7,
                    emotions: vec!["curiosity".to_string()],
                })
            })
        }
    }

    /// Memory store whose writes always fail; reads are empty.
    struct FailingMemoryStore;

    impl MemoryStore for FailingMemoryStore {
        fn insert(&self, _record: MemoryRecord) -> StoreFuture<'_, EngineResult<()>> {
            Box::pin(async { Err(EngineError::Storage("disk full".to_string())) })
        }

        fn retrieve(
            &self,
            _companion_id: CompanionId,
            _query_embedding: Vec<f32>,
            _k: usize,
            _now: DateTime<Utc>,
        ) -> StoreFuture<'_, EngineResult<Vec<RankedMemory>>> {
            Box::pin(async { Err(EngineError::Storage("disk full".to_string())) })
        }

        fn decay(
            &self,
            _companion_id: CompanionId,
            _params: DecayParams,
            _now: DateTime<Utc>,
        ) -> StoreFuture<'_, EngineResult<usize>> {
            Box::pin(async { Ok(0) })
        }

        fn purge_expired(&self, _now: DateTime<Utc>) -> StoreFuture<'_, EngineResult<usize>> {
            Box::pin(async { Ok(0) })
        }

        fn count(&self, _companion_id: CompanionId) -> StoreFuture<'_, EngineResult<u64>> {
            Box::pin(async { Ok(0) })
        }

        fn companion_ids(&self) -> StoreFuture<'_, EngineResult<Vec<CompanionId>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    struct World {
        coordinator: SessionCoordinator,
        registry: Arc<CompanionRegistry>,
    }

    async fn build_world(
        generation: Arc<ScriptedGeneration>,
        memory: Arc<dyn MemoryStore>,
        config: EngineConfig,
    ) -> (World, Companion) {
        let registry = Arc::new(
            CompanionRegistry::new(Arc::new(InMemoryCompanionStore::new()), generation.clone())
                .unwrap(),
        );
        let traits = PersonalityTraits::new(0.9, 0.8, 0.4, 0.4).unwrap();
        let companion = registry
            .create(OwnerId::new(), "Nova", traits, vec!["stars".to_string()])
            .await
            .unwrap();

        let coordinator = SessionCoordinator::new(
            registry.clone(),
            memory.clone(),
            Arc::new(MockEmbedding),
            generation,
            config,
        );
        (
            World {
                coordinator,
                registry,
            },
            companion,
        )
    }

    fn request(companion_id: CompanionId, message: &str) -> ChatRequest {
        ChatRequest {
            companion_id,
            message: message.to_string(),
            history: Vec::new(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_first_turn_scenario() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;
        assert_eq!(companion.interaction_count, 0);

        let response = world
            .coordinator
            .chat(request(companion.id, "What's your favorite color?"))
            .await
            .unwrap();
        assert_eq!(response.text, "I like blue, like the evening sky.");
        assert_eq!(response.emotion, "curiosity");
        assert!(!response.suggestions.is_empty());
        assert_eq!(response.tokens_used, 9);

        assert_eq!(memory.count(companion.id).await.unwrap(), 1);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 1);
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_concurrent_requests_yield_exactly_one_busy() {
        let generation = Arc::new(ScriptedGeneration {
            gen_delay: Duration::from_millis(100),
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let (a, b) = tokio::join!(
            world.coordinator.chat(request(companion.id, "hello")),
            world.coordinator.chat(request(companion.id, "hello again")),
        );

        let busy_count = [&a, &b]
            .iter()
            .filter(|result| matches!(result, Err(EngineError::Busy)))
            .count();
        let ok_count = [&a, &b].iter().filter(|result| result.is_ok()).count();
        assert_eq!(busy_count, 1);
        assert_eq!(ok_count, 1);

        // Only the successful turn committed.
        assert_eq!(memory.count(companion.id).await.unwrap(), 1);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_stream_commits_nothing() {
        let generation = Arc::new(ScriptedGeneration {
            chunk_delay: Duration::from_millis(30),
            stream_script: vec![
                Ok(("one ".to_string(), false)),
                Ok(("two ".to_string(), false)),
                Ok(("three ".to_string(), false)),
                Ok(("four".to_string(), false)),
                Ok((String::new(), true)),
            ],
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let mut turn = world
            .coordinator
            .chat_stream(request(companion.id, "tell me a story"))
            .await
            .unwrap();

        // Observe one chunk, then cancel mid-stream.
        let first = turn.events.next().await.unwrap();
        assert!(matches!(first, ChatStreamEvent::Chunk { .. }));
        turn.cancel.cancel();

        // Drain whatever remains; no Complete must arrive.
        while let Some(event) = turn.events.next().await {
            assert!(!matches!(event, ChatStreamEvent::Complete));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(memory.count(companion.id).await.unwrap(), 0);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 0);
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_fault_injected_stream_reports_error_and_commits_nothing() {
        let generation = Arc::new(ScriptedGeneration {
            stream_script: vec![
                Ok(("one ".to_string(), false)),
                Ok(("two ".to_string(), false)),
                Err("upstream reset".to_string()),
            ],
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let turn = world
            .coordinator
            .chat_stream(request(companion.id, "tell me a story"))
            .await
            .unwrap();
        let events: Vec<ChatStreamEvent> = turn.events.collect().await;

        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, ChatStreamEvent::Chunk { .. }))
                .count(),
            2
        );
        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::Error { code: "GenerationFailure", .. })
        ));

        assert_eq!(memory.count(companion.id).await.unwrap(), 0);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 0);
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_completed_stream_commits_once() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let turn = world
            .coordinator
            .chat_stream(request(companion.id, "what do you like?"))
            .await
            .unwrap();
        let events: Vec<ChatStreamEvent> = turn.events.collect().await;
        assert!(matches!(events.last(), Some(ChatStreamEvent::Complete)));

        assert_eq!(memory.count(companion.id).await.unwrap(), 1);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 1);

        // The committed memory carries the buffered full text.
        let hits = memory
            .retrieve(companion.id, vec![1.0, 0.0, 0.5], 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].record.content.contains("I like blue."));
        assert!(hits[0].record.content.starts_with("User said: what do you like?"));
    }

    #[tokio::test]
    async fn test_provider_failure_commits_nothing() {
        let generation = Arc::new(ScriptedGeneration {
            gen_fails: true,
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let result = world.coordinator.chat(request(companion.id, "hello")).await;
        assert!(matches!(result, Err(EngineError::Generation(_))));
        assert_eq!(memory.count(companion.id).await.unwrap(), 0);
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 0);
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_generation_timeout_is_typed() {
        let generation = Arc::new(ScriptedGeneration {
            gen_delay: Duration::from_secs(3),
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let mut config = EngineConfig::default();
        config.generation.timeout_seconds = 1;
        let (world, companion) = build_world(generation, memory.clone(), config).await;

        let result = world.coordinator.chat(request(companion.id, "hello")).await;
        assert!(matches!(result, Err(EngineError::Timeout("generation"))));
        assert_eq!(memory.count(companion.id).await.unwrap(), 0);
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_storage_failure_degrades_but_response_survives() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(FailingMemoryStore);
        let (world, companion) = build_world(generation, memory, EngineConfig::default()).await;

        let response = world
            .coordinator
            .chat(request(companion.id, "hello"))
            .await
            .unwrap();
        assert_eq!(response.text, "I like blue, like the evening sky.");

        // The stat update still ran despite the failed memory write.
        let reloaded = world.registry.get(companion.id).await.unwrap();
        assert_eq!(reloaded.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_sentiment_failure_downgrades_to_neutral() {
        let generation = Arc::new(ScriptedGeneration {
            sentiment_fails: true,
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory.clone(), EngineConfig::default()).await;

        let response = world
            .coordinator
            .chat(request(companion.id, "hello"))
            .await
            .unwrap();
        assert_eq!(response.emotion, "neutral");
        // The turn still committed.
        assert_eq!(memory.count(companion.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_before_lock() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory, EngineConfig::default()).await;

        let result = world.coordinator.chat(request(companion.id, "   ")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(!world.coordinator.is_busy(companion.id));
    }

    #[tokio::test]
    async fn test_unknown_companion_is_not_found() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, _companion) =
            build_world(generation, memory, EngineConfig::default()).await;

        let result = world
            .coordinator
            .chat(request(CompanionId::new(), "hello"))
            .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_companion_is_not_found() {
        let generation = Arc::new(ScriptedGeneration::default());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory, EngineConfig::default()).await;

        world.registry.deactivate(companion.id).await.unwrap();
        let result = world.coordinator.chat(request(companion.id, "hello")).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_busy_while_streaming() {
        let generation = Arc::new(ScriptedGeneration {
            chunk_delay: Duration::from_millis(50),
            ..ScriptedGeneration::default()
        });
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let (world, companion) =
            build_world(generation, memory, EngineConfig::default()).await;

        let turn = world
            .coordinator
            .chat_stream(request(companion.id, "long story please"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = world.coordinator.chat(request(companion.id, "hello")).await;
        assert!(matches!(result, Err(EngineError::Busy)));

        let events: Vec<ChatStreamEvent> = turn.events.collect().await;
        assert!(matches!(events.last(), Some(ChatStreamEvent::Complete)));
        assert!(!world.coordinator.is_busy(companion.id));
    }
}
