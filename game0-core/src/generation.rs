//! Generation attempt orchestration.
//!
//! One attempt per completed assistant turn: open the generation endpoint,
//! stream fragments into a fresh buffer, then extract and wrap the game. At
//! most one attempt is in flight, and a turn id never triggers twice.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::buffer::{IncrementalBuffer, Progress};
use crate::config::Config;
use crate::document::ExtractedGame;
use crate::error::{CoreResult, Game0Error};
use crate::extract::ExtractionKind;
use crate::http_client::{HttpClient, RequestCtx, ResponseBody};
use crate::model::{AssistantTurn, Conversation, GenerationRequest};
use crate::normalizer::normalize_conversation;
use crate::prompt::{PromptCache, PROMPT_CODE_GENERATION};
use crate::stream::FragmentStream;
use crate::telemetry::{self, GenerationLog};

/// Opens the streaming generation response for a request.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Used for logs and telemetry.
    fn endpoint(&self) -> &str;
    async fn open(&self, request: &GenerationRequest, ctx: &RequestCtx<'_>) -> CoreResult<ResponseBody>;
}

#[derive(Debug, Clone)]
pub struct HttpGenerationBackend {
    http: HttpClient,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpGenerationBackend {
    pub fn new(http: HttpClient, url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key,
        }
    }

    pub fn from_config(cfg: &Config, http: HttpClient) -> Self {
        let key = cfg
            .endpoints
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(SecretString::from);
        Self::new(http, cfg.endpoints.generate_url.clone(), key)
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn open(&self, request: &GenerationRequest, ctx: &RequestCtx<'_>) -> CoreResult<ResponseBody> {
        let auth = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|v| vec![("Authorization", v)])
            .unwrap_or_default();
        self.http.post_stream(&self.url, request, &headers, ctx).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptInfo {
    pub attempt_id: String,
    pub turn_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// This turn id already triggered an attempt.
    DuplicateTurn,
    /// Another attempt is in flight.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed(ExtractedGame),
    /// The stream ended without anything extractable.
    NoGame,
    Cancelled,
    Skipped(SkipReason),
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::NoGame => "no_game",
            Self::Cancelled => "cancelled",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Receives attempt events as they happen. All hooks default to no-ops.
pub trait GenerationObserver: Send {
    fn on_start(&mut self, _attempt: &AttemptInfo) {}
    fn on_delta(&mut self, _delta: &str) {}
    fn on_progress(&mut self, _progress: Progress) {}
    fn on_finish(&mut self, _outcome: &AttemptOutcome) {}
    /// The attempt failed; `on_finish` is not called.
    fn on_error(&mut self, _error: &Game0Error) {}
}

impl GenerationObserver for () {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationStatus {
    pub generating: bool,
    pub progress: Progress,
    pub document: Option<ExtractedGame>,
}

struct ActiveAttempt {
    attempt_id: String,
    turn_id: String,
    started: Instant,
    token: CancellationToken,
}

#[derive(Default)]
struct GeneratorState {
    active: Option<ActiveAttempt>,
    last_turn_id: Option<String>,
    progress: Progress,
    latest: Option<ExtractedGame>,
}

/// Clears the active slot on every exit path, including a dropped future,
/// but only while this attempt still owns it.
struct ActiveGuard {
    state: Arc<Mutex<GeneratorState>>,
    attempt_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st
            .active
            .as_ref()
            .is_some_and(|a| a.attempt_id == self.attempt_id)
        {
            st.active = None;
        }
    }
}

/// Drives generation attempts. Clones share state.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    prompts: Option<Arc<PromptCache>>,
    max_lines: Option<usize>,
    state: Arc<Mutex<GeneratorState>>,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            prompts: None,
            max_lines: None,
            state: Arc::new(Mutex::new(GeneratorState::default())),
        }
    }

    /// Send the code-generation system prompt from `prompts` with each request.
    pub fn with_prompts(mut self, prompts: Arc<PromptCache>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Soft line cap for the attempt buffer.
    pub fn with_max_lines(mut self, max_lines: Option<usize>) -> Self {
        self.max_lines = max_lines;
        self
    }

    fn lock(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> GenerationStatus {
        let st = self.lock();
        GenerationStatus {
            generating: st.active.is_some(),
            progress: st.progress,
            document: st.latest.clone(),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn latest_game(&self) -> Option<ExtractedGame> {
        self.lock().latest.clone()
    }

    /// Cancel the in-flight attempt, if any. The in-progress flag clears immediately.
    pub fn cancel(&self) -> bool {
        let Some(active) = self.lock().active.take() else {
            return false;
        };
        active.token.cancel();
        tracing::info!(
            turn.id = %active.turn_id,
            attempt.id = %active.attempt_id,
            elapsed_ms = active.started.elapsed().as_millis() as u64,
            "generation cancelled"
        );
        true
    }

    /// Entry point for the assistant-turn-completed event.
    ///
    /// `conversation` is the history the turn belongs to. The request carries
    /// it up to and including the turn; the turn is appended when missing.
    pub async fn on_turn_completed<O>(
        &self,
        turn: &AssistantTurn,
        conversation: Conversation,
        observer: &mut O,
    ) -> CoreResult<AttemptOutcome>
    where
        O: GenerationObserver + ?Sized,
    {
        let attempt_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        {
            let mut st = self.lock();
            if st.last_turn_id.as_deref() == Some(turn.id.as_str()) {
                tracing::debug!(turn.id = %turn.id, "turn already triggered generation");
                return Ok(AttemptOutcome::Skipped(SkipReason::DuplicateTurn));
            }
            if let Some(active) = &st.active {
                tracing::debug!(
                    turn.id = %turn.id,
                    active_attempt = %active.attempt_id,
                    "generation already in progress"
                );
                return Ok(AttemptOutcome::Skipped(SkipReason::Busy));
            }
            st.last_turn_id = Some(turn.id.clone());
            st.progress = Progress::default();
            st.active = Some(ActiveAttempt {
                attempt_id: attempt_id.clone(),
                turn_id: turn.id.clone(),
                started: Instant::now(),
                token: token.clone(),
            });
        }
        let _guard = ActiveGuard {
            state: self.state.clone(),
            attempt_id: attempt_id.clone(),
        };

        let mut messages = conversation;
        match messages.iter().position(|m| m.id == turn.id) {
            Some(i) => messages.truncate(i + 1),
            None => messages.push(turn.clone().into_message()),
        }

        let span = tracing::info_span!(
            "generation_attempt",
            turn.id = %turn.id,
            attempt.id = %attempt_id,
            generation.bytes = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let info = AttemptInfo {
            attempt_id,
            turn_id: turn.id.clone(),
        };
        self.run_attempt(info, messages, token, observer)
            .instrument(span)
            .await
    }

    async fn run_attempt<O>(
        &self,
        info: AttemptInfo,
        messages: Conversation,
        token: CancellationToken,
        observer: &mut O,
    ) -> CoreResult<AttemptOutcome>
    where
        O: GenerationObserver + ?Sized,
    {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let t0 = Instant::now();
        tracing::info!(endpoint = self.backend.endpoint(), "generation started");
        observer.on_start(&info);

        let mut buffer = IncrementalBuffer::new(self.max_lines);
        let result = self
            .stream_into(&info, messages, &token, &mut buffer, observer)
            .await;

        let progress = buffer.progress();
        let span = tracing::Span::current();
        span.record("generation.bytes", progress.bytes);
        let mut log = GenerationLog::new()
            .turn_id(&info.turn_id)
            .attempt_id(&info.attempt_id)
            .endpoint_opt(Some(self.backend.endpoint()))
            .started_at_ms(started_at_ms)
            .latency_ms(t0.elapsed().as_millis() as u64)
            .progress(progress.bytes, progress.lines);

        match &result {
            Ok(outcome) => {
                span.record("outcome", outcome.label());
                let extraction = match outcome {
                    AttemptOutcome::Completed(game) => Some(match game.kind() {
                        ExtractionKind::Fenced => "fenced",
                        ExtractionKind::Document => "document",
                    }),
                    _ => None,
                };
                log = log.outcome(outcome.label()).extraction_opt(extraction);
                match outcome {
                    AttemptOutcome::NoGame => tracing::warn!(
                        bytes = progress.bytes,
                        "generation finished without an html block or document"
                    ),
                    _ => tracing::info!(
                        outcome = outcome.label(),
                        bytes = progress.bytes,
                        lines = progress.lines,
                        "generation finished"
                    ),
                }
                observer.on_finish(outcome);
            }
            Err(e) => {
                span.record("outcome", "failed");
                log = log.outcome("failed").error(e.kind(), &e.to_string());
                tracing::error!(error = %e, kind = e.kind(), "generation failed");
                observer.on_error(e);
            }
        }
        telemetry::emit(log);
        result
    }

    async fn stream_into<O>(
        &self,
        info: &AttemptInfo,
        messages: Conversation,
        token: &CancellationToken,
        buffer: &mut IncrementalBuffer,
        observer: &mut O,
    ) -> CoreResult<AttemptOutcome>
    where
        O: GenerationObserver + ?Sized,
    {
        let system = match &self.prompts {
            Some(prompts) => Some(prompts.get(PROMPT_CODE_GENERATION).await?),
            None => None,
        };
        let request = GenerationRequest {
            messages: normalize_conversation(messages),
            system,
            chat_id: None,
        };
        let ctx = RequestCtx {
            request_id: Some(&info.attempt_id),
            turn_id: Some(&info.turn_id),
            idempotency_key: Some(&info.turn_id),
        };

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
            opened = self.backend.open(&request, &ctx) => opened?,
        };
        let mut fragments = FragmentStream::from_response(response);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
                next = fragments.next() => next,
            };
            match next {
                Some(Ok(delta)) => {
                    buffer.append(&delta);
                    let progress = buffer.progress();
                    self.set_progress(&info.attempt_id, progress);
                    observer.on_delta(&delta);
                    observer.on_progress(progress);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if token.is_cancelled() {
            return Ok(AttemptOutcome::Cancelled);
        }
        let Some(extraction) = buffer.extract() else {
            return Ok(AttemptOutcome::NoGame);
        };
        let game = ExtractedGame::from_extraction(extraction);
        self.lock().latest = Some(game.clone());
        Ok(AttemptOutcome::Completed(game))
    }

    fn set_progress(&self, attempt_id: &str, progress: Progress) {
        let mut st = self.lock();
        if st
            .active
            .as_ref()
            .is_some_and(|a| a.attempt_id == attempt_id)
        {
            st.progress = progress;
        }
    }
}
