use std::sync::Arc;
use std::time::{Duration, Instant};

use common::error::AppError;
use common::evidence::CitationDescriptor;
use common::llm::ModelGateway;
use common::principal::Principal;
use common::quota::QuotaLimiter;
use common::storage::context::{ContextCache, CONTEXT_TURNS};
use common::storage::db::SurrealDbClient;
use common::storage::types::document::DocumentMetadata;
use common::storage::types::message::MessageRole;
use common::utils::config::AppConfig;
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use retrieval_pipeline::RetrievalTuning;
use score_engine::BandDeltas;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::events::{TurnEvent, TurnTiming};
use crate::functions::{consult, execute_call, FunctionOutcome};
use crate::plan::{FunctionCall, Plan};
use crate::router::{plan_turn, RouterInput};
use crate::synthesizer::{synthesize, SynthesizedAnswer, SynthesizerInput};

/// Bounded event channel between the turn and the HTTP writer; the writer is
/// the sole consumer and the bound provides backpressure.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Independent function calls in flight at once.
const FUNCTION_CONCURRENCY: usize = 4;

/// One user turn as the HTTP surface hands it over: the session is already
/// resolved and owned by the principal.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub principal: Principal,
    pub message: String,
    pub image_description: Option<String>,
}

/// Drives router → functions → synthesizer for each turn and owns every
/// long-lived collaborator. Initialized once at startup; no process globals.
pub struct Orchestrator {
    db: Arc<SurrealDbClient>,
    gateway: Arc<dyn ModelGateway>,
    quota: Arc<QuotaLimiter>,
    context: Arc<ContextCache>,
    tuning: RetrievalTuning,
    band_deltas: BandDeltas,
    known_universities: Vec<String>,
    router_timeout: Duration,
    function_timeout: Duration,
    synthesizer_timeout: Duration,
    turn_deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        gateway: Arc<dyn ModelGateway>,
        quota: Arc<QuotaLimiter>,
        context: Arc<ContextCache>,
        config: &AppConfig,
        known_universities: Vec<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            quota,
            context,
            tuning: RetrievalTuning::default(),
            band_deltas: BandDeltas {
                stable: config.band_delta_stable,
                fit: config.band_delta_fit,
                reach: config.band_delta_reach,
                challenge: config.band_delta_challenge,
            },
            known_universities,
            router_timeout: Duration::from_millis(config.router_timeout_ms),
            function_timeout: Duration::from_millis(config.function_timeout_ms),
            synthesizer_timeout: Duration::from_millis(config.synthesizer_timeout_ms),
            turn_deadline: Duration::from_millis(config.turn_deadline_ms),
        }
    }

    /// The canonical university names the router may plan against: the score
    /// engine's closed set plus whatever schools the corpus actually holds.
    pub async fn discover_universities(db: &SurrealDbClient) -> Vec<String> {
        let mut names: Vec<String> = score_engine::formula::formula_registry()
            .map(|registry| {
                registry
                    .university_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match DocumentMetadata::distinct_school_names(db).await {
            Ok(corpus_names) => names.extend(corpus_names),
            Err(e) => warn!(error = %e, "Could not list corpus school names"),
        }

        names.sort();
        names.dedup();
        names
    }

    /// Run one turn, emitting the event sequence on `tx`:
    /// `status(router)` → `status(functions)` → `status(function_result)*` →
    /// `status(synthesizer)` → `chunk+` → `done`, or a terminal `error`.
    /// Client disconnects surface as a closed channel and cancel everything
    /// in flight via `cancel`.
    #[instrument(skip_all, fields(session_id = %request.session_id, principal = %request.principal))]
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) {
        let admission = self.quota.admit(&request.principal).await;
        if !admission.allowed {
            info!(reset_at = %admission.reset_at, "Turn denied by quota");
            let _ = tx
                .send(TurnEvent::error(format!(
                    "오늘의 상담 횟수를 모두 사용했어요. {}에 다시 이용할 수 있습니다.",
                    admission.reset_at.to_rfc3339()
                )))
                .await;
            return;
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                info!("Turn cancelled before completion");
                return;
            }
            outcome = tokio::time::timeout(
                self.turn_deadline,
                self.drive_turn(&request, &tx, &cancel),
            ) => outcome,
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(AppError::Timeout(message))) => {
                warn!(%message, "Turn step exceeded its deadline");
                let _ = tx
                    .send(TurnEvent::error("답변 생성 시간이 초과되었습니다".to_string()))
                    .await;
                cancel.cancel();
            }
            Ok(Err(e)) => {
                // A closed channel means the client went away; everything
                // else is an internal failure the client may still see.
                warn!(error = %e, "Turn aborted");
                let _ = tx
                    .send(TurnEvent::error("답변을 생성하지 못했습니다".to_string()))
                    .await;
                cancel.cancel();
            }
            Err(_) => {
                warn!("Turn exceeded the overall deadline");
                let _ = tx
                    .send(TurnEvent::error("요청 처리 시간이 초과되었습니다".to_string()))
                    .await;
                cancel.cancel();
            }
        }
    }

    async fn drive_turn(
        &self,
        request: &TurnRequest,
        tx: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let total_start = Instant::now();

        let history = match self
            .context
            .recent_context(&self.db, &request.session_id, CONTEXT_TURNS)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Could not load conversation context, continuing without");
                Vec::new()
            }
        };

        // 1. Router
        send(
            tx,
            TurnEvent::status_with_detail("router", json!({ "session_id": &request.session_id })),
        )
        .await?;
        let router_start = Instant::now();
        let router_input = RouterInput {
            utterance: &request.message,
            history: &history,
            image_description: request.image_description.as_deref(),
            known_universities: &self.known_universities,
        };
        let plan = match tokio::time::timeout(
            self.router_timeout,
            plan_turn(self.gateway.as_ref(), router_input),
        )
        .await
        {
            Ok(plan) => plan,
            Err(_) => {
                warn!("Router exceeded its deadline, continuing with an empty plan");
                Plan::default()
            }
        };
        let router_ms = elapsed_ms(router_start);

        let calls: Vec<FunctionCall> = plan
            .function_calls
            .into_iter()
            .filter(|call| match call {
                FunctionCall::Consult(params) => consult::is_dispatchable(params),
                FunctionCall::Univ(_) => true,
            })
            .collect();

        // 2. Functions, fanned out with bounded concurrency, results in plan
        // order.
        let dispatched: Vec<&str> = calls.iter().map(FunctionCall::name).collect();
        send(
            tx,
            TurnEvent::status_with_detail("functions", json!({ "dispatched": &dispatched })),
        )
        .await?;
        let functions_start = Instant::now();

        let mut outcomes: Vec<FunctionOutcome> = Vec::with_capacity(calls.len());
        {
            let mut results = stream::iter(calls.clone())
                .map(|call| -> BoxFuture<'_, FunctionOutcome> {
                    Box::pin(async move { self.execute_with_deadline(&call, cancel).await })
                })
                .buffered(FUNCTION_CONCURRENCY);

            while let Some(outcome) = results.next().await {
                send(
                    tx,
                    TurnEvent::status_with_detail(
                        "function_result",
                        json!({ "name": outcome.name, "ok": outcome.ok }),
                    ),
                )
                .await?;
                outcomes.push(outcome);
            }
        }
        let functions_ms = elapsed_ms(functions_start);

        let citations = collect_descriptors(&outcomes);
        let used_chunks: Vec<String> = outcomes
            .iter()
            .flat_map(|outcome| outcome.chunks.iter().map(|chunk| chunk.title.clone()))
            .collect();

        // 3. Synthesizer
        send(tx, TurnEvent::status("synthesizer")).await?;
        let synthesizer_start = Instant::now();
        let synthesizer_input = SynthesizerInput {
            utterance: &request.message,
            history: &history,
            outcomes: &outcomes,
            citations: &citations,
        };
        let answer = tokio::time::timeout(
            self.synthesizer_timeout,
            synthesize(self.gateway.as_ref(), &synthesizer_input, tx),
        )
        .await
        .map_err(|_| AppError::Timeout("synthesizer deadline exceeded".to_string()))??;

        let timing = TurnTiming {
            router_ms,
            functions_ms,
            synthesizer_ms: elapsed_ms(synthesizer_start),
            total_ms: elapsed_ms(total_start),
        };
        info!(
            router_ms = timing.router_ms,
            functions_ms = timing.functions_ms,
            synthesizer_ms = timing.synthesizer_ms,
            dispatched = dispatched.len(),
            sources = answer.sources.len(),
            "Turn complete"
        );

        send(
            tx,
            TurnEvent::Done {
                sources: answer.sources.clone(),
                source_urls: answer.source_urls.clone(),
                used_chunks,
                timing,
            },
        )
        .await?;

        // 4. The client has its answer; persistence failures are server-side
        // only.
        if let Err(e) = self.persist_turn(request, &answer).await {
            error!(error = %e, "Failed to persist turn messages");
        }

        Ok(())
    }

    async fn execute_with_deadline(
        &self,
        call: &FunctionCall,
        cancel: &CancellationToken,
    ) -> FunctionOutcome {
        tokio::select! {
            () = cancel.cancelled() => FunctionOutcome::marker(call, "요청이 취소되었습니다"),
            result = tokio::time::timeout(
                self.function_timeout,
                execute_call(
                    &self.db,
                    self.gateway.as_ref(),
                    call,
                    &self.tuning,
                    &self.band_deltas,
                ),
            ) => match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(function = call.name(), "Function call exceeded its deadline");
                    FunctionOutcome::marker(call, "실행 시간이 초과되었습니다")
                }
            }
        }
    }

    async fn persist_turn(
        &self,
        request: &TurnRequest,
        answer: &SynthesizedAnswer,
    ) -> Result<(), AppError> {
        self.append_with_retry(
            &request.session_id,
            MessageRole::User,
            request.message.clone(),
            Vec::new(),
            Vec::new(),
        )
        .await?;
        self.append_with_retry(
            &request.session_id,
            MessageRole::Assistant,
            answer.content.clone(),
            answer.sources.clone(),
            answer.source_urls.clone(),
        )
        .await?;
        Ok(())
    }

    /// One retry per append. An append only errors when the insert itself
    /// failed, so retrying cannot duplicate a stored message.
    async fn append_with_retry(
        &self,
        session_id: &str,
        role: MessageRole,
        content: String,
        sources: Vec<String>,
        source_urls: Vec<String>,
    ) -> Result<(), AppError> {
        let first_attempt = self
            .context
            .append_message(
                &self.db,
                session_id,
                role.clone(),
                content.clone(),
                sources.clone(),
                source_urls.clone(),
            )
            .await;

        match first_attempt {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Message append failed, retrying once");
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.context
                    .append_message(&self.db, session_id, role, content, sources, source_urls)
                    .await
                    .map(|_| ())
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Union of the outcomes' citation descriptors, first occurrence order, one
/// entry per source.
fn collect_descriptors(outcomes: &[FunctionOutcome]) -> Vec<CitationDescriptor> {
    let mut seen = std::collections::HashSet::new();
    let mut descriptors = Vec::new();

    for outcome in outcomes {
        for chunk in &outcome.chunks {
            let descriptor = chunk.descriptor();
            if seen.insert(descriptor.source.clone()) {
                descriptors.push(descriptor);
            }
        }
    }

    descriptors
}

async fn send(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<(), AppError> {
    tx.send(event)
        .await
        .map_err(|_| AppError::Internal("turn event channel closed".to_string()))
}
