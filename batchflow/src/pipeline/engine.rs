//! Streaming execution of a pipeline.
//!
//! Every step runs as its own tokio task. Workers are launched one level at a
//! time: a level starts only after every worker of the previous level has
//! reported that it is running. Data then flows concurrently through the
//! bounded edge channels. The coordinator owns all step statuses; workers
//! report back through the started channel and their join handles.

use super::router::{Inbound, Outbound, RouteError, Router};
use super::{Levels, PipelineConfig, PipelineFailure, PipelineOutput, PipelineResult, StepGraph, StepNode};
use crate::cancellation::CancellationToken;
use crate::core::{Batch, ParamValue, RuntimeParameters, StepStatus};
use crate::errors::{
    BatchflowError, StepProcessingError, UnboundParameterError, UnknownParameterError,
};
use crate::events::{
    EventSink, PIPELINE_CANCELLED, PIPELINE_COMPLETED, PIPELINE_FAILED, PIPELINE_STARTED,
    STEP_CANCELLED, STEP_COMPLETED, STEP_FAILED, STEP_STARTED,
};
use crate::steps::{GeneratorStep, StepContext, StepLogic, TransformStep};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Borrowed view of a pipeline declaration, ready to run.
pub(crate) struct Engine<'a> {
    pub(crate) name: &'a str,
    pub(crate) graph: &'a StepGraph,
    pub(crate) steps: &'a HashMap<String, StepNode>,
    pub(crate) config: &'a PipelineConfig,
}

/// What a worker hands back to the coordinator when it exits.
#[derive(Debug)]
struct WorkerReport {
    status: StepStatus,
    collected: Option<Vec<Batch>>,
    error: Option<BatchflowError>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Throughput {
    batches_in: usize,
    batches_out: usize,
}

/// How a worker loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Finished,
    Stopped,
}

type Joined = BoxFuture<'static, (String, Result<WorkerReport, JoinError>)>;

impl Engine<'_> {
    /// Checks parameter bindings against the declared parameters.
    ///
    /// # Errors
    ///
    /// Returns `UnboundParameterError` listing every required parameter left
    /// unbound, or `UnknownParameterError` for bindings nothing declares.
    pub(crate) fn check_parameters(&self, params: &RuntimeParameters) -> Result<(), BatchflowError> {
        let mut missing = Vec::new();
        for name in self.graph.step_names() {
            let Some(node) = self.steps.get(name) else { continue };
            for param in node.runtime_parameters() {
                if !param.optional && params.get(name, &param.name).is_none() {
                    missing.push((name.clone(), param.name.clone()));
                }
            }
        }
        if !missing.is_empty() {
            return Err(UnboundParameterError::new(missing).into());
        }

        let unknown: Vec<_> = params
            .keys()
            .into_iter()
            .filter(|(step, param)| {
                !self
                    .steps
                    .get(step)
                    .is_some_and(|node| node.has_parameter(param))
            })
            .collect();
        if !unknown.is_empty() {
            return Err(UnknownParameterError::new(unknown).into());
        }
        Ok(())
    }

    /// Runs the pipeline to completion, failure or cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error only if the parameter bindings are rejected; nothing
    /// runs in that case.
    pub(crate) async fn run(
        &self,
        inputs: Vec<Batch>,
        params: RuntimeParameters,
        external: Option<Arc<CancellationToken>>,
    ) -> Result<PipelineResult, BatchflowError> {
        self.check_parameters(&params)?;

        let levels = Levels::compute(self.graph);
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let token = Arc::new(CancellationToken::new());
        if let Some(external) = external {
            link_token(&external, &token);
        }
        let sink = self.config.event_sink().clone();

        info!(
            pipeline = %self.name,
            run_id = %run_id,
            steps = self.graph.len(),
            levels = levels.len(),
            "Pipeline run started"
        );
        sink.emit(
            PIPELINE_STARTED,
            Some(json!({
                "pipeline": self.name,
                "run_id": run_id,
                "steps": self.graph.len(),
                "levels": levels.tiers(),
            })),
        )
        .await;

        let mut status: BTreeMap<String, StepStatus> = self
            .graph
            .step_names()
            .iter()
            .map(|name| (name.clone(), StepStatus::Pending))
            .collect();
        let mut coordinator = Coordinator {
            token: token.clone(),
            status: &mut status,
            outputs: HashMap::new(),
            failure: None,
        };

        let mut router = Router::new(self.graph, self.config.channel_capacity());
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();
        let mut running: FuturesUnordered<Joined> = FuturesUnordered::new();

        for (level, tier) in levels.iter().enumerate() {
            if token.is_cancelled() {
                debug!(level, "Run cancelled, remaining levels not launched");
                break;
            }
            debug!(level, steps = tier.len(), "Launching level");

            for name in tier {
                let Some(node) = self.steps.get(name) else {
                    continue;
                };
                let worker = Worker {
                    name: name.clone(),
                    level,
                    logic: node.logic().clone(),
                    ctx: step_context(node, &run_id, &params),
                    outbound: router.take_outbound(name, token.clone()),
                    token: token.clone(),
                    collect: self.config.collect_sink_outputs()
                        && self.graph.successors(name).is_empty(),
                    started: started_tx.clone(),
                    events: sink.clone(),
                };
                let inbound = match node.logic() {
                    StepLogic::Transform(_) => Some(router.take_inbound(name, token.clone(), &inputs)),
                    StepLogic::Generator(_) => None,
                };
                let span = info_span!("step", step = %name, kind = %node.kind(), level);
                let handle = tokio::spawn(worker.run(inbound).instrument(span));
                let name = name.clone();
                running.push(Box::pin(async move { (name, handle.await) }));
            }

            let mut waiting: HashSet<&str> = tier.iter().map(String::as_str).collect();
            while !waiting.is_empty() {
                tokio::select! {
                    Some(name) = started_rx.recv() => {
                        waiting.remove(name.as_str());
                        coordinator.mark_running(&name);
                    }
                    Some((name, joined)) = running.next() => {
                        waiting.remove(name.as_str());
                        coordinator.settle(name, joined);
                    }
                    else => break,
                }
            }
        }
        // Channels of steps never launched close here, releasing their producers.
        drop(router);
        drop(started_tx);

        while let Some((name, joined)) = running.next().await {
            coordinator.settle(name, joined);
        }

        let Coordinator {
            outputs, failure, ..
        } = coordinator;
        for step_status in status.values_mut() {
            if !step_status.is_terminal() {
                *step_status = StepStatus::Cancelled;
            }
        }
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        if let Some((step, error)) = failure {
            error!(pipeline = %self.name, step = %step, error = %error, "Pipeline run failed");
            sink.emit(
                PIPELINE_FAILED,
                Some(json!({
                    "pipeline": self.name,
                    "run_id": run_id,
                    "step": step,
                    "error": error.to_string(),
                    "duration_ms": duration_ms,
                })),
            )
            .await;
            return Ok(PipelineResult::Failed(PipelineFailure {
                step,
                error,
                run_id,
                step_status: status,
            }));
        }

        if status.values().any(|s| !s.is_success()) {
            let reason = token.reason().unwrap_or_else(|| "run stopped".to_string());
            warn!(pipeline = %self.name, reason = %reason, "Pipeline run cancelled");
            sink.emit(
                PIPELINE_CANCELLED,
                Some(json!({
                    "pipeline": self.name,
                    "run_id": run_id,
                    "reason": reason,
                    "duration_ms": duration_ms,
                })),
            )
            .await;
            return Ok(PipelineResult::Cancelled { run_id, reason });
        }

        info!(pipeline = %self.name, run_id = %run_id, duration_ms, "Pipeline run completed");
        sink.emit(
            PIPELINE_COMPLETED,
            Some(json!({
                "pipeline": self.name,
                "run_id": run_id,
                "duration_ms": duration_ms,
            })),
        )
        .await;
        Ok(PipelineResult::Completed(PipelineOutput {
            run_id,
            pipeline: self.name.to_string(),
            started_at,
            finished_at,
            outputs,
            step_status: status,
        }))
    }
}

/// Forwards a caller's stop request to the run token.
fn link_token(external: &Arc<CancellationToken>, run: &Arc<CancellationToken>) {
    let source = Arc::downgrade(external);
    let run = run.clone();
    external.on_cancel(move || {
        let reason = source
            .upgrade()
            .and_then(|token| token.reason())
            .unwrap_or_else(|| "cancelled by caller".to_string());
        run.cancel(reason);
    });
}

fn step_context(node: &StepNode, run_id: &str, params: &RuntimeParameters) -> StepContext {
    node.runtime_parameters()
        .iter()
        .fold(StepContext::new(node.name(), run_id), |ctx, param| {
            let value = params
                .get(node.name(), &param.name)
                .cloned()
                .map_or(ParamValue::Unset, ParamValue::Set);
            ctx.with_parameter(param.name.clone(), value)
        })
}

/// Run-wide bookkeeping owned by the coordinator.
struct Coordinator<'s> {
    token: Arc<CancellationToken>,
    status: &'s mut BTreeMap<String, StepStatus>,
    outputs: HashMap<String, Vec<Batch>>,
    failure: Option<(String, BatchflowError)>,
}

impl Coordinator<'_> {
    fn mark_running(&mut self, name: &str) {
        if let Some(status) = self.status.get_mut(name) {
            if *status == StepStatus::Pending {
                *status = StepStatus::Running;
            }
        }
    }

    fn settle(&mut self, name: String, joined: Result<WorkerReport, JoinError>) {
        let report = joined.unwrap_or_else(|join_error| {
            error!(step = %name, error = %join_error, "Step worker aborted");
            self.token.cancel(format!("step '{name}' aborted"));
            WorkerReport {
                status: StepStatus::Failed,
                collected: None,
                error: Some(
                    StepProcessingError::new(
                        &name,
                        anyhow::anyhow!("worker aborted: {join_error}"),
                    )
                    .into(),
                ),
            }
        });

        if let Some(batches) = report.collected {
            self.outputs.insert(name.clone(), batches);
        }
        if let Some(error) = report.error {
            if self.failure.is_none() {
                self.failure = Some((name.clone(), error));
            } else {
                debug!(step = %name, error = %error, "Further step failure ignored");
            }
        }
        self.status.insert(name, report.status);
    }
}

/// A single step's task state.
struct Worker {
    name: String,
    level: usize,
    logic: StepLogic,
    ctx: StepContext,
    outbound: Outbound,
    token: Arc<CancellationToken>,
    collect: bool,
    started: mpsc::UnboundedSender<String>,
    events: Arc<dyn EventSink>,
}

impl Worker {
    async fn run(self, inbound: Option<Inbound>) -> WorkerReport {
        let _ = self.started.send(self.name.clone());
        self.events.try_emit(
            STEP_STARTED,
            Some(json!({
                "step": self.name,
                "kind": self.logic.kind(),
                "level": self.level,
            })),
        );
        debug!("Step started");

        let start = Instant::now();
        let mut stats = Throughput::default();
        let mut collected = Vec::new();
        let result = match (&self.logic, inbound) {
            (StepLogic::Generator(step), _) => {
                self.run_generator(step.as_ref(), &mut stats, &mut collected)
                    .await
            }
            (StepLogic::Transform(step), Some(inbound)) => {
                self.run_transform(step.as_ref(), inbound, &mut stats, &mut collected)
                    .await
            }
            (StepLogic::Transform(_), None) => Err(BatchflowError::Internal(format!(
                "transform step '{}' has no inbound",
                self.name
            ))),
        };

        let payload = |extra: Option<(&str, String)>| {
            let mut data = json!({
                "step": self.name,
                "batches_in": stats.batches_in,
                "batches_out": stats.batches_out,
                "duration_ms": start.elapsed().as_secs_f64() * 1000.0,
            });
            if let (Some((key, value)), Some(map)) = (extra, data.as_object_mut()) {
                map.insert(key.to_string(), value.into());
            }
            data
        };

        match result {
            Ok(Flow::Finished) => {
                debug!(
                    batches_in = stats.batches_in,
                    batches_out = stats.batches_out,
                    "Step completed"
                );
                self.events.try_emit(STEP_COMPLETED, Some(payload(None)));
                WorkerReport {
                    status: StepStatus::Completed,
                    collected: self.collect.then_some(collected),
                    error: None,
                }
            }
            Ok(Flow::Stopped) => {
                let reason = self.token.reason().unwrap_or_default();
                debug!(reason = %reason, "Step cancelled");
                self.events
                    .try_emit(STEP_CANCELLED, Some(payload(Some(("reason", reason)))));
                WorkerReport {
                    status: StepStatus::Cancelled,
                    collected: None,
                    error: None,
                }
            }
            Err(error) => {
                // Cancel before the outbound senders drop with `self`.
                self.token.cancel(format!("step '{}' failed", self.name));
                warn!(error = %error, "Step failed");
                self.events
                    .try_emit(STEP_FAILED, Some(payload(Some(("error", error.to_string())))));
                WorkerReport {
                    status: StepStatus::Failed,
                    collected: None,
                    error: Some(error),
                }
            }
        }
    }

    async fn run_generator(
        &self,
        step: &dyn GeneratorStep,
        stats: &mut Throughput,
        collected: &mut Vec<Batch>,
    ) -> Result<Flow, BatchflowError> {
        let mut batches = step.produce(&self.ctx);
        while let Some(item) = batches.next().await {
            let (batch, last) = item.map_err(|e| StepProcessingError::new(&self.name, e))?;
            stats.batches_out += 1;
            if self.forward(batch, collected).await == Flow::Stopped {
                return Ok(Flow::Stopped);
            }
            if last {
                return Ok(Flow::Finished);
            }
        }
        if self.token.is_cancelled() {
            return Ok(Flow::Stopped);
        }
        warn!(batches = stats.batches_out, "Generator ended without marking its last batch");
        Ok(Flow::Finished)
    }

    async fn run_transform(
        &self,
        step: &dyn TransformStep,
        mut inbound: Inbound,
        stats: &mut Throughput,
        collected: &mut Vec<Batch>,
    ) -> Result<Flow, BatchflowError> {
        while let Some(input) = inbound.next().await? {
            stats.batches_in += 1;
            let mut outputs = step.process(input, &self.ctx);
            while let Some(item) = outputs.next().await {
                let batch = item.map_err(|e| StepProcessingError::new(&self.name, e))?;
                stats.batches_out += 1;
                if self.forward(batch, collected).await == Flow::Stopped {
                    return Ok(Flow::Stopped);
                }
            }
        }
        if self.token.is_cancelled() {
            return Ok(Flow::Stopped);
        }
        Ok(Flow::Finished)
    }

    /// Sends one output batch downstream, or keeps it when this is a sink.
    async fn forward(&self, batch: Batch, collected: &mut Vec<Batch>) -> Flow {
        if self.token.is_cancelled() {
            return Flow::Stopped;
        }
        if self.collect {
            collected.push(batch);
            return Flow::Finished;
        }
        match self.outbound.send(batch).await {
            Ok(()) => Flow::Finished,
            Err(RouteError::Cancelled) => Flow::Stopped,
            Err(RouteError::Closed(to)) => {
                debug!(to = %to, "Downstream closed, stopping");
                Flow::Stopped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RuntimeParameter;
    use crate::pipeline::Pipeline;
    use crate::steps::FnTransform;
    use serde_json::json;

    fn with_params() -> Pipeline {
        let mut pipeline = Pipeline::new("params");
        pipeline
            .add_step(
                "a",
                StepLogic::transform(
                    FnTransform::new(|batch, _| Ok(vec![batch]))
                        .with_parameter(RuntimeParameter::new("threshold"))
                        .with_parameter(RuntimeParameter::new("seed").optional()),
                ),
            )
            .unwrap();
        pipeline
            .add_step(
                "b",
                StepLogic::transform(
                    FnTransform::new(|batch, _| Ok(vec![batch]))
                        .with_parameter(RuntimeParameter::new("model")),
                ),
            )
            .unwrap();
        pipeline
    }

    #[test]
    fn test_check_parameters_lists_all_missing() {
        let pipeline = with_params();
        let err = pipeline.engine().check_parameters(&RuntimeParameters::new()).unwrap_err();

        match err {
            BatchflowError::UnboundParameter(e) => assert_eq!(
                e.missing,
                vec![
                    ("a".to_string(), "threshold".to_string()),
                    ("b".to_string(), "model".to_string()),
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_parameters_rejects_unknown_bindings() {
        let pipeline = with_params();
        let params = RuntimeParameters::new()
            .with("a", "threshold", json!(0.5))
            .with("b", "model", json!("m"))
            .with("b", "temperature", json!(1.0))
            .with("zzz", "x", json!(1));

        let err = pipeline.engine().check_parameters(&params).unwrap_err();
        match err {
            BatchflowError::UnknownParameter(e) => assert_eq!(
                e.unknown,
                vec![
                    ("b".to_string(), "temperature".to_string()),
                    ("zzz".to_string(), "x".to_string()),
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_parameters_optional_may_stay_unset() {
        let pipeline = with_params();
        let params = RuntimeParameters::new()
            .with("a", "threshold", json!(0.5))
            .with("b", "model", json!("m"));
        assert!(pipeline.engine().check_parameters(&params).is_ok());
    }

    #[test]
    fn test_step_context_binds_declared_parameters() {
        let pipeline = with_params();
        let params = RuntimeParameters::new().with("a", "threshold", json!(0.5));
        let node = pipeline.step("a").unwrap();

        let ctx = step_context(node, "run-1", &params);
        assert_eq!(ctx.param("threshold"), Some(&json!(0.5)));
        assert_eq!(ctx.param("seed"), None);
        assert_eq!(ctx.run_id(), "run-1");
    }

    #[test]
    fn test_external_cancel_reaches_run_token() {
        let external = Arc::new(CancellationToken::new());
        let run = Arc::new(CancellationToken::new());
        link_token(&external, &run);

        external.cancel("user abort");
        assert!(run.is_cancelled());
        assert_eq!(run.reason().as_deref(), Some("user abort"));
    }
}
