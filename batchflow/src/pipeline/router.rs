//! Channel routing between step workers.
//!
//! Every edge gets its own bounded channel. A producer broadcasts each output
//! batch to all of its successors; a consumer with several predecessors
//! receives one batch from each edge and merges them record by record.

use super::StepGraph;
use crate::cancellation::CancellationToken;
use crate::core::{merge_records, Batch};
use crate::errors::{BatchAlignmentError, EdgeBatch};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a batch could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The run was cancelled while waiting for channel capacity.
    #[error("run cancelled")]
    Cancelled,
    /// A downstream worker is gone.
    #[error("step '{0}' stopped receiving")]
    Closed(String),
}

/// The channels of one run, handed out to workers one step at a time.
#[derive(Debug)]
pub struct Router {
    outbound: HashMap<String, Vec<(String, mpsc::Sender<Batch>)>>,
    inbound: HashMap<String, Vec<(String, mpsc::Receiver<Batch>)>>,
}

impl Router {
    /// Creates one channel of `capacity` batches per edge of `graph`.
    #[must_use]
    pub fn new(graph: &StepGraph, capacity: usize) -> Self {
        let mut outbound: HashMap<String, Vec<_>> = HashMap::new();
        let mut inbound: HashMap<String, Vec<_>> = HashMap::new();

        for (from, to) in graph.edges() {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            outbound.entry(from.clone()).or_default().push((to.clone(), tx));
            inbound.entry(to.clone()).or_default().push((from.clone(), rx));
        }

        Self { outbound, inbound }
    }

    /// Takes the sending ends of `step`'s outgoing edges.
    ///
    /// A step without successors gets an outbound that delivers nowhere.
    pub fn take_outbound(&mut self, step: &str, token: Arc<CancellationToken>) -> Outbound {
        Outbound {
            edges: self.outbound.remove(step).unwrap_or_default(),
            token,
        }
    }

    /// Takes the receiving ends of `step`'s incoming edges.
    ///
    /// A step without predecessors reads `inputs` instead.
    pub fn take_inbound(
        &mut self,
        step: &str,
        token: Arc<CancellationToken>,
        inputs: &[Batch],
    ) -> Inbound {
        let mut edges = self.inbound.remove(step).unwrap_or_default();
        let source = match edges.len() {
            0 => Source::Inputs(inputs.iter().cloned().collect()),
            1 => {
                let (from, rx) = edges.remove(0);
                Source::Single { from, rx }
            }
            _ => Source::Merge(edges),
        };

        Inbound {
            step: step.to_string(),
            token,
            source,
        }
    }
}

/// Sending side of a step: one sender per successor.
#[derive(Debug)]
pub struct Outbound {
    edges: Vec<(String, mpsc::Sender<Batch>)>,
    token: Arc<CancellationToken>,
}

impl Outbound {
    /// Returns the number of successors.
    #[must_use]
    pub fn fan_out(&self) -> usize {
        self.edges.len()
    }

    /// Delivers `batch` to every successor, waiting for capacity on each edge.
    ///
    /// # Errors
    ///
    /// Fails if the run is cancelled while blocked or a successor is gone.
    pub async fn send(&self, batch: Batch) -> Result<(), RouteError> {
        let Some(((last_to, last_tx), rest)) = self.edges.split_last() else {
            return Ok(());
        };
        for (to, tx) in rest {
            self.send_one(to, tx, batch.clone()).await?;
        }
        self.send_one(last_to, last_tx, batch).await
    }

    async fn send_one(
        &self,
        to: &str,
        tx: &mpsc::Sender<Batch>,
        batch: Batch,
    ) -> Result<(), RouteError> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(RouteError::Cancelled),
            sent = tx.send(batch) => sent.map_err(|_| RouteError::Closed(to.to_string())),
        }
    }
}

#[derive(Debug)]
enum Source {
    Inputs(VecDeque<Batch>),
    Single {
        from: String,
        rx: mpsc::Receiver<Batch>,
    },
    Merge(Vec<(String, mpsc::Receiver<Batch>)>),
}

/// Receiving side of a transform step.
#[derive(Debug)]
pub struct Inbound {
    step: String,
    token: Arc<CancellationToken>,
    source: Source,
}

impl Inbound {
    /// Returns the names of the predecessors, in merge order.
    #[must_use]
    pub fn producers(&self) -> Vec<&str> {
        match &self.source {
            Source::Inputs(_) => Vec::new(),
            Source::Single { from, .. } => vec![from.as_str()],
            Source::Merge(edges) => edges.iter().map(|(from, _)| from.as_str()).collect(),
        }
    }

    /// Receives the next input batch.
    ///
    /// Returns `Ok(None)` once every inbound edge has ended, or as soon as
    /// the run is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `BatchAlignmentError` if merged batches differ in length or
    /// some edges end before others.
    pub async fn next(&mut self) -> Result<Option<Batch>, BatchAlignmentError> {
        match &mut self.source {
            Source::Inputs(queue) => {
                if self.token.is_cancelled() {
                    return Ok(None);
                }
                Ok(queue.pop_front())
            }
            Source::Single { rx, .. } => Ok(tokio::select! {
                biased;
                () = self.token.cancelled() => None,
                batch = rx.recv() => batch,
            }),
            Source::Merge(edges) => merge_next(&self.step, &self.token, edges).await,
        }
    }
}

async fn merge_next(
    step: &str,
    token: &CancellationToken,
    edges: &mut [(String, mpsc::Receiver<Batch>)],
) -> Result<Option<Batch>, BatchAlignmentError> {
    let (producers, receivers): (Vec<&String>, Vec<&mut mpsc::Receiver<Batch>>) =
        edges.iter_mut().map(|(from, rx)| (&*from, rx)).unzip();

    let received = tokio::select! {
        biased;
        () = token.cancelled() => return Ok(None),
        batches = join_all(receivers.into_iter().map(mpsc::Receiver::recv)) => batches,
    };

    if received.iter().all(Option::is_none) {
        return Ok(None);
    }

    let aligned = received.iter().all(Option::is_some)
        && received
            .iter()
            .flatten()
            .all(|batch| Some(batch.len()) == received[0].as_ref().map(Vec::len));
    if !aligned {
        if token.is_cancelled() {
            return Ok(None);
        }
        let edges = producers
            .iter()
            .zip(&received)
            .map(|(from, batch)| EdgeBatch {
                from: (*from).clone(),
                len: batch.as_ref().map(Vec::len),
            })
            .collect();
        return Err(BatchAlignmentError::new(step, edges));
    }

    let mut batches = received.into_iter().flatten();
    let mut merged = batches.next().unwrap_or_default();
    for batch in batches {
        for (base, update) in merged.iter_mut().zip(batch) {
            merge_records(base, update);
        }
    }
    Ok(Some(merged))
}
