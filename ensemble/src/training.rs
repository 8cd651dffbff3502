//! Training session manager: one process-wide session streaming discharges
//! to every participating node with strict per-node ordinal order and
//! at-least-once delivery.
//!
//! Each node owns a serial queue (an mpsc channel with a single consumer
//! task). A consumer finishes one delivery — retries included — before
//! taking the next, which is the sole mechanism behind the gap-free
//! ordinal sequence nodes observe. Across nodes the queues run
//! independently.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::client::NodeClient;
use crate::discharge::Discharge;
use crate::error::OrchestratorError;
use crate::registry::{NodeDescriptor, Registry};

const QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Delivery {
    Delivered,
    Skipped,
    Failed(String),
}

struct QueueTask {
    ordinal: u64,
    discharge: Arc<Discharge>,
    ack: oneshot::Sender<Delivery>,
}

struct NodeQueue {
    descriptor: NodeDescriptor,
    tx: mpsc::Sender<QueueTask>,
    poisoned: Arc<AtomicBool>,
}

struct SessionState {
    total: usize,
    enqueued: usize,
    seen: HashSet<String>,
    auto_finish: bool,
    nodes: BTreeMap<String, NodeQueue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStartStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStart {
    pub model: String,
    pub status: NodeStartStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_discharges: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of opening a session against the fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub successful: usize,
    pub failed: usize,
    pub details: Vec<NodeStart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDelivery {
    pub model: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeDelivery {
    fn new(model: String, delivery: Delivery) -> Self {
        let (status, error) = match delivery {
            Delivery::Delivered => ("delivered", None),
            Delivery::Skipped => ("skipped", None),
            Delivery::Failed(reason) => ("failed", Some(reason)),
        };
        Self {
            model,
            status: status.to_string(),
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DischargeDelivery {
    pub id: String,
    pub ordinal: u64,
    pub nodes: Vec<NodeDelivery>,
}

/// Outcome of one batch, reported after every node acknowledged (or
/// skipped) every discharge of the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub enqueued: usize,
    pub total_discharges: usize,
    pub finished: bool,
    pub deliveries: Vec<DischargeDelivery>,
}

/// `/train` response: batch outcome plus the start report when the call
/// opened the session implicitly.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<StartReport>,
    #[serde(flatten)]
    pub batch: BatchReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFinish {
    pub model: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishReport {
    pub enqueued: usize,
    pub total_discharges: usize,
    pub nodes: Vec<NodeFinish>,
}

pub struct TrainingManager {
    registry: Arc<Registry>,
    client: Arc<NodeClient>,
    session: Mutex<Option<SessionState>>,
}

impl TrainingManager {
    pub fn new(registry: Arc<Registry>, client: Arc<NodeClient>) -> Self {
        Self {
            registry,
            client,
            session: Mutex::new(None),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Open a session against every enabled node. Nodes that reject the
    /// preamble are excluded for the whole session; if none accepts, the
    /// session is not created.
    pub async fn start_session(
        &self,
        total: usize,
        auto_finish: bool,
    ) -> Result<StartReport, OrchestratorError> {
        if total == 0 {
            return Err(OrchestratorError::bad_request(
                "totalDischarges must be positive",
            ));
        }

        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Err(OrchestratorError::SessionActive);
        }

        let nodes = self.registry.enabled();
        if nodes.is_empty() {
            return Err(OrchestratorError::NoModelsEnabled);
        }
        let timeouts = self.registry.timeouts();

        let starts = futures::future::join_all(nodes.into_iter().map(|node| {
            let client = Arc::clone(&self.client);
            async move {
                let result = client
                    .start_training(&node, total, timeouts.training_secs(), timeouts.training())
                    .await;
                (node, result)
            }
        }))
        .await;

        let mut details = Vec::with_capacity(starts.len());
        let mut queues = BTreeMap::new();
        for (node, result) in starts {
            match result {
                Ok(start) => {
                    details.push(NodeStart {
                        model: node.key.clone(),
                        status: NodeStartStatus::Accepted,
                        expected_discharges: start.expected_discharges,
                        error: None,
                    });
                    queues.insert(
                        node.key.clone(),
                        spawn_queue(Arc::clone(&self.client), Arc::clone(&self.registry), node),
                    );
                }
                Err(err) => {
                    tracing::warn!(node = %node.key, error = %err, "node rejected training start, excluding it from the session");
                    details.push(NodeStart {
                        model: node.key,
                        status: NodeStartStatus::Rejected,
                        expected_discharges: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let successful = queues.len();
        let failed = details.len() - successful;
        if queues.is_empty() {
            return Err(OrchestratorError::bad_request(
                "no node accepted the training session",
            ));
        }

        tracing::info!(total, auto_finish, successful, failed, "training session started");
        *guard = Some(SessionState {
            total,
            enqueued: 0,
            seen: HashSet::new(),
            auto_finish,
            nodes: queues,
        });

        Ok(StartReport {
            successful,
            failed,
            details,
        })
    }

    /// Submit one batch to the active session and wait until every node
    /// acknowledged every discharge of the batch.
    pub async fn send_batch(
        &self,
        discharges: Vec<Arc<Discharge>>,
    ) -> Result<BatchReport, OrchestratorError> {
        let mut duplicates = 0;
        let mut rejected = 0;
        let mut pending: Vec<(String, u64, Vec<(String, oneshot::Receiver<Delivery>)>)> =
            Vec::new();

        let (enqueued, total) = {
            let mut guard = self.session.lock().await;
            let session = guard
                .as_mut()
                .ok_or(OrchestratorError::SessionNotActive)?;

            for discharge in discharges {
                let id = discharge.id.clone();
                if session.seen.contains(&id) {
                    tracing::debug!(discharge = %id, "duplicate discharge skipped");
                    duplicates += 1;
                    continue;
                }
                if session.enqueued >= session.total {
                    if session.auto_finish {
                        tracing::warn!(discharge = %id, total = session.total, "discharge past declared totalDischarges rejected");
                        rejected += 1;
                        continue;
                    }
                    // Open-ended sessions grow lazily instead of rejecting.
                    session.total += 1;
                    tracing::warn!(total = session.total, "batch exceeds declared totalDischarges, growing session");
                }

                session.seen.insert(id.clone());
                session.enqueued += 1;
                let ordinal = session.enqueued as u64;

                let mut acks = Vec::with_capacity(session.nodes.len());
                for queue in session.nodes.values() {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let task = QueueTask {
                        ordinal,
                        discharge: Arc::clone(&discharge),
                        ack: ack_tx,
                    };
                    // A closed queue drops the task, which resolves the ack
                    // receiver as an error below.
                    let _ = queue.tx.send(task).await;
                    acks.push((queue.descriptor.key.clone(), ack_rx));
                }
                pending.push((id, ordinal, acks));
            }

            (session.enqueued, session.total)
        };

        // Await every ack outside the lock so further batches can enqueue
        // while this one drains.
        let mut deliveries = Vec::with_capacity(pending.len());
        for (id, ordinal, acks) in pending {
            let mut nodes = Vec::with_capacity(acks.len());
            for (model, ack) in acks {
                let delivery = ack.await.unwrap_or_else(|_| {
                    Delivery::Failed("node queue closed before delivery".to_string())
                });
                nodes.push(NodeDelivery::new(model, delivery));
            }
            deliveries.push(DischargeDelivery { id, ordinal, nodes });
        }

        let finished = self.maybe_auto_finish().await;

        Ok(BatchReport {
            accepted: deliveries.len(),
            duplicates,
            rejected,
            enqueued,
            total_discharges: total,
            finished,
            deliveries,
        })
    }

    /// `/train` semantics: open a session implicitly when none is active
    /// (auto-finishing at `total`), then submit the batch.
    pub async fn train_batch(
        &self,
        discharges: Vec<Arc<Discharge>>,
        total: Option<usize>,
    ) -> Result<TrainReport, OrchestratorError> {
        let started = if !self.is_active().await {
            let total = total.unwrap_or(discharges.len());
            match self.start_session(total, true).await {
                Ok(report) => Some(report),
                // Lost the race against a concurrent starter; join its session.
                Err(OrchestratorError::SessionActive) => None,
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let batch = self.send_batch(discharges).await?;
        Ok(TrainReport { started, batch })
    }

    /// Tear the active session down and report per-node state.
    pub async fn finish_session(&self) -> Result<FinishReport, OrchestratorError> {
        let session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(OrchestratorError::SessionNotActive)?;

        let nodes = session
            .nodes
            .values()
            .map(|queue| NodeFinish {
                model: queue.descriptor.key.clone(),
                status: if queue.poisoned.load(Ordering::Acquire) {
                    "failed".to_string()
                } else {
                    "completed".to_string()
                },
            })
            .collect();

        tracing::info!(
            enqueued = session.enqueued,
            total = session.total,
            "training session finished"
        );

        // Dropping the session closes every queue; consumers drain what is
        // already enqueued and exit.
        Ok(FinishReport {
            enqueued: session.enqueued,
            total_discharges: session.total,
            nodes,
        })
    }

    async fn maybe_auto_finish(&self) -> bool {
        let mut guard = self.session.lock().await;
        let done = matches!(
            guard.as_ref(),
            Some(state) if state.auto_finish && state.enqueued >= state.total
        );
        if done {
            if let Some(state) = guard.take() {
                tracing::info!(enqueued = state.enqueued, "training session complete, finishing automatically");
            }
        }
        done
    }
}

/// Spawn the single consumer behind one node's queue.
fn spawn_queue(client: Arc<NodeClient>, registry: Arc<Registry>, node: NodeDescriptor) -> NodeQueue {
    let (tx, mut rx) = mpsc::channel::<QueueTask>(QUEUE_DEPTH);
    let poisoned = Arc::new(AtomicBool::new(false));
    let descriptor = node.clone();
    let flag = Arc::clone(&poisoned);

    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let QueueTask {
                ordinal,
                discharge,
                ack,
            } = task;

            if flag.load(Ordering::Acquire) {
                drop(discharge);
                let _ = ack.send(Delivery::Skipped);
                continue;
            }

            let timeout = registry.timeouts().training();
            let delivery = match client
                .push_discharge(&node, ordinal, &discharge, timeout)
                .await
            {
                Ok(()) => Delivery::Delivered,
                Err(err) => {
                    tracing::error!(node = %node.key, ordinal, error = %err, "discharge delivery failed, node poisoned for this session");
                    flag.store(true, Ordering::Release);
                    Delivery::Failed(err.to_string())
                }
            };

            // Release the signal buffers before acking so the batch sees
            // the memory gone once every node is done with the discharge.
            drop(discharge);
            let _ = ack.send(delivery);
        }
    });

    NodeQueue {
        descriptor,
        tx,
        poisoned,
    }
}
