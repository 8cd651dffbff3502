//! OrchestratorService: transport-agnostic wiring of the core components.
//!
//! Owns the registry, the shared node client, and every session manager;
//! transports hold one `Arc<OrchestratorService>` and delegate. Also the
//! home of the shutdown channel the HTTP server drains on.

use std::sync::Arc;

use tokio::sync::watch;

use crate::automated::AutomatedPredictManager;
use crate::client::NodeClient;
use crate::health::HealthProber;
use crate::predict::PredictOrchestrator;
use crate::registry::Registry;
use crate::summary::SummaryStore;
use crate::training::TrainingManager;

pub struct OrchestratorService {
    registry: Arc<Registry>,
    prober: HealthProber,
    predictor: Arc<PredictOrchestrator>,
    training: TrainingManager,
    automated: AutomatedPredictManager,
    summaries: SummaryStore,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl OrchestratorService {
    pub fn new(registry: Registry) -> Self {
        let registry = Arc::new(registry);
        let client = Arc::new(NodeClient::new());
        let predictor = Arc::new(PredictOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&client),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            prober: HealthProber::new(Arc::clone(&registry), Arc::clone(&client)),
            training: TrainingManager::new(Arc::clone(&registry), Arc::clone(&client)),
            automated: AutomatedPredictManager::new(Arc::clone(&predictor)),
            summaries: SummaryStore::new(),
            predictor,
            registry,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn prober(&self) -> &HealthProber {
        &self.prober
    }

    pub fn predictor(&self) -> &PredictOrchestrator {
        &self.predictor
    }

    pub fn training(&self) -> &TrainingManager {
        &self.training
    }

    pub fn automated(&self) -> &AutomatedPredictManager {
        &self.automated
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.summaries
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
