//! ensemble: fan-out orchestrator for time-series anomaly prediction nodes.

mod discharge;
mod error;
mod health;
mod parser;
mod registry;
mod summary;
mod version;
mod voting;

pub mod automated;
pub mod client;
pub mod config;
pub mod predict;
pub mod service;
pub mod training;
pub mod transport;

pub use automated::{AutomatedPredictManager, Thresholds};
pub use client::{NodeClient, NodeError, NodeResponse, PredictionWindow};
pub use discharge::{Discharge, Signal};
pub use error::OrchestratorError;
pub use health::{HealthProber, HealthReport, ModelHealth};
pub use parser::{ParseError, SensorFile, parse_discharge};
pub use predict::{ModelResult, PredictOrchestrator, PredictOutcome, PredictionRequest};
pub use registry::{
    ConfigSnapshot, NodeDescriptor, NodeUpdate, Registry, Timeouts, TimeoutsUpdate,
};
pub use service::OrchestratorService;
pub use summary::{MAX_SUMMARIES, SummaryStore};
pub use training::{BatchReport, FinishReport, StartReport, TrainReport, TrainingManager};
pub use version::{ENSEMBLE_VERSION, NODE_PROTOCOL_VERSION, VersionInfo};
pub use voting::{Vote, VoteOutcome, VoteTally, tally};
