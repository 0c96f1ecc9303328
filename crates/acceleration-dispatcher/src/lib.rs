//! Acceleration dispatcher for the acceleration runtime
//!
//! This crate decides, per operation, which registered backend should run it,
//! executes it there and falls back to the baseline path when the backend is
//! missing, unsupported or failing. Lifecycle events are pushed to observers.

pub mod backend;
pub mod backends;
pub mod baseline;
pub mod cost;
pub mod dispatcher;
pub mod events;
pub mod metrics;
pub mod operation;
pub mod result;
pub mod state;

// Re-export commonly used types
pub use backend::AccelerationBackend;
pub use backends::SimulatedBackend;
pub use baseline::{BaselineExecutor, ReferenceBaseline};
pub use cost::{CostModel, HeuristicCostModel};
pub use dispatcher::AccelerationDispatcher;
pub use events::{AccelerationEvent, AccelerationObserver, ChannelObserver, ObserverSet};
pub use metrics::{DispatchMetrics, MetricsRecorder};
pub use operation::{EmbeddingRequest, InferenceRequest, Operation, OperationOutput, TensorOperation};
pub use result::{AccelerationResult, BatchError, BatchResult};
pub use state::DispatcherState;
