/// The lifecycle state machine of reservations and workloads.
pub mod pipeline;
/// Workload and reservation types.
pub mod types;

pub use pipeline::{Pipeline, Pipelined, ReservationPipeline, WorkloadPipeline};
pub use types::{
    Contract, NextAction, Reservation, ResultState, SigningRequest, SigningSignature, State,
    Workload, WorkloadData, WorkloadResult, WorkloadType,
};
