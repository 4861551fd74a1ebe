use crate::capacity::planner::{CapacityEscrow, Planner, ReservationPayment};
use crate::capacity::pool::Pool;
use crate::capacity::reservation::CapacityReservation;
use crate::store::{CapacityReservationStore, PoolStore};
use crate::workloads::types::{Workload, WorkloadResult};
use crate::{ExplorerResult, Id};
use actix::prelude::*;
use futures::stream;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<ReservationPayment>")]
/// Message to store a capacity reservation and set up its payment.
pub struct Reserve {
    /// The reservation, with verified signatures.
    pub reservation: CapacityReservation,
    /// Currency codes the customer is willing to pay with.
    pub currencies: Vec<String>,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<bool>")]
/// Message to check if a workload can be funded by its pool.
pub struct IsAllowed {
    /// The workload to check.
    pub workload: Workload,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<bool>")]
/// Message to check if the pool of a workload can still run long enough.
pub struct HasCapacity {
    /// The workload to check.
    pub workload: Workload,
    /// Seconds the pool must be able to run. The configured minimum pool lifetime is used if
    /// this is not set.
    pub min_seconds: Option<i64>,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<Pool>")]
/// Message to start consuming capacity for a workload.
pub struct AddUsedCapacity {
    /// The deployed workload.
    pub workload: Workload,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<Pool>")]
/// Message to stop consuming capacity for a workload.
pub struct RemoveUsedCapacity {
    /// The removed workload.
    pub workload: Workload,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<(Workload, Pool)>")]
/// Message to record the deployment result of a workload, and update its pool accordingly.
/// Answers with the updated workload and pool.
pub struct ApplyResult {
    /// The workload the result is for.
    pub workload: Workload,
    /// The result reported by the node.
    pub result: WorkloadResult,
}

#[derive(Debug, Message)]
#[rtype(result = "ExplorerResult<Pool>")]
/// Message to load a pool.
pub struct GetPool {
    /// Id of the pool.
    pub id: Id,
}

/// Actor owning the capacity planner. Pool mutations are handled atomically, and reservations
/// reported as paid by the escrow are added to their pool as they come in.
pub struct PlannerActor<S, E> {
    planner: Arc<Planner<S, E>>,
    paid: Option<mpsc::Receiver<Id>>,
}

impl<S, E> PlannerActor<S, E> {
    /// Create a new actor. Paid reservation ids are consumed from `paid` once the actor is
    /// started.
    pub fn new(planner: Planner<S, E>, paid: mpsc::Receiver<Id>) -> Self {
        PlannerActor {
            planner: Arc::new(planner),
            paid: Some(paid),
        }
    }
}

impl<S, E> Actor for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(paid) = self.paid.take() {
            debug!("planner actor started, listening for paid capacity");
            ctx.add_stream(stream::unfold(paid, |mut rx| async move {
                rx.recv().await.map(|id| (id, rx))
            }));
        }
    }
}

impl<S, E> StreamHandler<Id> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    fn handle(&mut self, reservation_id: Id, ctx: &mut Self::Context) {
        let planner = self.planner.clone();
        ctx.wait(
            async move { planner.apply_paid_capacity(reservation_id).await }
                .into_actor(self)
                .map(move |res, _, _| {
                    if let Err(e) = res {
                        error!(
                            "could not add paid capacity of reservation {}: {}",
                            reservation_id, e
                        );
                    }
                }),
        );
    }

    fn finished(&mut self, _: &mut Self::Context) {
        // the escrow is gone, the actor keeps serving the other messages
        debug!("paid capacity stream closed");
    }
}

impl<S, E> Handler<Reserve> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = ResponseFuture<ExplorerResult<ReservationPayment>>;

    fn handle(&mut self, msg: Reserve, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        Box::pin(async move { planner.reserve(msg.reservation, &msg.currencies).await })
    }
}

impl<S, E> Handler<IsAllowed> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = ResponseFuture<ExplorerResult<bool>>;

    fn handle(&mut self, msg: IsAllowed, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        Box::pin(async move { planner.is_allowed(&msg.workload).await })
    }
}

impl<S, E> Handler<HasCapacity> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = ResponseFuture<ExplorerResult<bool>>;

    fn handle(&mut self, msg: HasCapacity, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        Box::pin(async move {
            match msg.min_seconds {
                Some(min_seconds) => planner.has_capacity(&msg.workload, min_seconds).await,
                None => planner.has_minimum_capacity(&msg.workload).await,
            }
        })
    }
}

impl<S, E> Handler<AddUsedCapacity> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = AtomicResponse<Self, ExplorerResult<Pool>>;

    fn handle(&mut self, msg: AddUsedCapacity, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        AtomicResponse::new(Box::pin(
            async move { planner.add_used_capacity(&msg.workload).await }.into_actor(self),
        ))
    }
}

impl<S, E> Handler<RemoveUsedCapacity> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = AtomicResponse<Self, ExplorerResult<Pool>>;

    fn handle(&mut self, msg: RemoveUsedCapacity, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        AtomicResponse::new(Box::pin(
            async move { planner.remove_used_capacity(&msg.workload).await }.into_actor(self),
        ))
    }
}

impl<S, E> Handler<ApplyResult> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = AtomicResponse<Self, ExplorerResult<(Workload, Pool)>>;

    fn handle(&mut self, msg: ApplyResult, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        let ApplyResult {
            mut workload,
            result,
        } = msg;
        AtomicResponse::new(Box::pin(
            async move {
                let pool = planner.apply_workload_result(&mut workload, result).await;
                pool.map(|pool| (workload, pool))
            }
            .into_actor(self),
        ))
    }
}

impl<S, E> Handler<GetPool> for PlannerActor<S, E>
where
    S: PoolStore + CapacityReservationStore + 'static,
    E: CapacityEscrow + 'static,
{
    type Result = ResponseFuture<ExplorerResult<Pool>>;

    fn handle(&mut self, msg: GetPool, _: &mut Self::Context) -> Self::Result {
        let planner = self.planner.clone();
        Box::pin(async move { planner.pool(msg.id).await })
    }
}
