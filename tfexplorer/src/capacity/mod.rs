/// The capacity planner, tying pools to the escrow.
pub mod planner;
/// Capacity pools.
pub mod pool;
/// Signed requests to buy capacity.
pub mod reservation;
/// Resource and cloud units.
pub mod units;

pub use planner::{CapacityEscrow, FreeEscrow, Planner, ReservationPayment};
pub use pool::Pool;
pub use reservation::{CapacityReservation, ReservationData};
pub use units::{CloudUnits, ResourceUnits};
