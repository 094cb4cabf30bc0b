//! Communication backends, the request-tracking exchange and scheduled
//! patch ordering.

pub mod communicator;
pub mod exchange;
pub mod schedule;

pub use communicator::{Communicator, NoComm, ThreadComm};
pub use exchange::{CommsType, Exchange, ParallelConfig, PatchExchange};
pub use schedule::{CommsSchedule, CouplingGraph, ScheduleStep};
