//! Wire contract for the servo optimization agent.
//!
//! Two protocols meet here:
//!
//! - **Service protocol**: the agent POSTs JSON events (`HELLO`, `WHATS_NEXT`,
//!   `MEASUREMENT`, ...) to the optimization service and receives commands
//!   (`DESCRIBE`, `MEASURE`, `ADJUST`, `SLEEP`, `EXIT`) in return.
//! - **Driver protocol**: drivers are separate executables that take a JSON
//!   request on stdin and stream line-delimited JSON on stdout; lines carrying
//!   a `progress` key are progress records, the remaining line is the final
//!   response.
//!
//! This crate holds the types and canonical constants for both sides. No I/O.

pub mod defaults;
pub mod types;

pub use types::{
    Command, CommandEnvelope, DriverInfo, DriverResponse, Event, ProgressRecord, StopMode,
};
