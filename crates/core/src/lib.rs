#![warn(clippy::all, missing_docs)]

//! Core of the ETCS movement-authority simulator.
//!
//! Trains walk itineraries over a shared track graph. Segment occupancy
//! lives in file-backed cells; under centralized control every advance is
//! also arbitrated by an authority server reached over a Unix socket.

pub mod authority;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod journal;
pub mod map;
pub mod models;
pub mod segment;
pub mod supervisor;
pub mod train;

pub use config::{AppConfig, ControlLevel};
pub use error::{ControlError, ControlResult};
pub use models::{Itinerary, Position};
pub use segment::SegmentStore;
pub use supervisor::{RunReport, Supervisor};
pub use train::{Train, TrainReport, TrainState};
