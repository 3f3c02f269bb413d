//! One-time scheduled invocations.
//!
//! [`ScheduleService`] manages the rows; [`ScheduleEngine`] claims due rows
//! and drives them through the invocation dispatcher.

pub mod engine;
pub mod schedule;
pub mod service;

pub use engine::ScheduleEngine;
pub use schedule::{CreateScheduleRequest, Schedule};
pub use service::ScheduleService;
