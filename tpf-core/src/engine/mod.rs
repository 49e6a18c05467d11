//! Fan control engine modules
//!
//! Contains the trip-point hysteresis controller.

mod hysteresis;

pub use hysteresis::{clamp_poll_interval, HysteresisController, PollDecision, PollReport};
