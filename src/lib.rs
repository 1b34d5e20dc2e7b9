//! Study bridge - live feedback client for the assistant preference study
//!
//! Keeps one WebSocket session open to the assistant bridge service and
//! drives the Phase II exchange: hello, method, then repeated
//! context → response → feedback turns on the image the participant is
//! looking at.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod connection;
pub mod protocol;
pub mod runtime;
pub mod selection;
pub mod state_machine;
pub mod transcript;
