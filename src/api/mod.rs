//! HTTP API handlers

pub mod compare;
pub mod health;
pub mod progress;
