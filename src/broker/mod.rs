//! Context broker transport

mod client;

pub use client::{BrokerClient, PatchOutcome};
