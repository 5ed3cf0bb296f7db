//! Data Transfer Objects
//!
//! Payloads for the proxy status endpoint and the job-intake API.

pub mod job;
pub mod proxy;
