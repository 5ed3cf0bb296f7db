//! Aether Core
//!
//! Core types shared by the Aether deployment worker and reverse proxy.
//!
//! This crate contains:
//! - Domain types: deployment jobs, deployment states, outcomes
//! - DTOs: payloads exchanged over the proxy and job-intake HTTP surfaces

pub mod domain;
pub mod dto;
