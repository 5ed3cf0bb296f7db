//! Core domain types
//!
//! These types describe one deployment from the moment a job is queued
//! until its outcome is handed back to the job system.

pub mod job;
pub mod outcome;
pub mod state;
