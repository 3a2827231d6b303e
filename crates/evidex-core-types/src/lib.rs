//! Core types shared across Evidex facilities
//!
//! This crate provides foundational types used by the error, logging and
//! storage facilities:
//!
//! - **Identity types**: InvestigationId, SessionId, InvestigationContext
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{InvestigationContext, InvestigationId, SessionId};
