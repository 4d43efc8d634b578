//! Job lifecycle events.
//!
//! The supervisor is the only producer. Each applied event is written to
//! the structured log sink, which is the dispatcher's observability surface.

pub mod job;
