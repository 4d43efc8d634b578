//! Dispatcher data models.

pub mod job;
pub mod push_event;
