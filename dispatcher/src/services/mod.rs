//! Dispatcher services: validation, command construction, execution, supervision.

pub mod command_builder;
pub mod executor;
pub mod output;
pub mod signature;
pub mod supervisor;
pub mod validator;
