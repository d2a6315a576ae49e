//! Domain model module declarations.

pub mod event;
pub mod history;
pub mod message;
pub mod session;
