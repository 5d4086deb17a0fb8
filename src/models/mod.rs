//! Domain model module declarations.

pub mod action;
pub mod context;
pub mod iteration;
pub mod pool;
pub mod session;
pub mod step;
pub mod task;
pub mod transcript;
