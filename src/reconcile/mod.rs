//! Rule reconciliation against running processes

mod pass;
mod scheduler;

pub use pass::*;
pub use scheduler::*;
