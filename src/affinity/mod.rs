//! Affinity mask encoding, CPU list parsing and mask analysis
//!
//! Conversions between 64-bit masks and CPU id sets, text parsing for user
//! input, hyperthread collision checks and origin classification.

mod classify;
mod collision;
mod cpulist;
mod mask;

pub use classify::*;
pub use collision::*;
pub use cpulist::*;
pub use mask::*;
