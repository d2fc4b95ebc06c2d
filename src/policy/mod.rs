//! Affinity policy: workload classification, node selection and applying
//! CPU selections

mod apply;
mod assignment;
mod workload;

pub use apply::*;
pub use assignment::*;
pub use workload::*;
