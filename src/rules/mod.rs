//! Persistent process affinity rules
//!
//! Rules map a normalized process name to an affinity mask. They live in a
//! rule-table file and two registry-equivalent scopes, resolved in that
//! order by [`RuleStore`].

mod export;
mod normalize;
mod registry;
mod store;
mod table;

pub use export::*;
pub use normalize::normalize_process_name;
pub use registry::*;
pub use store::*;
pub use table::*;
