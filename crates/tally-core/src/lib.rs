pub mod blob;
pub mod context;
pub mod counter;
pub mod list;

pub use context::{CausalContext, Dot, ReplicaId};
pub use counter::{Counter, DotStore};
pub use list::ReplicatedList;
