pub mod hash;
pub mod ring;
pub mod topology;

pub use hash::KeyHash;
pub use ring::{HashRing, RingError, RingNode, RingService};
pub use topology::{NeighborTopology, TopologyEntry};
