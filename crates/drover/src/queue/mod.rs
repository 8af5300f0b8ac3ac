pub mod gang;
pub mod multilevel;
pub mod priority;

pub use gang::{Gang, PlacementConstraints, TaskDesc};
pub use multilevel::MultiLevelList;
pub use priority::PriorityGangQueue;
