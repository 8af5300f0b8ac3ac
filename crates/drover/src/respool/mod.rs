pub mod arena;
pub mod config;
pub mod pool;

pub use arena::{PoolArena, PoolIdx};
pub use config::{ResourcePoolConfig, SchedulingPolicy, ROOT_POOL_ID};
pub use pool::ResPool;
