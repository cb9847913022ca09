//! Shards and the logical indexes built from them.

pub mod accessor;
pub mod directory;
pub mod document;
pub mod io_strategy;
pub mod logical;
pub mod manager;
pub mod schema;
pub mod shard;
pub mod sharding;

pub use accessor::IndexAccessor;
pub use document::StoredDocument;
pub use logical::{IndexStatus, LogicalIndex, ShardState, ShardStatus, StartupMode};
pub use manager::IndexManager;
pub use shard::Shard;
pub use sharding::{
    ExplicitShardingStrategy, HashShardingStrategy, NoShardingStrategy, ShardingStrategy,
    ShardingStrategyInitializationContext,
};
