#![doc = include_str!("../README.md")]
// Declare modules
pub mod call;
pub mod error;
pub mod iterator;
pub mod map;
pub mod reduce;
pub mod registry;
pub mod select;
pub mod telemetry;
pub mod top;
pub mod types;
pub mod value;

/// Parsed aggregate call and its argument expressions.
pub use crate::call::{Call, Expr};
/// Error type for dispatch and reduce operations.
pub use crate::error::AggError;
/// Cursor over one shard's points, plus an in-memory implementation.
pub use crate::iterator::{MemoryIterator, PointIterator};
/// Partial aggregate produced per shard.
pub use crate::map::MapOutput;
/// Final merged result of an aggregate.
pub use crate::reduce::ReduceOutput;
/// Dispatcher resolving calls to map/reduce functions.
pub use crate::registry::{
    initialize_map_func, initialize_reduce_func, FunctionRegistry, MapFunc, ReduceFunc,
    RegistryConfig,
};
/// Partial selection of a sorted window.
pub use crate::select::get_sorted_range;
/// Structured event hook for observability.
pub use crate::telemetry::{AggEvent, AggEventListener};
/// Input point and ranked output point.
pub use crate::types::{Point, PositionPoint};
/// Type alias for a set of tags (key-value pairs) identifying a series.
pub use crate::types::TagSet;
/// Type alias for a timestamp (nanoseconds since epoch).
pub use crate::types::Timestamp;
/// Dynamically typed field value.
pub use crate::value::Variant;
