//! Flow Core - Value-level building blocks for the flow graph runtime.
//!
//! This crate provides the types that values travel in: indexable names,
//! identifiers, type names, the erased value container, and the runtime
//! type-conversion registry. It knows nothing about graphs or scheduling.

pub mod convert;
pub mod error;
pub mod logging;
pub mod types;
pub mod value;

pub use convert::{register_numeric_conversions, ConversionRegistry, ConvertFn};
pub use error::{panic_message, FlowError};
pub use types::id::{ConnectionId, GraphId, NodeId};
pub use types::name::IndexableName;
pub use types::type_name::{normalize_type_name, TypeName, ANY_TYPE};
pub use value::{
    cast_value, make_bound_value, make_duration_value, make_unique_value, make_value, BoundValue,
    NodeValue, OwnedValue, Render, SharedValue, TimeUnit, TypedValue, UniqueValue,
};
