//! Microsoft.Compute virtual machine scale sets
//!
//! - `schema`: the flat configuration users write
//! - `models`: the nested API objects
//! - `validate`: field and cross-field checks
//! - `expand` / `flatten`: conversions between the two shapes
//! - `scale_set`: the lifecycle handler

pub mod expand;
pub mod flatten;
pub mod ids;
pub mod models;
pub mod scale_set;
pub mod schema;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use ids::ScaleSetId;
pub use scale_set::{HandlerOptions, ScaleSetHandler, ScaleSetState, Timeouts, API_VERSION};
pub use schema::LinuxVirtualMachineScaleSetConfig;
