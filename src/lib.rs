//! azvmss
//!
//! Manage Linux virtual machine scale sets on Azure from a flat YAML or JSON
//! description: validate it, create, read back, update in place, delete or
//! import an existing scale set.

pub mod azure;
pub mod compute;
pub mod config;
pub mod state;

/// Version injected at compile time via AZVMSS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZVMSS_VERSION") {
    Some(v) => v,
    None => "dev",
};
