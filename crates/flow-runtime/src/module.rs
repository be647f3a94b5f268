//! Module host interface.
//!
//! A module bundles node classes and conversions behind a pair of
//! registration entry points. The host side here is loader-agnostic: a
//! dynamic-library loader resolves the C-ABI entry points named below and
//! adapts them to the `Module` trait; in-process plugins implement the
//! trait directly.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use flow_core::FlowError;

use crate::factory::NodeFactory;

/// Name of the C-ABI entry point a module exports for registration.
pub const REGISTER_MODULE_FUNC: &str = "RegisterModule";

/// Name of the C-ABI entry point a module exports for unregistration.
pub const UNREGISTER_MODULE_FUNC: &str = "UnregisterModule";

/// Strict `MAJOR.MINOR.PATCH` module version. Decimal components only, no
/// prerelease tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModuleVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ModuleVersion {
    /// Creates a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModuleVersion {
    type Err = FlowError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || FlowError::Module {
            message: format!("invalid version '{text}', expected MAJOR.MINOR.PATCH"),
        };

        let mut parts = text.split('.');
        let mut component = || {
            parts
                .next()
                .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|part| part.parse::<u64>().ok())
        };

        let major = component().ok_or_else(invalid)?;
        let minor = component().ok_or_else(invalid)?;
        let patch = component().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl Serialize for ModuleVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(|error| D::Error::custom(format!("{error}")))
    }
}

/// Metadata describing a module, parsed from its `module.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: ModuleVersion,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "Description")]
    pub description: String,
}

impl ModuleManifest {
    /// Parses a manifest from `module.json` text.
    pub fn from_json(text: &str) -> Result<Self, FlowError> {
        serde_json::from_str(text).map_err(|error| FlowError::Module {
            message: format!("invalid module manifest: {error}"),
        })
    }
}

/// A loadable bundle of node classes and conversions.
pub trait Module: Send + Sync {
    /// The module's metadata.
    fn manifest(&self) -> &ModuleManifest;

    /// Registers the module's node classes and conversions.
    fn register(&self, factory: &NodeFactory);

    /// Removes the module's node classes.
    fn unregister(&self, factory: &NodeFactory);
}
