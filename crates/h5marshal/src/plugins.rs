//! Plugin registration contract.
//!
//! A plugin hands a set of marshallers to a [`MarshallerCollection`] for a
//! given marshaller API version. How plugins are discovered is up to the
//! embedding application; this module only defines what a plugin provides.
//!
//! [`MarshallerCollection`]: crate::marshal::MarshallerCollection

use std::sync::Arc;

use crate::marshal::Marshaller;

/// Marshaller API versions this crate accepts from plugins.
pub fn supported_marshaller_api_versions() -> &'static [&'static str] {
    &["1.0"]
}

/// A source of marshallers for the plugin tier.
pub trait MarshallerPlugin {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Marshaller API version the plugin was written against.
    fn api_version(&self) -> &str;

    fn marshallers(&self) -> Vec<Arc<dyn Marshaller>>;
}
