//! Marshaller registry and dispatch.
//!
//! A [`MarshallerCollection`] holds marshallers in three tiers (builtin,
//! plugin, user) and resolves runtime values, stored type tags and target
//! classes to one of them. Resolution tables are rebuilt on every change:
//!
//! - tiers are visited in priority order, and the first tier declaring a key wins
//! - within a tier, the latest registration wins
//! - values resolve by their lineage, most specific type first
//!
//! A marshaller whose required capabilities are not all available is kept,
//! but wrapped so that reads go through [`Marshaller::read_approximate`].

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::error::{MarshalError, Result};
use crate::marshal::{register_builtins, Marshaller, MarshallerDescriptor};
use crate::model::Value;
use crate::options::Tier;
use crate::plugins::{supported_marshaller_api_versions, MarshallerPlugin};
use crate::session::Session;
use crate::storage::NodeId;

/// Capabilities available to the built-in marshallers.
pub const BUILTIN_CAPABILITIES: [&str; 1] = ["fractions"];

// =============================================================================
// DEGRADED MARSHALLER
// =============================================================================

/// Stand-in for a marshaller whose capabilities are missing.
struct Approximate {
    inner: Arc<dyn Marshaller>,
    missing: Vec<String>,
}

impl Marshaller for Approximate {
    fn descriptor(&self) -> &MarshallerDescriptor {
        self.inner.descriptor()
    }

    fn write(
        &self,
        session: &mut Session<'_>,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>> {
        self.inner.write(session, parent, name, value)
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        self.inner.write_metadata(session, node, value)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        debug!(missing = ?self.missing, "approximate read");
        self.inner.read_approximate(session, node)
    }

    fn read_approximate(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        self.inner.read_approximate(session, node)
    }
}

// =============================================================================
// COLLECTION
// =============================================================================

/// Tiered set of marshallers with resolution tables.
#[derive(Clone)]
pub struct MarshallerCollection {
    tiers: [Vec<Arc<dyn Marshaller>>; 3],
    priority: Vec<Tier>,
    capabilities: FxHashSet<String>,
    by_type: FxHashMap<String, Arc<dyn Marshaller>>,
    by_tag: FxHashMap<String, Arc<dyn Marshaller>>,
    by_class: FxHashMap<String, Arc<dyn Marshaller>>,
}

impl Default for MarshallerCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MarshallerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort();
        f.debug_struct("MarshallerCollection")
            .field("priority", &self.priority)
            .field("types", &types)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl MarshallerCollection {
    /// Creates an isolated collection holding the built-in marshallers.
    pub fn new() -> Self {
        let mut collection = Self::empty();
        register_builtins(&mut collection);
        collection
    }

    /// Creates an isolated collection with no marshallers.
    pub fn empty() -> Self {
        Self {
            tiers: [Vec::new(), Vec::new(), Vec::new()],
            priority: Tier::ALL.to_vec(),
            capabilities: BUILTIN_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            by_type: FxHashMap::default(),
            by_tag: FxHashMap::default(),
            by_class: FxHashMap::default(),
        }
    }

    /// Adds a marshaller to a tier. It shadows earlier registrations of the
    /// same types in that tier.
    pub fn register(&mut self, marshaller: Arc<dyn Marshaller>, tier: Tier) {
        self.tiers[tier.index()].push(marshaller);
        self.rebuild();
    }

    /// Registers every marshaller a plugin provides into the plugin tier.
    pub fn load_plugin(&mut self, plugin: &dyn MarshallerPlugin) -> Result<()> {
        let version = plugin.api_version();
        if !supported_marshaller_api_versions().iter().any(|v| *v == version) {
            return Err(MarshalError::UnsupportedApiVersion {
                version: version.to_string(),
            });
        }
        let marshallers = plugin.marshallers();
        debug!(plugin = plugin.name(), count = marshallers.len(), "loading plugin");
        self.tiers[Tier::Plugin.index()].extend(marshallers);
        self.rebuild();
        Ok(())
    }

    /// Sets tier priority; earlier tiers win. Missing tiers follow in their
    /// default order and duplicates are ignored.
    pub fn set_priority(&mut self, order: &[Tier]) {
        let mut priority: Vec<Tier> = Vec::with_capacity(Tier::ALL.len());
        for tier in order.iter().chain(Tier::ALL.iter()) {
            if !priority.contains(tier) {
                priority.push(*tier);
            }
        }
        self.priority = priority;
        self.rebuild();
    }

    pub fn priority(&self) -> &[Tier] {
        &self.priority
    }

    /// Marks an optional capability as available.
    pub fn provide_capability(&mut self, capability: impl Into<String>) {
        self.capabilities.insert(capability.into());
        self.rebuild();
    }

    /// Marks an optional capability as unavailable.
    pub fn withdraw_capability(&mut self, capability: &str) {
        self.capabilities.remove(capability);
        self.rebuild();
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Marshallers registered in a tier, in registration order.
    pub fn tier(&self, tier: Tier) -> &[Arc<dyn Marshaller>] {
        &self.tiers[tier.index()]
    }

    fn rebuild(&mut self) {
        self.by_type.clear();
        self.by_tag.clear();
        self.by_class.clear();
        for tier in self.priority.clone() {
            for marshaller in self.tiers[tier.index()].iter().rev() {
                let entry = self.negotiate(marshaller);
                let descriptor = marshaller.descriptor();
                for type_path in &descriptor.types {
                    self.by_type
                        .entry(type_path.clone())
                        .or_insert_with(|| entry.clone());
                }
                for tag in &descriptor.tags {
                    self.by_tag.entry(tag.clone()).or_insert_with(|| entry.clone());
                }
                for class in &descriptor.classes {
                    self.by_class
                        .entry(class.clone())
                        .or_insert_with(|| entry.clone());
                }
            }
        }
    }

    fn negotiate(&self, marshaller: &Arc<dyn Marshaller>) -> Arc<dyn Marshaller> {
        let missing: Vec<String> = marshaller
            .descriptor()
            .required_capabilities
            .iter()
            .filter(|c| !self.capabilities.contains(*c))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Arc::clone(marshaller);
        }
        warn!(
            types = ?marshaller.descriptor().types,
            missing = ?missing,
            "capabilities unavailable, reads will be approximate"
        );
        Arc::new(Approximate {
            inner: Arc::clone(marshaller),
            missing,
        })
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Marshaller for a runtime value: the first type of its lineage with a
    /// registered marshaller.
    pub fn resolve_for_value(&self, value: &Value) -> Result<Arc<dyn Marshaller>> {
        value
            .lineage()
            .iter()
            .find_map(|type_path| self.by_type.get(type_path))
            .cloned()
            .ok_or_else(|| MarshalError::unsupported(value.type_path()))
    }

    pub fn resolve_for_tag(&self, tag: &str) -> Result<Arc<dyn Marshaller>> {
        self.lookup_tag(tag)
            .ok_or_else(|| MarshalError::unsupported(format!("type tag {:?}", tag)))
    }

    pub fn resolve_for_target_class(&self, class: &str) -> Result<Arc<dyn Marshaller>> {
        self.lookup_class(class)
            .ok_or_else(|| MarshalError::unsupported(format!("target class {:?}", class)))
    }

    pub fn lookup_tag(&self, tag: &str) -> Option<Arc<dyn Marshaller>> {
        self.by_tag.get(tag).cloned()
    }

    pub fn lookup_class(&self, class: &str) -> Option<Arc<dyn Marshaller>> {
        self.by_class.get(class).cloned()
    }

    /// Whether a runtime type identity has a marshaller.
    pub fn handles_type(&self, type_path: &str) -> bool {
        self.by_type.contains_key(type_path)
    }
}

// =============================================================================
// SHARED DEFAULT
// =============================================================================

lazy_static! {
    static ref DEFAULT_COLLECTION: RwLock<Arc<MarshallerCollection>> =
        RwLock::new(Arc::new(MarshallerCollection::new()));
}

/// The process-wide collection, built on first use. [`crate::Options`]
/// captures it when constructed.
pub fn default_collection() -> Arc<MarshallerCollection> {
    DEFAULT_COLLECTION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replaces the process-wide collection with a modified copy. Options built
/// earlier keep the collection they captured.
pub fn update_default_collection(update: impl FnOnce(&mut MarshallerCollection)) {
    let mut guard = DEFAULT_COLLECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let mut collection = MarshallerCollection::clone(&guard);
    update(&mut collection);
    *guard = Arc::new(collection);
}

/// Restores the process-wide collection to the built-ins.
pub fn reset_default_collection() {
    let mut guard = DEFAULT_COLLECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *guard = Arc::new(MarshallerCollection::new());
}
