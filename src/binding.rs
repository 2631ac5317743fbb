//! BindingManager (C9): per-binding-domain legal id sets and cached base
//! paths, read by the scheduling policy to enumerate virtual binding
//! targets. See `SPEC_FULL.md §4.9`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::resource::{LookupMode, ResourceAccounter, ResourcePath, ResourceType};

struct Domain {
    base_path: ResourcePath,
    legal_ids: Vec<i32>,
}

/// At platform-ready time, resolves the legal physical ids for each
/// configured binding-domain type (default `cpu`) and caches them here so
/// the policy doesn't re-walk the tree on every binding decision.
pub struct BindingManager {
    domains: RwLock<HashMap<ResourceType, Domain>>,
}

impl BindingManager {
    pub fn new() -> Self {
        BindingManager {
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `base_path` (a type-only template, e.g. `sys.cpu`) against
    /// `accounter`'s tree and records the physical ids found for `domain`.
    pub fn register_domain(&self, accounter: &ResourceAccounter, domain: ResourceType, base_path: ResourcePath) {
        let hits = accounter.resolve_with_paths(&base_path, LookupMode::Type);
        let mut ids: Vec<i32> = hits.iter().filter_map(|(path, _)| path.id_of(domain)).filter(|id| *id >= 0).collect();
        ids.sort_unstable();
        ids.dedup();
        self.domains.write().insert(domain, Domain { base_path, legal_ids: ids });
    }

    pub fn legal_ids(&self, domain: ResourceType) -> Vec<i32> {
        self.domains
            .read()
            .get(&domain)
            .map(|d| d.legal_ids.clone())
            .unwrap_or_default()
    }

    pub fn base_path(&self, domain: ResourceType) -> Option<ResourcePath> {
        self.domains.read().get(&domain).map(|d| d.base_path.clone())
    }

    pub fn is_legal(&self, domain: ResourceType, id: i32) -> bool {
        self.domains
            .read()
            .get(&domain)
            .map(|d| d.legal_ids.contains(&id))
            .unwrap_or(false)
    }
}

impl Default for BindingManager {
    fn default() -> Self {
        Self::new()
    }
}
