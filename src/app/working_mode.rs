//! Application Working Mode (C5): the per-round resource request, and the
//! binding machinery that turns a template request into a concrete
//! candidate-resource assignment. See `SPEC_FULL.md §4.5`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{AppError, AppResult};
use crate::resource::{
    LookupMode, ResourceAccounter, ResourceAssignmentRequest, ResourcePath, ResourceType, ANY,
};
use crate::ids::ViewToken;

use super::recipe::RecipeAwm;

/// A resolved set of physical bindings for one round, keyed by a hash of the
/// binding chain that produced it (`prior_ref`, `type`, `src_id`, `dst_id`).
#[derive(Clone, Default)]
struct CandidateBinding {
    /// Template path → bound path, for every request this AWM carries.
    bound: HashMap<ResourcePath, ResourcePath>,
}

struct MaskState {
    mask: HashMap<ResourceType, u64>,
    prev_mask: HashMap<ResourceType, u64>,
    changed: bool,
}

/// One alternative resource configuration an [`crate::app::Application`] may
/// run under. Immutable id/value/request map; mutable per-round candidate
/// bindings and the resource-type occupancy bitmasks used to detect
/// reshuffling (`§4.5`, `§4.6`).
pub struct WorkingMode {
    id: u32,
    value: f64,
    requests: HashMap<ResourcePath, u64>,
    hidden: AtomicBool,
    candidates: Mutex<HashMap<u64, CandidateBinding>>,
    sync_binding: Mutex<Option<u64>>,
    mask_state: Mutex<MaskState>,
}

impl WorkingMode {
    pub fn from_recipe(awm: &RecipeAwm) -> Self {
        WorkingMode {
            id: awm.id,
            value: awm.value,
            requests: awm.requests.clone(),
            hidden: AtomicBool::new(false),
            candidates: Mutex::new(HashMap::new()),
            sync_binding: Mutex::new(None),
            mask_state: Mutex::new(MaskState {
                mask: HashMap::new(),
                prev_mask: HashMap::new(),
                changed: false,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    pub fn requests(&self) -> &HashMap<ResourcePath, u64> {
        &self.requests
    }

    /// Adds a template request, concatenating `system_prefix` (e.g. `sys0`)
    /// ahead of `path` so every request is cluster-scoped, per the original
    /// implementation's convention (`SPEC_FULL.md` supplemental features).
    pub fn add_request(&mut self, system_prefix: &ResourcePath, path: &ResourcePath, amount: u64) {
        let mut full = system_prefix.clone();
        for seg in path.segments() {
            let _ = full.append(seg.ty, seg.id);
        }
        self.requests.insert(full, amount);
    }

    /// An AWM is schedulable if it is not hidden and carries at least one
    /// request, and every request's matched resources can in principle carry
    /// the requested amount. Requests are cluster-scoped (a concrete `sys0`
    /// segment) with the remaining segments left as templates for the binder
    /// to fill in; matching here uses the same `Mixed` lookup the binder
    /// itself resolves candidates with. An AWM found to exceed the system's
    /// total capacity is marked hidden so later calls short-circuit.
    pub fn validate(&self, accounter: &ResourceAccounter) -> bool {
        if self.hidden.load(Ordering::Relaxed) || self.requests.is_empty() {
            return false;
        }
        for (path, amount) in &self.requests {
            let total: u64 = accounter.resolve(path, LookupMode::Mixed).iter().map(|r| r.total()).sum();
            if total < *amount {
                self.set_hidden(true);
                return false;
            }
        }
        true
    }

    /// Replaces `ty`'s id across every request path, chaining from
    /// `prior_ref` (or the identity binding when `None`). `src_id` of [`ANY`]
    /// matches any id already present. Returns the new binding's reference
    /// number, stable for the same `(prior_ref, ty, src_id, dst_id)` tuple.
    pub fn bind(&self, ty: ResourceType, src_id: i32, dst_id: i32, prior_ref: Option<u64>) -> u64 {
        let mut candidates = self.candidates.lock();
        let base: HashMap<ResourcePath, ResourcePath> = match prior_ref.and_then(|r| candidates.get(&r)) {
            Some(c) => c.bound.clone(),
            None => self.requests.keys().map(|p| (p.clone(), p.clone())).collect(),
        };

        let mut bound = HashMap::with_capacity(base.len());
        for (template, mut path) in base {
            let _ = path.replace_id(ty, src_id, dst_id);
            bound.insert(template, path);
        }

        let refn = hash_binding(prior_ref, ty, src_id, dst_id);
        candidates.insert(refn, CandidateBinding { bound });
        refn
    }

    /// Resolves candidate bindings `refn` against the accounter's tree,
    /// selects it as this round's `sync_binding`, and recomputes the
    /// per-type occupancy bitmask, setting `changed` if it differs from the
    /// previous round's.
    pub fn set_resource_binding(
        &self,
        accounter: &ResourceAccounter,
        fill_policy: crate::resource::FillPolicy,
        refn: u64,
    ) -> AppResult<Vec<ResourceAssignmentRequest>> {
        let bound = {
            let candidates = self.candidates.lock();
            candidates.get(&refn).ok_or(AppError::WmNotFound)?.bound.clone()
        };

        let mut out = Vec::with_capacity(bound.len());
        let mut new_mask: HashMap<ResourceType, u64> = HashMap::new();
        for (template, path) in &bound {
            let amount = *self.requests.get(template).ok_or(AppError::WmNotFound)?;
            let candidate_resources = accounter.resolve(path, LookupMode::Mixed);
            if candidate_resources.is_empty() {
                return Err(AppError::WmRejected);
            }
            for seg in path.segments() {
                if seg.id >= 0 {
                    if seg.id < 64 {
                        *new_mask.entry(seg.ty).or_insert(0) |= 1u64 << seg.id;
                    } else {
                        warn!(id = seg.id, ty = %seg.ty, "binding id exceeds the 64-id bitmask domain, reshuffle detection degraded for this id");
                    }
                }
            }
            out.push(ResourceAssignmentRequest {
                path: path.clone(),
                amount,
                fill_policy,
                candidates: candidate_resources,
            });
        }

        let mut mask_state = self.mask_state.lock();
        let changed = mask_state.mask != new_mask;
        mask_state.prev_mask = std::mem::replace(&mut mask_state.mask, new_mask);
        mask_state.changed = changed;
        drop(mask_state);

        *self.sync_binding.lock() = Some(refn);
        Ok(out)
    }

    pub fn changed_since_previous_round(&self) -> bool {
        self.mask_state.lock().changed
    }

    pub fn mask_for(&self, ty: ResourceType) -> u64 {
        self.mask_state.lock().mask.get(&ty).copied().unwrap_or(0)
    }

    pub fn sync_binding(&self) -> Option<u64> {
        *self.sync_binding.lock()
    }

    /// True if, for the given view pair, this AWM's current/next physical
    /// occupancy differs — the reshuffle check used to distinguish a no-op
    /// reschedule from one that moves an app to different resources
    /// (`§4.4`, `§4.6`).
    pub fn reshuffled_against(&self, _current_view: ViewToken, _next_view: ViewToken) -> bool {
        self.changed_since_previous_round()
    }
}

fn hash_binding(prior_ref: Option<u64>, ty: ResourceType, src_id: i32, dst_id: i32) -> u64 {
    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(&prior_ref.unwrap_or(0).to_le_bytes());
    buf.push(ty as u8);
    buf.extend_from_slice(&src_id.to_le_bytes());
    buf.extend_from_slice(&dst_id.to_le_bytes());
    xxh3_64(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_awm() -> WorkingMode {
        let mut requests = HashMap::new();
        requests.insert("sys0.cpu.pe".parse().unwrap(), 50);
        WorkingMode::from_recipe(&RecipeAwm { id: 0, value: 1.0, requests })
    }

    #[test]
    fn validate_rejects_hidden_or_empty() {
        let accounter = ResourceAccounter::new("sys0".parse().unwrap());
        accounter.register_resource(&"sys0.cpu0.pe".parse().unwrap(), 100, "pe");
        let awm = mk_awm();
        assert!(awm.validate(&accounter));
        awm.set_hidden(true);
        assert!(!awm.validate(&accounter));
    }

    #[test]
    fn validate_hides_an_awm_that_exceeds_total_capacity() {
        let accounter = ResourceAccounter::new("sys0".parse().unwrap());
        accounter.register_resource(&"sys0.cpu0.pe".parse().unwrap(), 10, "pe");
        let awm = mk_awm();
        assert!(!awm.validate(&accounter));
        assert!(awm.is_hidden());
    }

    #[test]
    fn bind_replaces_ids_and_is_deterministic() {
        let awm = mk_awm();
        let r1 = awm.bind(ResourceType::Cpu, ANY, 0, None);
        let r2 = awm.bind(ResourceType::Cpu, ANY, 0, None);
        assert_eq!(r1, r2);
        let r3 = awm.bind(ResourceType::Cpu, ANY, 1, None);
        assert_ne!(r1, r3);
    }

    #[test]
    fn set_resource_binding_requires_registered_resources() {
        let accounter = ResourceAccounter::new("sys0".parse().unwrap());
        let awm = mk_awm();
        let refn = awm.bind(ResourceType::Cpu, ANY, 0, None);
        let err = awm
            .set_resource_binding(&accounter, crate::resource::FillPolicy::Sequential, refn)
            .unwrap_err();
        assert_eq!(err, AppError::WmRejected);
    }

    #[test]
    fn set_resource_binding_succeeds_once_resources_exist() {
        let accounter = ResourceAccounter::new("sys0".parse().unwrap());
        accounter.register_resource(&"sys0.cpu0.pe".parse().unwrap(), 100, "pe");
        let awm = mk_awm();
        let refn = awm.bind(ResourceType::Cpu, ANY, 0, None);
        let reqs = awm
            .set_resource_binding(&accounter, crate::resource::FillPolicy::Sequential, refn)
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].amount, 50);
        assert_eq!(awm.mask_for(ResourceType::Cpu), 0b1);
    }

    #[test]
    fn changed_flag_flips_when_the_binding_moves() {
        let accounter = ResourceAccounter::new("sys0".parse().unwrap());
        accounter.register_resource(&"sys0.cpu0.pe".parse().unwrap(), 100, "pe");
        accounter.register_resource(&"sys0.cpu1.pe".parse().unwrap(), 100, "pe");
        let awm = mk_awm();

        let refn0 = awm.bind(ResourceType::Cpu, ANY, 0, None);
        awm.set_resource_binding(&accounter, crate::resource::FillPolicy::Sequential, refn0).unwrap();
        assert!(awm.changed_since_previous_round());

        let refn1 = awm.bind(ResourceType::Cpu, ANY, 1, None);
        awm.set_resource_binding(&accounter, crate::resource::FillPolicy::Sequential, refn1).unwrap();
        assert!(awm.changed_since_previous_round());
        assert_eq!(awm.mask_for(ResourceType::Cpu), 0b10);
    }
}
