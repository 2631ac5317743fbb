//! Leaf resource descriptor (C3): capacity, reservation, online/offline state,
//! and the per-view usage map that makes speculative booking possible.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::ids::{AppUid, ViewToken};

/// How a [`crate::resource::accounter::ResourceAccounter`] should spread a
/// request across a candidate list (`§3`, `ResourceAssignment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Fill each candidate to its available capacity before moving to the next.
    Sequential,
    /// Target `amount / remaining_candidates` per step, falling back to
    /// sequential when a candidate is short.
    Balanced,
}

#[derive(Debug, Clone, Default)]
struct PerViewState {
    used: u64,
    apps: HashMap<AppUid, u64>,
}

impl PerViewState {
    fn invariant_holds(&self) -> bool {
        self.apps.values().sum::<u64>() == self.used
    }
}

#[derive(Debug)]
struct ResourceState {
    total: u64,
    reserved: u64,
    online: bool,
    model: String,
    last_on: Option<Instant>,
    last_off: Option<Instant>,
    views: HashMap<ViewToken, PerViewState>,
}

/// A single platform resource, owned by the tree at its path (`§3`). Internal
/// mutability is behind a `Mutex` per resource rather than one global lock:
/// booking is typically against at most a few dozen resources, so contention
/// stays low (see `DESIGN.md`).
#[derive(Debug)]
pub struct Resource {
    state: Mutex<ResourceState>,
}

impl Resource {
    pub fn new(total: u64, model: impl Into<String>) -> Self {
        Resource {
            state: Mutex::new(ResourceState {
                total,
                reserved: 0,
                online: true,
                model: model.into(),
                last_on: Some(Instant::now()),
                last_off: None,
                views: HashMap::new(),
            }),
        }
    }

    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    pub fn reserved(&self) -> u64 {
        self.state.lock().reserved
    }

    pub fn model(&self) -> String {
        self.state.lock().model.clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    pub fn set_online(&self) {
        let mut st = self.state.lock();
        st.online = true;
        st.last_on = Some(Instant::now());
    }

    pub fn set_offline(&self) {
        let mut st = self.state.lock();
        st.online = false;
        st.last_off = Some(Instant::now());
    }

    /// Sets the reserved amount aside from scheduling. Fails if it would
    /// exceed the registered total.
    pub fn reserve(&self, amount: u64) -> Result<(), ()> {
        let mut st = self.state.lock();
        if amount > st.total {
            return Err(());
        }
        st.reserved = amount;
        Ok(())
    }

    /// Overwrites the registered total, used by `update_resource` (`§4.4`).
    pub fn set_total(&self, new_total: u64) {
        self.state.lock().total = new_total;
    }

    fn used_locked(st: &ResourceState, view: ViewToken) -> u64 {
        st.views.get(&view).map(|v| v.used).unwrap_or(0)
    }

    pub fn used(&self, view: ViewToken) -> u64 {
        Self::used_locked(&self.state.lock(), view)
    }

    pub fn used_by(&self, app: AppUid, view: ViewToken) -> u64 {
        self.state
            .lock()
            .views
            .get(&view)
            .and_then(|v| v.apps.get(&app).copied())
            .unwrap_or(0)
    }

    /// `available(app, view) = total - reserved - used(view) + used_by(app, view)`:
    /// an application may "see" the amount it already holds as available.
    pub fn available(&self, app: AppUid, view: ViewToken) -> u64 {
        let st = self.state.lock();
        if !st.online {
            return 0;
        }
        let used = Self::used_locked(&st, view);
        let held = st
            .views
            .get(&view)
            .and_then(|v| v.apps.get(&app).copied())
            .unwrap_or(0);
        (st.total.saturating_sub(st.reserved).saturating_sub(used)).saturating_add(held)
    }

    /// Adds `amount` to `app`'s usage in `view`, creating the view entry on
    /// demand. Returns the amount actually acquired (0 on rejection).
    /// Re-acquiring from the same app is cumulative.
    pub fn acquire(&self, app: AppUid, amount: u64, view: ViewToken) -> u64 {
        if amount == 0 {
            return 0;
        }
        let mut st = self.state.lock();
        let used = Self::used_locked(&st, view);
        if used + amount > st.total {
            return 0;
        }
        let entry = st.views.entry(view).or_default();
        entry.used += amount;
        *entry.apps.entry(app).or_insert(0) += amount;
        debug_assert!(entry.invariant_holds());
        amount
    }

    /// Removes `app`'s contribution to `view`, returning the amount released.
    pub fn release(&self, app: AppUid, view: ViewToken) -> u64 {
        let mut st = self.state.lock();
        let Some(entry) = st.views.get_mut(&view) else {
            return 0;
        };
        let Some(amount) = entry.apps.remove(&app) else {
            return 0;
        };
        entry.used = entry.used.saturating_sub(amount);
        debug_assert!(entry.invariant_holds());
        amount
    }

    /// Drops a view wholesale. The system view (token 0) may never be
    /// released this way — callers must check before calling.
    pub fn release_all(&self, view: ViewToken) {
        self.state.lock().views.remove(&view);
    }

    /// Moves the per-view usage entry from `from` to `to`, overwriting
    /// whatever `to` held. Used by `set_view` to promote a speculative view
    /// to the system view without re-walking every booking. A no-op if
    /// `from` holds no entry (idempotent under repeated calls).
    pub fn migrate_view(&self, from: ViewToken, to: ViewToken) {
        let mut st = self.state.lock();
        if let Some(entry) = st.views.remove(&from) {
            st.views.insert(to, entry);
        }
    }

    #[cfg(test)]
    fn apps_in_view(&self, view: ViewToken) -> HashMap<AppUid, u64> {
        self.state
            .lock()
            .views
            .get(&view)
            .map(|v| v.apps.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(n: u64) -> AppUid {
        AppUid::pack(n as u32, 0)
    }

    #[test]
    fn acquire_and_release_roundtrip() {
        let r = Resource::new(100, "pe");
        let v = ViewToken::new(1);
        assert_eq!(r.acquire(app(1), 40, v), 40);
        assert_eq!(r.used(v), 40);
        assert_eq!(r.available(app(2), v), 60);
        assert_eq!(r.release(app(1), v), 40);
        assert_eq!(r.used(v), 0);
        assert!(r.apps_in_view(v).is_empty());
    }

    #[test]
    fn re_acquire_from_same_app_is_cumulative() {
        let r = Resource::new(100, "pe");
        let v = ViewToken::new(1);
        r.acquire(app(1), 10, v);
        r.acquire(app(1), 20, v);
        assert_eq!(r.used_by(app(1), v), 30);
        assert_eq!(r.used(v), 30);
    }

    #[test]
    fn acquire_beyond_total_is_rejected() {
        let r = Resource::new(50, "pe");
        let v = ViewToken::new(1);
        assert_eq!(r.acquire(app(1), 51, v), 0);
        assert_eq!(r.acquire(app(1), 50, v), 50);
        assert_eq!(r.acquire(app(2), 1, v), 0);
    }

    #[test]
    fn an_app_sees_its_own_usage_as_available() {
        let r = Resource::new(100, "pe");
        let v = ViewToken::new(1);
        r.acquire(app(1), 70, v);
        assert_eq!(r.available(app(1), v), 30);
        assert_eq!(r.available(app(2), v), 30);
    }

    #[test]
    fn offline_resources_report_zero_availability() {
        let r = Resource::new(100, "pe");
        let v = ViewToken::new(1);
        r.set_offline();
        assert_eq!(r.available(app(1), v), 0);
        r.set_online();
        assert_eq!(r.available(app(1), v), 100);
    }

    #[test]
    fn reserve_reduces_availability() {
        let r = Resource::new(100, "pe");
        let v = ViewToken::new(1);
        r.reserve(100).unwrap();
        assert_eq!(r.available(app(1), v), 0);
        assert!(r.reserve(200).is_err());
    }
}
