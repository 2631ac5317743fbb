//! Booking, view (snapshot) management and sync-session coordination (C4) —
//! the hardest subsystem in the core. See `SPEC_FULL.md §4.4`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{AccounterError, AccounterResult};
use crate::ids::{AppUid, ViewToken};

use super::path::{ResourcePath, ResourceType};
use super::resource::{FillPolicy, Resource};
use super::tree::{LookupMode, ResourceTree};

/// A resolved request to book `amount` units across `candidates`, the shape
/// `§3` calls `ResourceAssignment`. Candidates are resolved ahead of time
/// (typically via [`ResourceAccounter::resolve`]) by the binding machinery.
#[derive(Clone)]
pub struct ResourceAssignmentRequest {
    pub path: ResourcePath,
    pub amount: u64,
    pub fill_policy: FillPolicy,
    pub candidates: Vec<Arc<Resource>>,
}

#[derive(Clone)]
struct Booking {
    amount: u64,
    fill_policy: FillPolicy,
    distribution: Vec<(Arc<Resource>, u64)>,
}

#[derive(Default)]
struct ViewState {
    app_usages: HashMap<AppUid, HashMap<ResourcePath, Booking>>,
    touched: Vec<Arc<Resource>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotReady,
    Ready,
    Sync,
}

struct Inner {
    phase: Phase,
    tree: ResourceTree,
    views: HashMap<ViewToken, ViewState>,
    sync_counter: u64,
    sync_view: Option<ViewToken>,
}

/// The resource accounter: owns the [`ResourceTree`] and every [`ViewToken`]'s
/// speculative booking state, and coordinates sync sessions.
pub struct ResourceAccounter {
    inner: Mutex<Inner>,
    ready_cvar: Condvar,
    system_prefix: ResourcePath,
}

impl ResourceAccounter {
    pub fn new(system_prefix: ResourcePath) -> Self {
        let mut views = HashMap::new();
        views.insert(ViewToken::SYSTEM, ViewState::default());
        ResourceAccounter {
            inner: Mutex::new(Inner {
                phase: Phase::Ready,
                tree: ResourceTree::new(),
                views,
                sync_counter: 0,
                sync_view: None,
            }),
            ready_cvar: Condvar::new(),
            system_prefix,
        }
    }

    pub fn system_prefix(&self) -> &ResourcePath {
        &self.system_prefix
    }

    /// Blocks until the module is `Ready`. Must be called with `inner` locked;
    /// releases and reacquires the lock while waiting.
    fn wait_ready<'a>(&self, guard: &mut parking_lot::MutexGuard<'a, Inner>) {
        while guard.phase != Phase::Ready {
            self.ready_cvar.wait(guard);
        }
    }

    /// Forces the module to `NotReady` for the duration of `f`, e.g. while
    /// platform re-enumeration or a capacity update is in progress.
    fn with_not_ready<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock();
        self.wait_ready(&mut guard);
        guard.phase = Phase::NotReady;
        let r = f(&mut guard);
        guard.phase = Phase::Ready;
        drop(guard);
        self.ready_cvar.notify_all();
        r
    }

    // ---------------------------------------------------------------- tree

    pub fn register_resource(&self, path: &ResourcePath, total: u64, model: impl Into<String>) -> Arc<Resource> {
        let model = model.into();
        self.with_not_ready(|inner| {
            let r = inner.tree.insert(path);
            r.set_total(total);
            debug!(%path, total, "registered resource");
            r
        })
    }

    pub fn total_resources(&self) -> usize {
        self.inner.lock().tree.total_resources()
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().tree.depth()
    }

    pub fn exists(&self, path: &ResourcePath) -> bool {
        self.inner.lock().tree.exists(path)
    }

    /// Resolves the candidate resources for `path` under `mode`, dropping the
    /// matched paths. Used by the binding machinery to build
    /// [`ResourceAssignmentRequest::candidates`].
    pub fn resolve(&self, path: &ResourcePath, mode: LookupMode) -> Vec<Arc<Resource>> {
        self.inner
            .lock()
            .tree
            .find_list(path, mode, false)
            .into_iter()
            .map(|(_, r)| r)
            .collect()
    }

    /// Like [`Self::resolve`], but keeps each hit's fully-resolved path —
    /// used where the caller needs the matched physical ids, not just the
    /// resource handles (e.g. [`crate::binding::BindingManager`]).
    pub fn resolve_with_paths(&self, path: &ResourcePath, mode: LookupMode) -> Vec<(ResourcePath, Arc<Resource>)> {
        self.inner.lock().tree.find_list(path, mode, false)
    }

    /// Sum of `available()` across every resource of type `ty`, ignoring any
    /// particular app's held amount (queries as an anonymous observer).
    pub fn available_by_type(&self, ty: ResourceType, view: ViewToken) -> u64 {
        let observer = AppUid::pack(u32::MAX, u16::MAX);
        self.inner
            .lock()
            .tree
            .collect_type(ty)
            .iter()
            .map(|r| r.available(observer, view))
            .sum()
    }

    /// Applies a reservation to every resource matched by a `MIXED` lookup of
    /// `path`, reducing what any future booking may consume.
    pub fn reserve_resources(&self, path: &ResourcePath, amount: u64) -> AccounterResult<()> {
        let guard = self.inner.lock();
        let hits = guard.tree.find_list(path, LookupMode::Mixed, false);
        if hits.is_empty() {
            return Err(AccounterError::MissPath);
        }
        for (_, r) in &hits {
            r.reserve(amount).map_err(|_| AccounterError::Overflow)?;
        }
        Ok(())
    }

    /// Shrinks/grows the registered capacity of the resource at `path`.
    pub fn update_resource(&self, path: &ResourcePath, new_total: u64) -> AccounterResult<()> {
        self.with_not_ready(|inner| {
            let hits = inner.tree.find_list(path, LookupMode::Exact, true);
            let (_, r) = hits.into_iter().next().ok_or(AccounterError::MissPath)?;
            if new_total > r.total() {
                return Err(AccounterError::Overflow);
            }
            let registered = r.total();
            r.reserve(registered - new_total).map_err(|_| AccounterError::Overflow)?;
            Ok(())
        })
    }

    // ---------------------------------------------------------------- views

    pub fn get_view(&self, name: &str) -> ViewToken {
        let token = ViewToken::new(xxh3_64(name.as_bytes()));
        let mut guard = self.inner.lock();
        self.wait_ready(&mut guard);
        guard.views.entry(token).or_default();
        token
    }

    pub fn put_view(&self, token: ViewToken) -> AccounterResult<()> {
        if token.is_system() {
            return Err(AccounterError::UnauthView);
        }
        let mut guard = self.inner.lock();
        self.wait_ready(&mut guard);
        let view = guard.views.remove(&token).ok_or(AccounterError::MissView)?;
        for r in &view.touched {
            r.release_all(token);
        }
        Ok(())
    }

    /// Promotes `token`'s view to be the system view, then puts the previous
    /// system view's leftovers.
    pub fn set_view(&self, token: ViewToken) -> AccounterResult<()> {
        if token.is_system() {
            return Err(AccounterError::MissView);
        }
        let mut guard = self.inner.lock();
        self.wait_ready(&mut guard);
        let new_view = guard.views.remove(&token).ok_or(AccounterError::MissView)?;
        let old_system = guard.views.remove(&ViewToken::SYSTEM).unwrap_or_default();
        for r in &old_system.touched {
            r.release_all(ViewToken::SYSTEM);
        }
        for r in &new_view.touched {
            r.migrate_view(token, ViewToken::SYSTEM);
        }
        guard.views.insert(ViewToken::SYSTEM, new_view);
        Ok(())
    }

    // -------------------------------------------------------------- booking

    pub fn book(&self, app: AppUid, requests: &[ResourceAssignmentRequest], view: ViewToken) -> AccounterResult<()> {
        let mut guard = self.inner.lock();
        // A booking into the active sync view is how sync_acquire re-enters
        // this function; it must proceed without waiting for `Ready` since
        // the whole point is to book while the module is `Sync`.
        while guard.phase != Phase::Ready && guard.sync_view != Some(view) {
            self.ready_cvar.wait(&mut guard);
        }
        let in_sync_view = guard.sync_view == Some(view);
        if !guard.views.contains_key(&view) {
            return Err(AccounterError::MissView);
        }
        if guard.views[&view].app_usages.contains_key(&app) {
            return Err(AccounterError::AppUsages);
        }
        if !in_sync_view {
            for req in requests {
                let avail: u64 = req.candidates.iter().map(|r| r.available(app, view)).sum();
                if avail < req.amount {
                    return Err(AccounterError::UsageExc);
                }
            }
        }

        let mut bookings = HashMap::with_capacity(requests.len());
        let mut touched = Vec::new();
        for req in requests {
            let distribution = distribute(req, app, view);
            let booked: u64 = distribution.iter().map(|(_, a)| a).sum();
            if booked < req.amount {
                // roll back everything acquired by this call before reporting
                for (res, amt) in &distribution {
                    res.release(app, view);
                    let _ = amt;
                }
                for booking in bookings.values() {
                    release_booking(&booking as &Booking, app, view);
                }
                error!(%app, path = %req.path, "booking left leftover after placement, aborting");
                return Err(AccounterError::SyncView);
            }
            touched.extend(distribution.iter().map(|(r, _)| r.clone()));
            bookings.insert(
                req.path.clone(),
                Booking {
                    amount: req.amount,
                    fill_policy: req.fill_policy,
                    distribution,
                },
            );
        }

        let view_state = guard.views.get_mut(&view).expect("checked above");
        view_state.app_usages.insert(app, bookings);
        view_state.touched.extend(touched);
        Ok(())
    }

    pub fn release(&self, app: AppUid, view: ViewToken) -> AccounterResult<()> {
        let mut guard = self.inner.lock();
        self.wait_ready(&mut guard);
        let view_state = guard.views.get_mut(&view).ok_or(AccounterError::MissView)?;
        let bookings = view_state.app_usages.remove(&app).ok_or(AccounterError::MissUsages)?;
        for booking in bookings.values() {
            release_booking(booking, app, view);
        }
        Ok(())
    }

    /// True if, for any request path the app holds in both views, the set of
    /// (resource, amount) pairs it was granted differs (`§4.4` reshuffle
    /// detection; drives `RECONF`/`MIGREC` in the application state machine).
    pub fn reshuffled(&self, app: AppUid, current_view: ViewToken, next_view: ViewToken) -> bool {
        let guard = self.inner.lock();
        let (Some(cur), Some(next)) = (guard.views.get(&current_view), guard.views.get(&next_view)) else {
            return false;
        };
        let (Some(cur_book), Some(next_book)) = (cur.app_usages.get(&app), next.app_usages.get(&app)) else {
            return false;
        };
        for (path, cb) in cur_book {
            let Some(nb) = next_book.get(path) else { continue };
            if !same_distribution(&cb.distribution, &nb.distribution) {
                return true;
            }
        }
        false
    }

    // ---------------------------------------------------------- sync session

    pub fn sync_start(&self) -> AccounterResult<ViewToken> {
        let token = {
            let mut guard = self.inner.lock();
            self.wait_ready(&mut guard);
            if guard.phase == Phase::Sync {
                return Err(AccounterError::SyncStart);
            }
            guard.sync_counter += 1;
            let name = format!("sync#{}", guard.sync_counter);
            let token = ViewToken::new(xxh3_64(name.as_bytes()));
            guard.views.insert(token, ViewState::default());
            guard.phase = Phase::Sync;
            guard.sync_view = Some(token);
            token
        };

        let running: Vec<(AppUid, HashMap<ResourcePath, Booking>)> = {
            let guard = self.inner.lock();
            guard.views[&ViewToken::SYSTEM]
                .app_usages
                .iter()
                .map(|(a, b)| (*a, b.clone()))
                .collect()
        };

        for (app, bookings) in running {
            if let Err(e) = self.rebook_exact(app, &bookings, token) {
                warn!(%app, error = %e, "sync_start: re-booking running app into sync view failed, aborting session");
                let _ = self.sync_abort();
                return Err(AccounterError::SyncInit);
            }
        }
        debug!(%token, "sync session started");
        Ok(token)
    }

    fn rebook_exact(&self, app: AppUid, bookings: &HashMap<ResourcePath, Booking>, view: ViewToken) -> AccounterResult<()> {
        let mut guard = self.inner.lock();
        let view_state = guard.views.get_mut(&view).ok_or(AccounterError::MissView)?;
        let mut rebooked = HashMap::with_capacity(bookings.len());
        let mut touched = Vec::new();
        for (path, booking) in bookings {
            let mut distribution = Vec::with_capacity(booking.distribution.len());
            for (res, amt) in &booking.distribution {
                let got = res.acquire(app, *amt, view);
                if got != *amt {
                    error!(%app, path = %path, "sync_start rebooking mismatch: invariant violation");
                    return Err(AccounterError::SyncInit);
                }
                distribution.push((res.clone(), got));
                touched.push(res.clone());
            }
            rebooked.insert(
                path.clone(),
                Booking {
                    amount: booking.amount,
                    fill_policy: booking.fill_policy,
                    distribution,
                },
            );
        }
        view_state.app_usages.insert(app, rebooked);
        view_state.touched.extend(touched);
        Ok(())
    }

    /// Books `next_awm`'s assignment for a rescheduled app into the active
    /// sync view. Thin wrapper over [`Self::book`] — the sync view is
    /// recognized internally and its availability check is skipped.
    pub fn sync_acquire(&self, app: AppUid, requests: &[ResourceAssignmentRequest]) -> AccounterResult<()> {
        let token = self.inner.lock().sync_view.ok_or(AccounterError::SyncView)?;
        self.book(app, requests, token)
    }

    pub fn sync_commit(&self) -> AccounterResult<()> {
        let token = {
            let guard = self.inner.lock();
            guard.sync_view.ok_or(AccounterError::SyncView)?
        };
        self.set_view(token)?;
        let mut guard = self.inner.lock();
        guard.sync_view = None;
        guard.phase = Phase::Ready;
        drop(guard);
        self.ready_cvar.notify_all();
        debug!("sync session committed");
        Ok(())
    }

    pub fn sync_abort(&self) -> AccounterResult<()> {
        let token = {
            let mut guard = self.inner.lock();
            guard.sync_view.take().ok_or(AccounterError::SyncView)?
        };
        let mut guard = self.inner.lock();
        if let Some(view) = guard.views.remove(&token) {
            for r in &view.touched {
                r.release_all(token);
            }
        }
        guard.phase = Phase::Ready;
        drop(guard);
        self.ready_cvar.notify_all();
        warn!(%token, "sync session aborted");
        Ok(())
    }

    pub fn in_sync(&self) -> bool {
        self.inner.lock().phase == Phase::Sync
    }
}

fn release_booking(booking: &Booking, app: AppUid, view: ViewToken) {
    for (res, _) in &booking.distribution {
        res.release(app, view);
    }
}

fn same_distribution(a: &[(Arc<Resource>, u64)], b: &[(Arc<Resource>, u64)]) -> bool {
    if a.len() != b.len() {
        return false; // different shapes definitely count as a reshuffle
    }
    for (ra, amt_a) in a {
        let found = b.iter().any(|(rb, amt_b)| Arc::ptr_eq(ra, rb) && amt_a == amt_b);
        if !found {
            return false;
        }
    }
    true
}

fn distribute(req: &ResourceAssignmentRequest, app: AppUid, view: ViewToken) -> Vec<(Arc<Resource>, u64)> {
    let mut remaining = req.amount;
    let n = req.candidates.len();
    let mut out = Vec::with_capacity(n);
    for (i, res) in req.candidates.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let avail = res.available(app, view);
        let take = match req.fill_policy {
            FillPolicy::Sequential => remaining.min(avail),
            FillPolicy::Balanced => {
                let remaining_candidates = (n - i) as u64;
                let target = remaining / remaining_candidates;
                if target.min(avail) < target {
                    // short candidate: fall back to taking whatever it has
                    remaining.min(avail)
                } else {
                    target.min(avail)
                }
            }
        };
        if take == 0 {
            continue;
        }
        let got = res.acquire(app, take, view);
        if got > 0 {
            out.push((res.clone(), got));
            remaining -= got;
        }
    }
    out
}
