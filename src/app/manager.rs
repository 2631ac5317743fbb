//! ApplicationManager (C7): the EXC registry, its priority/status/sync
//! indices, and the `NotifyNewState` hub that keeps them consistent.
//! See `SPEC_FULL.md §4.7`.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::AppError;
use crate::ids::AppUid;

use super::application::{Application, State, SyncState};
use super::recipe::Recipe;

/// Index position of a [`State`], used to take status-map locks in a
/// deterministic ascending order and prevent cross-EXC deadlock (`§5`).
fn state_index(s: State) -> usize {
    match s {
        State::Disabled => 0,
        State::Ready => 1,
        State::Sync => 2,
        State::Running => 3,
        State::Finished => 4,
    }
}

fn sync_index(s: SyncState) -> usize {
    match s {
        SyncState::Starting => 0,
        SyncState::Reconf => 1,
        SyncState::Migrec => 2,
        SyncState::Migrate => 3,
        SyncState::Blocked => 4,
        SyncState::None => 5,
    }
}

const STATE_SLOTS: usize = 5;
const SYNC_SLOTS: usize = 6;

/// Loads and caches recipes by name. Recipe loading itself (parsing whatever
/// on-disk or RPC-delivered form a recipe arrives in) is outside the core;
/// callers hand over an already-built [`Recipe`] and the manager is
/// responsible only for caching and reuse across EXCs sharing a name.
pub trait RecipeLoader: Send + Sync {
    fn load(&self, name: &str) -> Option<Recipe>;
}

pub struct ApplicationManager {
    apps_by_pid: Mutex<HashMap<u32, Vec<AppUid>>>,
    uids: Mutex<HashMap<AppUid, Arc<Application>>>,
    priority_vec: Mutex<Vec<HashMap<AppUid, Arc<Application>>>>,
    status_vec: Vec<Mutex<HashMap<AppUid, Arc<Application>>>>,
    sync_vec: Vec<Mutex<HashMap<AppUid, Arc<Application>>>>,
    recipe_cache: Mutex<LruCache<String, Arc<Recipe>>>,
    priority_floor: u32,
}

impl ApplicationManager {
    pub fn new(priority_levels: u32, recipe_cache_capacity: std::num::NonZeroUsize) -> Self {
        ApplicationManager {
            apps_by_pid: Mutex::new(HashMap::new()),
            uids: Mutex::new(HashMap::new()),
            priority_vec: Mutex::new((0..priority_levels).map(|_| HashMap::new()).collect()),
            status_vec: (0..STATE_SLOTS).map(|_| Mutex::new(HashMap::new())).collect(),
            sync_vec: (0..SYNC_SLOTS).map(|_| Mutex::new(HashMap::new())).collect(),
            recipe_cache: Mutex::new(LruCache::new(recipe_cache_capacity)),
            priority_floor: priority_levels.saturating_sub(1),
        }
    }

    /// Loads `recipe_name` via `loader` (or reuses the cached copy), assigns
    /// `priority` clamped to the configured floor, and registers the new EXC
    /// in all four indexes.
    pub fn create_exc(
        &self,
        uid: AppUid,
        exc_name: impl Into<String>,
        recipe_name: &str,
        priority: u32,
        loader: &dyn RecipeLoader,
    ) -> Result<Arc<Application>, AppError> {
        let recipe = self.cached_recipe(recipe_name, loader).ok_or(AppError::WmNotFound)?;
        let clamped_priority = priority.min(self.priority_floor);
        let app = Arc::new(Application::new(uid, exc_name, recipe, clamped_priority));

        self.apps_by_pid.lock().entry(uid.pid()).or_default().push(uid);
        self.uids.lock().insert(uid, app.clone());
        self.priority_vec.lock()[clamped_priority as usize].insert(uid, app.clone());
        self.status_vec[state_index(State::Disabled)]
            .lock()
            .insert(uid, app.clone());

        debug!(app = %uid, recipe = recipe_name, priority = clamped_priority, "EXC created");
        Ok(app)
    }

    fn cached_recipe(&self, name: &str, loader: &dyn RecipeLoader) -> Option<Arc<Recipe>> {
        let mut cache = self.recipe_cache.lock();
        if let Some(r) = cache.get(name) {
            return Some(r.clone());
        }
        let recipe = Arc::new(loader.load(name)?);
        cache.put(name.to_string(), recipe.clone());
        Some(recipe)
    }

    pub fn terminate_and_destroy(&self, uid: AppUid) {
        let app = { self.uids.lock().get(&uid).cloned() };
        let Some(app) = app else { return };
        let _ = app.terminate();

        self.apps_by_pid
            .lock()
            .entry(uid.pid())
            .or_default()
            .retain(|u| *u != uid);
        self.uids.lock().remove(&uid);
        for slot in self.priority_vec.lock().iter_mut() {
            slot.remove(&uid);
        }
        for slot in &self.status_vec {
            slot.lock().remove(&uid);
        }
        for slot in &self.sync_vec {
            slot.lock().remove(&uid);
        }
        debug!(app = %uid, "EXC destroyed");
    }

    pub fn lookup(&self, uid: AppUid) -> Option<Arc<Application>> {
        self.uids.lock().get(&uid).cloned()
    }

    /// Moves `app` between status/sync maps, locking the lower-indexed slot
    /// first to avoid cross-thread deadlock (`§5`).
    pub fn notify_new_state(&self, app: &Arc<Application>, old_state: State, new_state: State) {
        let old_i = state_index(old_state);
        let new_i = state_index(new_state);
        let (first, second) = if old_i <= new_i { (old_i, new_i) } else { (new_i, old_i) };

        if first == second {
            // no status-map move, only a potential sync-map change below
        } else {
            let (lo, hi) = (first.min(second), first.max(second));
            let mut lo_guard = self.status_vec[lo].lock();
            let mut hi_guard = self.status_vec[hi].lock();
            if old_i == lo {
                lo_guard.remove(&app.uid());
                hi_guard.insert(app.uid(), app.clone());
            } else {
                hi_guard.remove(&app.uid());
                lo_guard.insert(app.uid(), app.clone());
            }
        }

        let was_sync = old_state == State::Sync;
        let is_sync = new_state == State::Sync;
        if is_sync && !was_sync {
            let slot = sync_index(app.sync_state());
            self.sync_vec[slot].lock().insert(app.uid(), app.clone());
        } else if was_sync && !is_sync {
            for slot in &self.sync_vec {
                slot.lock().remove(&app.uid());
            }
        }
    }

    pub fn running(&self) -> Vec<Arc<Application>> {
        self.status_vec[state_index(State::Running)]
            .lock()
            .values()
            .cloned()
            .collect()
    }

    pub fn ready(&self) -> Vec<Arc<Application>> {
        self.status_vec[state_index(State::Ready)]
            .lock()
            .values()
            .cloned()
            .collect()
    }

    pub fn in_sync_state(&self, s: SyncState) -> Vec<Arc<Application>> {
        self.sync_vec[sync_index(s)].lock().values().cloned().collect()
    }

    pub fn by_priority(&self, priority: u32) -> Vec<Arc<Application>> {
        self.priority_vec
            .lock()
            .get(priority as usize)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::recipe::RecipeAwm;
    use std::collections::HashMap as Map;

    struct StaticLoader;
    impl RecipeLoader for StaticLoader {
        fn load(&self, name: &str) -> Option<Recipe> {
            let mut r = Recipe::new(name);
            r.awms.push(RecipeAwm { id: 0, value: 1.0, requests: Map::new() });
            Some(r)
        }
    }

    #[test]
    fn create_exc_clamps_priority_to_the_floor() {
        let mgr = ApplicationManager::new(4, std::num::NonZeroUsize::new(8).unwrap());
        let uid = AppUid::pack(1, 0);
        let app = mgr
            .create_exc(uid, "bodytrack", "bodytrack.recipe", 99, &StaticLoader)
            .unwrap();
        assert_eq!(app.priority(), 3);
    }

    #[test]
    fn recipes_are_cached_across_excs() {
        let mgr = ApplicationManager::new(4, std::num::NonZeroUsize::new(8).unwrap());
        let a = mgr
            .create_exc(AppUid::pack(1, 0), "e0", "shared.recipe", 0, &StaticLoader)
            .unwrap();
        let b = mgr
            .create_exc(AppUid::pack(2, 0), "e1", "shared.recipe", 0, &StaticLoader)
            .unwrap();
        assert!(Arc::ptr_eq(a.recipe_arc(), b.recipe_arc()));
    }

    #[test]
    fn notify_new_state_moves_status_and_sync_indices() {
        let mgr = ApplicationManager::new(4, std::num::NonZeroUsize::new(8).unwrap());
        let uid = AppUid::pack(1, 0);
        let app = mgr.create_exc(uid, "e0", "r", 0, &StaticLoader).unwrap();
        app.enable();
        mgr.notify_new_state(&app, State::Disabled, State::Ready);
        assert_eq!(mgr.ready().len(), 1);
    }

    #[test]
    fn destroy_exc_removes_from_every_index() {
        let mgr = ApplicationManager::new(4, std::num::NonZeroUsize::new(8).unwrap());
        let uid = AppUid::pack(1, 0);
        mgr.create_exc(uid, "e0", "r", 0, &StaticLoader).unwrap();
        mgr.terminate_and_destroy(uid);
        assert!(mgr.lookup(uid).is_none());
    }
}
