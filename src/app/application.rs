//! Application/EXC (C6): identity, recipe-backed AWM catalogue, priority,
//! and the synchronization state machine. See `SPEC_FULL.md §4.6`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::ids::{AppUid, ViewToken};
use crate::resource::{FillPolicy, ResourceAccounter};

use super::recipe::Recipe;
use super::working_mode::WorkingMode;

/// `state ∈ { DISABLED, READY, SYNC, RUNNING, FINISHED }` (`§3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Disabled,
    Ready,
    Sync,
    Running,
    Finished,
}

/// Meaningful only when `state == Sync` (`§3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Starting,
    Reconf,
    Migrec,
    Migrate,
    Blocked,
    None,
}

/// `{ADD|REMOVE} × {LOWER|UPPER|EXACT}` constraint edits (`§4.6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintBound {
    Lower,
    Upper,
    Exact,
}

#[derive(Debug, Clone, Copy)]
pub struct AwmConstraint {
    pub op: ConstraintOp,
    pub bound: ConstraintBound,
    pub awm_id: u32,
}

struct Locked {
    state: State,
    sync_state: SyncState,
    pre_sync_state: State,
    awm: Option<u32>,
    next_awm: Option<u32>,
    previous_state: Vec<State>,
    enabled_bitset: Vec<bool>,
    curr_inv: bool,
}

/// An execution context. Guarded by a recursive mutex so a single call chain
/// (e.g. `ScheduleRequest` calling `Reschedule` calling `Unschedule`) can
/// re-enter without deadlocking itself (`§4.6`).
pub struct Application {
    uid: AppUid,
    name: String,
    recipe: Arc<Recipe>,
    awms: Vec<WorkingMode>,
    priority: AtomicU32,
    curr_inv_fast: AtomicBool,
    locked: ReentrantMutex<RefCell<Locked>>,
}

impl Application {
    pub fn new(uid: AppUid, name: impl Into<String>, recipe: Arc<Recipe>, priority: u32) -> Self {
        let awm_count = recipe.awms.len();
        let awms = recipe.awms.iter().map(WorkingMode::from_recipe).collect();
        Application {
            uid,
            name: name.into(),
            recipe,
            awms,
            priority: AtomicU32::new(priority),
            curr_inv_fast: AtomicBool::new(false),
            locked: ReentrantMutex::new(RefCell::new(Locked {
                state: State::Disabled,
                sync_state: SyncState::None,
                pre_sync_state: State::Disabled,
                awm: None,
                next_awm: None,
                previous_state: Vec::new(),
                enabled_bitset: vec![true; awm_count],
                curr_inv: false,
            })),
        }
    }

    pub fn uid(&self) -> AppUid {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn recipe_arc(&self) -> &Arc<Recipe> {
        &self.recipe
    }

    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn working_mode(&self, id: u32) -> Option<&WorkingMode> {
        self.awms.iter().find(|a| a.id() == id)
    }

    pub fn state(&self) -> State {
        let guard = self.locked.lock();
        guard.borrow().state
    }

    pub fn sync_state(&self) -> SyncState {
        let guard = self.locked.lock();
        guard.borrow().sync_state
    }

    pub fn curr_awm(&self) -> Option<u32> {
        let guard = self.locked.lock();
        guard.borrow().awm
    }

    pub fn next_awm(&self) -> Option<u32> {
        let guard = self.locked.lock();
        guard.borrow().next_awm
    }

    pub fn curr_inv(&self) -> bool {
        self.curr_inv_fast.load(Ordering::Relaxed)
    }

    /// `enabled_bitset ∩ {resource-range-valid, !hidden}`, sorted ascending
    /// by recipe value.
    pub fn enabled_awms(&self, accounter: &ResourceAccounter) -> Vec<u32> {
        let guard = self.locked.lock();
        let bitset = guard.borrow().enabled_bitset.clone();
        drop(guard);
        let mut out: Vec<(u32, f64)> = self
            .awms
            .iter()
            .enumerate()
            .filter(|(i, awm)| {
                bitset.get(*i).copied().unwrap_or(false)
                    && awm.validate(accounter)
                    && self.satisfies_static_constraints(awm)
            })
            .map(|(_, awm)| (awm.id(), awm.value()))
            .collect();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        out.into_iter().map(|(id, _)| id).collect()
    }

    /// Every request this AWM carries stays within its resource type's
    /// recipe-declared static range, if one is declared (`§4.6`).
    fn satisfies_static_constraints(&self, awm: &WorkingMode) -> bool {
        for (path, amount) in awm.requests() {
            let Some(ty) = path.segments().last().map(|s| s.ty) else { continue };
            if let Some(range) = self.recipe.static_constraints.get(&ty) {
                if !range.contains(*amount) {
                    return false;
                }
            }
        }
        true
    }

    /// `DISABLED → READY`. A no-op (with a logged warning) if already enabled.
    pub fn enable(&self) {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        if inner.state != State::Disabled {
            debug!(app = %self.uid, "enable on an already-enabled EXC is a no-op");
            return;
        }
        self.transition(&mut inner, State::Ready);
    }

    /// Idempotent: a second call returns `Finished` rather than erroring.
    pub fn terminate(&self) -> AppResult<()> {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        if inner.state == State::Finished {
            return Err(AppError::Finished);
        }
        self.transition(&mut inner, State::Finished);
        inner.awm = None;
        inner.next_awm = None;
        Ok(())
    }

    /// The policy → EXC entry point (`§4.6`).
    pub fn schedule_request(
        &self,
        accounter: &ResourceAccounter,
        view: ViewToken,
        awm_id: u32,
        binding_ref: u64,
    ) -> AppResult<()> {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();

        if inner.sync_state == SyncState::Blocked {
            // Restore the state this EXC held before the BLOCKED excursion, so
            // the request below is evaluated as a fresh attempt rather than as
            // a continuation of SYNC/BLOCKED.
            let pre = inner.pre_sync_state;
            inner.sync_state = SyncState::None;
            self.transition(&mut inner, pre);
        }
        if inner.state == State::Disabled {
            return Err(AppError::Disabled);
        }
        if inner.state == State::Finished {
            return Err(AppError::Finished);
        }

        let awm = self.working_mode(awm_id).ok_or(AppError::WmNotFound)?;

        // Supersede whatever this app already holds in `view` — either a
        // placeholder `sync_start()` carried forward from the running
        // assignment, or a previous trial from an earlier round of the same
        // sync session — so the new binding can be booked in its place.
        let _ = accounter.release(self.uid, view);

        let requests = match awm.set_resource_binding(accounter, FillPolicy::Sequential, binding_ref) {
            Ok(r) => r,
            Err(e) => {
                // Only a RUNNING app needs to be walked through SYNC/BLOCKED on
                // rejection; a READY app that never got a booking just stays READY.
                let was_running = inner.state == State::Running;
                drop(inner);
                if was_running {
                    let _ = self.unschedule();
                }
                return Err(e);
            }
        };

        if accounter.book(self.uid, &requests, view).is_err() {
            let was_running = inner.state == State::Running;
            drop(inner);
            if was_running {
                let _ = self.unschedule();
            }
            return Err(AppError::WmRejected);
        }

        inner.next_awm = Some(awm_id);
        self.reschedule(&mut inner, awm);
        Ok(())
    }

    /// Re-books the previous binding unchanged.
    pub fn schedule_request_as_prev(&self, accounter: &ResourceAccounter, view: ViewToken) -> AppResult<()> {
        let guard = self.locked.lock();
        let awm_id = guard.borrow().awm.ok_or(AppError::WmNotFound)?;
        drop(guard);
        let awm = self.working_mode(awm_id).ok_or(AppError::WmNotFound)?;
        let refn = awm.sync_binding().ok_or(AppError::WmNotFound)?;
        self.schedule_request(accounter, view, awm_id, refn)
    }

    fn reschedule(&self, inner: &mut Locked, awm: &WorkingMode) {
        let reshuffled = awm.changed_since_previous_round();
        let same_awm = inner.awm == Some(awm.id());

        let next = match inner.state {
            State::Ready | State::Disabled => SyncState::Starting,
            State::Running if same_awm && !reshuffled => {
                debug!(app = %self.uid, "reschedule is a no-op: same AWM, no reshuffle");
                return;
            }
            State::Running if !same_awm && reshuffled => SyncState::Migrec,
            State::Running if same_awm && reshuffled => SyncState::Migrate,
            State::Running => SyncState::Reconf,
            State::Sync => inner.sync_state,
            State::Finished => return,
        };
        inner.sync_state = next;
        self.transition(inner, State::Sync);
    }

    /// `RUNNING → SYNC/BLOCKED`.
    pub fn unschedule(&self) -> AppResult<()> {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        if inner.state == State::Finished {
            return Err(AppError::Finished);
        }
        inner.pre_sync_state = inner.state;
        inner.sync_state = SyncState::Blocked;
        self.transition(&mut inner, State::Sync);
        Ok(())
    }

    pub fn schedule_commit(&self) -> AppResult<()> {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        if inner.state != State::Sync {
            return Err(AppError::StatusNotExp);
        }
        match inner.sync_state {
            SyncState::Blocked => {
                inner.sync_state = SyncState::None;
                self.transition(&mut inner, State::Ready);
            }
            _ => {
                let goal_gap_reset = match (inner.awm, inner.next_awm) {
                    (Some(cur), Some(next)) => {
                        let cur_val = self.working_mode(cur).map(|a| a.value()).unwrap_or(0.0);
                        let next_val = self.working_mode(next).map(|a| a.value()).unwrap_or(0.0);
                        cur_val < next_val
                    }
                    _ => false,
                };
                if goal_gap_reset {
                    debug!(app = %self.uid, "goal-gap reset: committed AWM has higher value than the prior one");
                }
                inner.awm = inner.next_awm;
                inner.sync_state = SyncState::None;
                self.transition(&mut inner, State::Running);
            }
        }
        Ok(())
    }

    pub fn schedule_abort(&self) -> AppResult<()> {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        if inner.state != State::Sync {
            return Err(AppError::StatusNotExp);
        }
        inner.awm = None;
        inner.next_awm = None;
        inner.sync_state = SyncState::None;
        self.transition(&mut inner, State::Ready);
        Ok(())
    }

    /// `{ADD|REMOVE} × {LOWER|UPPER|EXACT}` edits to the enabled set; flags
    /// `curr_inv` if the currently running AWM falls out of it.
    pub fn set_awm_constraint(&self, c: AwmConstraint) {
        let guard = self.locked.lock();
        let mut inner = guard.borrow_mut();
        let enabled = c.op == ConstraintOp::Add;
        match c.bound {
            ConstraintBound::Exact if enabled => {
                for (i, flag) in inner.enabled_bitset.iter_mut().enumerate() {
                    *flag = i as u32 == c.awm_id;
                }
            }
            ConstraintBound::Exact => {
                for flag in inner.enabled_bitset.iter_mut() {
                    *flag = true;
                }
            }
            ConstraintBound::Lower => {
                for (i, flag) in inner.enabled_bitset.iter_mut().enumerate() {
                    if (i as u32) < c.awm_id {
                        *flag = !enabled;
                    }
                }
            }
            ConstraintBound::Upper => {
                for (i, flag) in inner.enabled_bitset.iter_mut().enumerate() {
                    if (i as u32) > c.awm_id {
                        *flag = !enabled;
                    }
                }
            }
        }

        let curr = inner.awm;
        let still_enabled = curr
            .map(|id| inner.enabled_bitset.get(id as usize).copied().unwrap_or(false))
            .unwrap_or(true);
        inner.curr_inv = curr.is_some() && !still_enabled;
        self.curr_inv_fast.store(inner.curr_inv, Ordering::Relaxed);
    }

    fn transition(&self, inner: &mut Locked, to: State) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.previous_state.push(from);
        inner.state = to;
        if matches!(to, State::Disabled | State::Ready) {
            inner.awm = None;
            inner.next_awm = None;
        }
        info!(app = %self.uid, ?from, ?to, "EXC transition");
    }
}
