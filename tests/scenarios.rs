//! End-to-end fixtures from `SPEC_FULL.md §8`, driven through the public
//! crate API rather than any one module's internals.

use std::collections::HashMap;
use std::sync::Arc;

use rtrm_core::app::{Application, AwmConstraint, ConstraintBound, ConstraintOp, Recipe, RecipeAwm, State, SyncState};
use rtrm_core::error::{AppError, ValidatorError};
use rtrm_core::ids::{AppUid, ViewToken};
use rtrm_core::resource::{ResourceAccounter, ResourceType, ANY};
use rtrm_core::validator::{Partition, PartitionValidator, SkimResult, Skimmer, TaskGraph};

fn recipe_with_one_awm(amount: u64) -> Recipe {
    let mut r = Recipe::new("single-awm");
    let mut requests = HashMap::new();
    requests.insert("sys0.cpu.pe".parse().unwrap(), amount);
    r.awms.push(RecipeAwm { id: 0, value: 1.0, requests });
    r
}

/// Scenario 1: single-EXC single-AWM success.
#[test]
fn single_exc_single_awm_reaches_running() {
    let accounter = ResourceAccounter::new("sys0".parse().unwrap());
    for pe in 0..4 {
        accounter.register_resource(&format!("sys0.cpu0.pe{pe}").parse().unwrap(), 100, "pe");
    }

    let app = Application::new(AppUid::pack(1, 0), "exc0", Arc::new(recipe_with_one_awm(50)), 5);
    app.enable();
    assert_eq!(app.state(), State::Ready);

    let awm = app.working_mode(0).unwrap();
    let refn = awm.bind(ResourceType::Cpu, ANY, 0, None);

    app.schedule_request(&accounter, ViewToken::SYSTEM, 0, refn).unwrap();
    app.schedule_commit().unwrap();

    assert_eq!(app.state(), State::Running);
    assert_eq!(app.curr_awm(), Some(0));
    let pe0: rtrm_core::resource::ResourcePath = "sys0.cpu0.pe0".parse().unwrap();
    let hits = accounter.resolve(&pe0, rtrm_core::resource::LookupMode::Exact);
    assert_eq!(hits[0].used(ViewToken::SYSTEM), 50);
}

/// Scenario 2: insufficient capacity leaves the EXC in READY with no usage.
#[test]
fn insufficient_capacity_keeps_exc_ready() {
    let accounter = ResourceAccounter::new("sys0".parse().unwrap());
    for pe in 0..4 {
        accounter.register_resource(&format!("sys0.cpu0.pe{pe}").parse().unwrap(), 100, "pe");
    }
    // Total pool capacity is 400; request well beyond it to force USAGE_EXC.
    let app = Application::new(AppUid::pack(2, 0), "exc1", Arc::new(recipe_with_one_awm(1000)), 5);
    app.enable();

    let awm = app.working_mode(0).unwrap();
    let refn = awm.bind(ResourceType::Cpu, ANY, 0, None);

    let err = app.schedule_request(&accounter, ViewToken::SYSTEM, 0, refn).unwrap_err();
    assert_eq!(err, AppError::WmRejected);
    assert_eq!(app.state(), State::Ready);
    assert_eq!(accounter.available_by_type(ResourceType::ProcElement, ViewToken::SYSTEM), 400);
}

/// Scenario 3: reshuffle detection drives MIGRATE, commit preserves the AWM id.
#[test]
fn reshuffle_to_a_different_cpu_yields_migrate() {
    let accounter = ResourceAccounter::new("sys0".parse().unwrap());
    accounter.register_resource(&"sys0.cpu0.pe0".parse().unwrap(), 100, "pe");
    accounter.register_resource(&"sys0.cpu1.pe0".parse().unwrap(), 100, "pe");

    let app = Application::new(AppUid::pack(3, 0), "exc2", Arc::new(recipe_with_one_awm(50)), 5);
    app.enable();
    let awm = app.working_mode(0).unwrap();

    let refn0 = awm.bind(ResourceType::Cpu, ANY, 0, None);
    app.schedule_request(&accounter, ViewToken::SYSTEM, 0, refn0).unwrap();
    app.schedule_commit().unwrap();
    assert_eq!(app.state(), State::Running);
    assert_eq!(awm.mask_for(ResourceType::Cpu), 0b1);

    let sync_view = accounter.sync_start().unwrap();
    let refn1 = awm.bind(ResourceType::Cpu, ANY, 1, None);
    app.schedule_request(&accounter, sync_view, 0, refn1).unwrap();
    assert_eq!(app.state(), State::Sync);
    assert_eq!(app.sync_state(), SyncState::Migrate);

    accounter.sync_commit().unwrap();
    app.schedule_commit().unwrap();

    assert_eq!(app.state(), State::Running);
    assert_eq!(app.curr_awm(), Some(0));
    assert_eq!(awm.mask_for(ResourceType::Cpu), 0b10);
}

/// Scenario 4: aborting a sync session restores pre-session system-view usage.
#[test]
fn sync_abort_restores_pre_sync_usages() {
    let accounter = ResourceAccounter::new("sys0".parse().unwrap());
    for pe in 0..4 {
        accounter.register_resource(&format!("sys0.cpu0.pe{pe}").parse().unwrap(), 100, "pe");
    }

    let app1 = Application::new(AppUid::pack(4, 0), "exc3", Arc::new(recipe_with_one_awm(50)), 5);
    app1.enable();
    let awm1 = app1.working_mode(0).unwrap();
    let refn = awm1.bind(ResourceType::Cpu, ANY, 0, None);
    app1.schedule_request(&accounter, ViewToken::SYSTEM, 0, refn).unwrap();
    app1.schedule_commit().unwrap();

    let before = accounter.available_by_type(ResourceType::ProcElement, ViewToken::SYSTEM);

    let sync_view = accounter.sync_start().unwrap();
    let app2 = Application::new(AppUid::pack(5, 0), "exc4", Arc::new(recipe_with_one_awm(30)), 5);
    app2.enable();
    let awm2 = app2.working_mode(0).unwrap();
    let refn2 = awm2.bind(ResourceType::Cpu, ANY, 0, None);
    app2.schedule_request(&accounter, sync_view, 0, refn2).unwrap();

    accounter.sync_abort().unwrap();

    assert!(!accounter.in_sync());
    let after = accounter.available_by_type(ResourceType::ProcElement, ViewToken::SYSTEM);
    assert_eq!(before, after);
    // app1 (never touched by the abort) is unaffected; app2's speculative
    // schedule never got committed, so it stays wherever schedule_request left it.
    assert_eq!(app1.state(), State::Running);
}

/// Scenario 5: a runtime constraint invalidates the currently running AWM.
#[test]
fn constraint_invalidates_the_current_awm() {
    let accounter = ResourceAccounter::new("sys0".parse().unwrap());
    accounter.register_resource(&"sys0.cpu0.pe0".parse().unwrap(), 1000, "pe");

    let mut recipe = Recipe::new("multi-awm");
    for id in 0..6u32 {
        let mut requests = HashMap::new();
        requests.insert("sys0.cpu.pe".parse().unwrap(), 10);
        recipe.awms.push(RecipeAwm { id, value: 1.0 + id as f64, requests });
    }
    let app = Application::new(AppUid::pack(6, 0), "exc5", Arc::new(recipe), 5);
    app.enable();

    // Schedule and commit AWM 3 specifically.
    let awm3 = app.working_mode(3).unwrap();
    let refn = awm3.bind(ResourceType::Cpu, ANY, 0, None);
    app.schedule_request(&accounter, ViewToken::SYSTEM, 3, refn).unwrap();
    app.schedule_commit().unwrap();
    assert_eq!(app.curr_awm(), Some(3));
    assert!(!app.curr_inv());
    assert!(app.enabled_awms(&accounter).contains(&3));

    app.set_awm_constraint(AwmConstraint {
        op: ConstraintOp::Add,
        bound: ConstraintBound::Lower,
        awm_id: 5,
    });

    assert!(app.curr_inv());
    assert!(!app.enabled_awms(&accounter).contains(&3));
}

/// Scenario 6: a lower-priority skimmer vetoes every candidate partition.
struct ScoresThree;
impl Skimmer for ScoresThree {
    fn skim(&self, _tg: &TaskGraph, partitions: &mut Vec<Partition>, cluster: u32) -> SkimResult {
        partitions.clear();
        partitions.push(Partition::new(0, cluster));
        partitions.push(Partition::new(1, cluster));
        partitions.push(Partition::new(2, cluster));
        SkimResult::Ok
    }
    fn set(&self, _tg: &TaskGraph, _partition: &Partition) -> rtrm_core::error::ValidatorResult<()> {
        Ok(())
    }
    fn unset(&self, _tg: &TaskGraph, _partition: &Partition) -> rtrm_core::error::ValidatorResult<()> {
        Ok(())
    }
    fn skimmer_type(&self) -> &'static str {
        "scores_three"
    }
}

struct RemovesAll;
impl Skimmer for RemovesAll {
    fn skim(&self, _tg: &TaskGraph, partitions: &mut Vec<Partition>, _cluster: u32) -> SkimResult {
        partitions.clear();
        SkimResult::Ok
    }
    fn set(&self, _tg: &TaskGraph, _partition: &Partition) -> rtrm_core::error::ValidatorResult<()> {
        Ok(())
    }
    fn unset(&self, _tg: &TaskGraph, _partition: &Partition) -> rtrm_core::error::ValidatorResult<()> {
        Ok(())
    }
    fn skimmer_type(&self) -> &'static str {
        "removes_all"
    }
}

#[test]
fn skimmer_chain_veto_reports_the_culprit() {
    let validator = PartitionValidator::new();
    validator.register(100, Box::new(ScoresThree));
    validator.register(50, Box::new(RemovesAll));

    let seed = vec![Partition::new(0, 0)];
    let err = validator.load_partitions(&TaskGraph::default(), seed, 0).unwrap_err();

    assert_eq!(err, ValidatorError::NoPartition);
    assert_eq!(validator.last_failed(), Some("removes_all"));
}
