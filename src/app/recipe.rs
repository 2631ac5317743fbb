//! Declarative per-application recipe: the immutable catalogue of AWMs an
//! EXC may be scheduled onto, loaded once per application name and shared
//! (via the manager's LRU cache) across every EXC that names it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::{ResourcePath, ResourceType};

/// A single alternative working mode as declared in the recipe, prior to any
/// per-round binding. `value` is the recipe-declared QoS/goodness score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeAwm {
    pub id: u32,
    pub value: f64,
    /// `ResourcePath → amount`, template paths (no physical id bound yet).
    pub requests: HashMap<ResourcePath, u64>,
}

/// A closed `[min, max]` range a resource type's static configuration must
/// stay within for this recipe to be schedulable at all (independent of any
/// runtime [`crate::app::application::Application::set_awm_constraint`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeConstraint {
    pub min: u64,
    pub max: u64,
}

impl RangeConstraint {
    pub fn contains(&self, amount: u64) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// Minimal task-graph requirement block: task count and a design-time
/// task→candidate-partition mapping hint. The wire format for the actual
/// graph exchange is an unspecified, unversioned blob outside the core
/// (`§6`); this only carries what recipe-level admission needs to see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraphRequirements {
    pub task_count: u32,
    pub design_time_mapping: HashMap<u32, u32>,
}

/// A loaded recipe: the full AWM catalogue plus static per-type constraints,
/// an optional task-graph requirement block, and an open plugin-data bag for
/// programming-model-specific extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub awms: Vec<RecipeAwm>,
    pub static_constraints: HashMap<ResourceType, RangeConstraint>,
    pub task_graph: Option<TaskGraphRequirements>,
    pub plugin_data: HashMap<String, Value>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Recipe {
            name: name.into(),
            awms: Vec::new(),
            static_constraints: HashMap::new(),
            task_graph: None,
            plugin_data: HashMap::new(),
        }
    }

    /// Rescales every AWM's `value` into `[0, 1]` relative to the highest
    /// value in the set. A recipe with a single AWM normalizes to `1.0`.
    pub fn normalize_values(&mut self) {
        let max = self.awms.iter().map(|a| a.value).fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return;
        }
        for awm in &mut self.awms {
            awm.value /= max;
        }
    }

    pub fn awm(&self, id: u32) -> Option<&RecipeAwm> {
        self.awms.iter().find(|a| a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_values_scales_to_unit_interval() {
        let mut r = Recipe::new("bodytrack");
        r.awms.push(RecipeAwm { id: 0, value: 10.0, requests: HashMap::new() });
        r.awms.push(RecipeAwm { id: 1, value: 5.0, requests: HashMap::new() });
        r.normalize_values();
        assert_eq!(r.awm(0).unwrap().value, 1.0);
        assert_eq!(r.awm(1).unwrap().value, 0.5);
    }

    #[test]
    fn single_awm_normalizes_to_one() {
        let mut r = Recipe::new("solo");
        r.awms.push(RecipeAwm { id: 0, value: 3.5, requests: HashMap::new() });
        r.normalize_values();
        assert_eq!(r.awm(0).unwrap().value, 1.0);
    }

    #[test]
    fn range_constraint_contains_is_inclusive() {
        let rc = RangeConstraint { min: 5, max: 10 };
        assert!(rc.contains(5));
        assert!(rc.contains(10));
        assert!(!rc.contains(11));
    }
}
