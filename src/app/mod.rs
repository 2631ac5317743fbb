//! Application/EXC lifecycle subsystem: recipes (C5 inputs), working modes
//! (C5), the EXC state machine (C6), and the registry (C7).

pub mod application;
pub mod manager;
pub mod recipe;
pub mod working_mode;

pub use application::{Application, AwmConstraint, ConstraintBound, ConstraintOp, State, SyncState};
pub use manager::{ApplicationManager, RecipeLoader};
pub use recipe::{RangeConstraint, Recipe, RecipeAwm, TaskGraphRequirements};
pub use working_mode::WorkingMode;
