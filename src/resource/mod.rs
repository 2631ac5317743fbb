//! Resource accounting subsystem: typed paths (C1), the resource tree (C2),
//! leaf descriptors (C3) and the accounter that books against them (C4).

pub mod accounter;
pub mod path;
pub mod resource;
pub mod tree;

pub use accounter::{ResourceAccounter, ResourceAssignmentRequest};
pub use path::{PathError, PathMatch, ResourcePath, ResourceType, Segment, ANY, NONE};
pub use resource::{FillPolicy, Resource};
pub use tree::{LookupMode, ResourceTree};
