//! Hierarchy of resource descriptors (C2), with exact/type/mixed lookup modes.

use std::collections::HashMap;
use std::sync::Arc;

use super::path::{ResourcePath, ResourceType, Segment};
use super::resource::Resource;

/// Controls how a tree segment is matched against a query segment during
/// [`ResourceTree::find_list`] (`§4.2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// First match only, fully specified id chain.
    Exact,
    /// Ignore ids, match by type sequence (template paths).
    Type,
    /// Id-aware: exact id when the query specifies one, any id otherwise.
    Mixed,
}

struct Node {
    seg: Segment,
    resource: Arc<Resource>,
    children: HashMap<ResourceType, Vec<Node>>,
}

/// Rooted tree keyed by path segments; every node (not only leaves) owns a
/// [`Resource`], since intermediate nodes (e.g. a `cpu` group) can themselves
/// carry capacity (`§3`).
pub struct ResourceTree {
    root: HashMap<ResourceType, Vec<Node>>,
    max_depth: usize,
    total_resources: usize,
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTree {
    pub fn new() -> Self {
        ResourceTree {
            root: HashMap::new(),
            max_depth: 0,
            total_resources: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.max_depth
    }

    pub fn total_resources(&self) -> usize {
        self.total_resources
    }

    /// Walks/creates nodes for each segment of `path`, returning the leaf's
    /// descriptor. Idempotent: re-inserting an already-present path returns
    /// the existing descriptor rather than creating a new one.
    pub fn insert(&mut self, path: &ResourcePath) -> Arc<Resource> {
        assert!(!path.is_empty(), "cannot insert an empty resource path");
        let mut current_children = &mut self.root;
        let mut current_resource = None;
        for (depth, seg) in path.segments().iter().enumerate() {
            let bucket = current_children.entry(seg.ty).or_default();
            let idx = match bucket.iter().position(|n| n.seg.id == seg.id) {
                Some(i) => i,
                None => {
                    bucket.push(Node {
                        seg: *seg,
                        resource: Arc::new(Resource::new(0, String::new())),
                        children: HashMap::new(),
                    });
                    self.total_resources += 1;
                    bucket.len() - 1
                }
            };
            let node = &mut bucket[idx];
            current_resource = Some(node.resource.clone());
            current_children = &mut node.children;
            self.max_depth = self.max_depth.max(depth + 1);
        }
        current_resource.expect("path has at least one segment")
    }

    pub fn exists(&self, path: &ResourcePath) -> bool {
        !self.find_list(path, LookupMode::Exact, true).is_empty()
    }

    /// Every resource of type `ty` anywhere in the tree, regardless of its
    /// ancestors. Used for type-wide aggregates (`available_by_type`) where
    /// no single path template would reach every occurrence.
    pub fn collect_type(&self, ty: ResourceType) -> Vec<Arc<Resource>> {
        let mut out = Vec::new();
        Self::collect_type_rec(&self.root, ty, &mut out);
        out
    }

    fn collect_type_rec(children: &HashMap<ResourceType, Vec<Node>>, ty: ResourceType, out: &mut Vec<Arc<Resource>>) {
        for bucket in children.values() {
            for node in bucket {
                if node.seg.ty == ty {
                    out.push(node.resource.clone());
                }
                Self::collect_type_rec(&node.children, ty, out);
            }
        }
    }

    /// Pre-order walk matching `path` against the tree under `mode`. When
    /// `first` is set, the walk stops at the first hit.
    pub fn find_list(
        &self,
        path: &ResourcePath,
        mode: LookupMode,
        first: bool,
    ) -> Vec<(ResourcePath, Arc<Resource>)> {
        let mut out = Vec::new();
        let mut acc = Vec::new();
        Self::walk(&self.root, path.segments(), mode, first, &mut acc, &mut out);
        out
    }

    fn segment_matches(mode: LookupMode, query_id: i32, actual_id: i32) -> bool {
        match mode {
            LookupMode::Exact => actual_id == query_id,
            LookupMode::Type => true,
            LookupMode::Mixed => {
                if query_id >= 0 {
                    actual_id == query_id
                } else {
                    true
                }
            }
        }
    }

    /// Returns `true` once `first` short-circuits the whole search.
    fn walk(
        children: &HashMap<ResourceType, Vec<Node>>,
        query: &[Segment],
        mode: LookupMode,
        first: bool,
        acc: &mut Vec<Segment>,
        out: &mut Vec<(ResourcePath, Arc<Resource>)>,
    ) -> bool {
        let Some((qseg, rest)) = query.split_first() else {
            return false;
        };
        let Some(bucket) = children.get(&qseg.ty) else {
            return false;
        };
        for child in bucket {
            if !Self::segment_matches(mode, qseg.id, child.seg.id) {
                continue;
            }
            acc.push(child.seg);
            let stop = if rest.is_empty() {
                out.push((path_from(acc), child.resource.clone()));
                first
            } else {
                Self::walk(&child.children, rest, mode, first, acc, out)
            };
            acc.pop();
            if stop {
                return true;
            }
        }
        false
    }
}

fn path_from(segments: &[Segment]) -> ResourcePath {
    let mut p = ResourcePath::new();
    for seg in segments {
        p.append(seg.ty, seg.id).expect("walked segments never repeat a type");
    }
    p
}
