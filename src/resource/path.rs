//! Typed, ordered resource paths (C1).
//!
//! A path is a dot-separated sequence of `type[id]` segments, e.g. `sys0.cpu1.pe3`.
//! Each [`ResourceType`] may appear at most once per path. `id` is one of the two
//! sentinels [`ANY`]/[`NONE`] (template segments) or a non-negative physical id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `id` sentinel meaning "no id assigned yet" (template segment).
pub const NONE: i32 = -2;
/// `id` sentinel meaning "any id accepted" (template segment, used in queries).
pub const ANY: i32 = -1;

/// Canonical resource-type tags, in the order `§3` enumerates them. The
/// declaration order is load-bearing: [`ResourcePath`] ordering is derived
/// lexicographically from `(ResourceType, id)` segment tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    System,
    Group,
    Cpu,
    Gpu,
    Accelerator,
    ProcElement,
    Memory,
    NetworkIf,
    Interconnect,
    Io,
    Custom,
}

impl ResourceType {
    /// Short canonical string used by the path grammar.
    pub fn canonical(self) -> &'static str {
        match self {
            ResourceType::System => "sys",
            ResourceType::Group => "group",
            ResourceType::Cpu => "cpu",
            ResourceType::Gpu => "gpu",
            ResourceType::Accelerator => "acc",
            ResourceType::ProcElement => "pe",
            ResourceType::Memory => "mem",
            ResourceType::NetworkIf => "nic",
            ResourceType::Interconnect => "ic",
            ResourceType::Io => "io",
            ResourceType::Custom => "custom",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl FromStr for ResourceType {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sys" | "system" => ResourceType::System,
            "group" => ResourceType::Group,
            "cpu" => ResourceType::Cpu,
            "gpu" => ResourceType::Gpu,
            "acc" | "accelerator" => ResourceType::Accelerator,
            "pe" | "proc_element" => ResourceType::ProcElement,
            "mem" | "memory" => ResourceType::Memory,
            "nic" | "network_if" => ResourceType::NetworkIf,
            "ic" | "interconnect" => ResourceType::Interconnect,
            "io" => ResourceType::Io,
            "custom" => ResourceType::Custom,
            _ => return Err(PathError::UnknownType),
        })
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    #[error("resource type already present in this path")]
    UsedType,
    #[error("unrecognized resource type token")]
    UnknownType,
    #[error("id does not match the segment being replaced")]
    MissId,
}

/// Result of comparing two paths or two segments, per `§4.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    Equal,
    EqualTypes,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub ty: ResourceType,
    pub id: i32,
}

impl Segment {
    fn compare(&self, other: &Segment) -> PathMatch {
        if self.ty != other.ty {
            return PathMatch::NotEqual;
        }
        if self.id == other.id {
            PathMatch::Equal
        } else {
            PathMatch::EqualTypes
        }
    }
}

/// An ordered sequence of `(type, id)` segments. See module docs for the grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    segments: Vec<Segment>,
}

impl ResourcePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends a segment, failing if `ty` already occurs in this path.
    pub fn append(&mut self, ty: ResourceType, id: i32) -> Result<(), PathError> {
        if self.segments.iter().any(|s| s.ty == ty) {
            return Err(PathError::UsedType);
        }
        self.segments.push(Segment { ty, id });
        Ok(())
    }

    /// Parses `a.b.c` / `a0.b1.c2` dotted segments and appends each of them.
    /// With `smart = true`, malformed or duplicate segments are silently skipped
    /// instead of aborting the whole parse.
    pub fn append_string(&mut self, s: &str, smart: bool) -> Result<(), PathError> {
        for token in s.split('.').filter(|t| !t.is_empty()) {
            match Self::parse_token(token) {
                Ok((ty, id)) => {
                    if let Err(e) = self.append(ty, id) {
                        if !smart {
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    if !smart {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_token(token: &str) -> Result<(ResourceType, i32), PathError> {
        let split_at = token
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(token.len());
        let (ty_str, id_str) = token.split_at(split_at);
        let ty = ResourceType::from_str(ty_str)?;
        let id = if id_str.is_empty() {
            NONE
        } else {
            id_str.parse::<i32>().map_err(|_| PathError::UnknownType)?
        };
        Ok((ty, id))
    }

    /// Rewrites the id of the (unique) segment of type `ty`.
    pub fn replace_id(&mut self, ty: ResourceType, src_id: i32, dst_id: i32) -> Result<(), PathError> {
        let seg = self
            .segments
            .iter_mut()
            .find(|s| s.ty == ty)
            .ok_or(PathError::UnknownType)?;
        if src_id != ANY && seg.id != src_id {
            return Err(PathError::MissId);
        }
        seg.id = dst_id;
        Ok(())
    }

    /// Segment-wise comparison against `other`, per `§4.1`.
    pub fn compare(&self, other: &ResourcePath) -> PathMatch {
        if self.segments.len() != other.segments.len() {
            return PathMatch::NotEqual;
        }
        let mut any_id_diff = false;
        for (a, b) in self.segments.iter().zip(other.segments.iter()) {
            match a.compare(b) {
                PathMatch::NotEqual => return PathMatch::NotEqual,
                PathMatch::EqualTypes => any_id_diff = true,
                PathMatch::Equal => {}
            }
        }
        if any_id_diff {
            PathMatch::EqualTypes
        } else {
            PathMatch::Equal
        }
    }

    pub fn is_template(&self) -> bool {
        self.segments.iter().all(|s| s.id == NONE || s.id == ANY)
    }

    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| s.id >= 0)
    }

    /// Type of the segment immediately above `ty`, or `None` if `ty` is at the
    /// root or absent from this path.
    pub fn parent_type(&self, ty: ResourceType) -> Option<ResourceType> {
        let idx = self.segments.iter().position(|s| s.ty == ty)?;
        if idx == 0 {
            None
        } else {
            Some(self.segments[idx - 1].ty)
        }
    }

    pub fn id_of(&self, ty: ResourceType) -> Option<i32> {
        self.segments.iter().find(|s| s.ty == ty).map(|s| s.id)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg.ty.canonical())?;
            if seg.id >= 0 {
                write!(f, "{}", seg.id)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = ResourcePath::new();
        p.append_string(s, false)?;
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rejects_duplicate_type() {
        let mut p = ResourcePath::new();
        p.append(ResourceType::Cpu, 0).unwrap();
        assert_eq!(p.append(ResourceType::Cpu, 1), Err(PathError::UsedType));
    }

    #[test]
    fn parses_the_bit_exact_grammar() {
        let p: ResourcePath = "sys0.cpu1.pe3".parse().unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.id_of(ResourceType::Cpu), Some(1));
        assert_eq!(p.to_string(), "sys0.cpu1.pe3");
    }

    #[test]
    fn smart_parse_skips_malformed_segments() {
        let mut p = ResourcePath::new();
        p.append_string("sys0.bogus.cpu1", true).unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn compare_distinguishes_equal_types_from_equal() {
        let a: ResourcePath = "sys0.cpu1".parse().unwrap();
        let b: ResourcePath = "sys0.cpu2".parse().unwrap();
        let c: ResourcePath = "sys0.cpu1".parse().unwrap();
        assert_eq!(a.compare(&b), PathMatch::EqualTypes);
        assert_eq!(a.compare(&c), PathMatch::Equal);
        let d: ResourcePath = "sys0.gpu1".parse().unwrap();
        assert_eq!(a.compare(&d), PathMatch::NotEqual);
    }

    #[test]
    fn template_and_parent_type() {
        let tpl: ResourcePath = "sys.cpu.pe".parse().unwrap();
        assert!(tpl.is_template());
        assert!(!tpl.is_exact());
        assert_eq!(tpl.parent_type(ResourceType::ProcElement), Some(ResourceType::Cpu));
        assert_eq!(tpl.parent_type(ResourceType::System), None);
    }

    #[test]
    fn replace_id_requires_matching_source() {
        let mut p: ResourcePath = "sys0.cpu1".parse().unwrap();
        assert_eq!(
            p.replace_id(ResourceType::Cpu, 5, 2),
            Err(PathError::MissId)
        );
        p.replace_id(ResourceType::Cpu, ANY, 2).unwrap();
        assert_eq!(p.id_of(ResourceType::Cpu), Some(2));
    }

    #[test]
    fn ordering_is_lexicographic_by_segment() {
        let a: ResourcePath = "sys0.cpu0".parse().unwrap();
        let b: ResourcePath = "sys0.cpu1".parse().unwrap();
        assert!(a < b);
    }
}
