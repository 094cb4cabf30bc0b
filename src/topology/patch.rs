//! Boundary patches and the ordered patch list of a mesh.
//!
//! A patch is a named, contiguous range of boundary faces. Patches are
//! addressed by their position in [`BoundaryMesh`]; that order is fixed by
//! whoever built the mesh and is never changed implicitly.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Physical classification of a patch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatchKind {
    /// Ordinary boundary; fields on it are configured by the user.
    Normal,
    /// Constraint patch that carries no data (e.g. the out-of-plane sides
    /// of a 2D case).
    Empty,
    /// Interface to another partition.
    Processor {
        my_rank: usize,
        neighbour_rank: usize,
        /// Interface tag shared by both sides of the coupling.
        tag: u16,
    },
    /// Periodic coupling to another patch of the same partition. Face `i`
    /// of this patch is coupled to face `i` of the neighbour patch.
    Cyclic { neighbour_patch: usize },
}

impl PatchKind {
    /// Type name used in patch field dictionaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            PatchKind::Normal => "patch",
            PatchKind::Empty => "empty",
            PatchKind::Processor { .. } => "processor",
            PatchKind::Cyclic { .. } => "cyclic",
        }
    }

    /// Constraint patches dictate their own patch field type.
    pub fn is_constraint(&self) -> bool {
        !matches!(self, PatchKind::Normal)
    }

    pub fn is_coupled(&self) -> bool {
        matches!(self, PatchKind::Processor { .. } | PatchKind::Cyclic { .. })
    }

    pub fn is_processor(&self) -> bool {
        matches!(self, PatchKind::Processor { .. })
    }
}

/// A named contiguous range of boundary faces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub name: String,
    pub kind: PatchKind,
    /// First face of the patch in the mesh face list.
    pub start: usize,
    /// Number of faces.
    pub size: usize,
    /// Patch groups this patch belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Patch {
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            size,
            groups: Vec::new(),
        }
    }

    /// Builder-style group assignment.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Mesh face indices covered by this patch.
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    /// Local index of a mesh face within this patch.
    pub fn local_index(&self, face: usize) -> Option<usize> {
        self.range().contains(&face).then(|| face - self.start)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Ordered list of the patches of one mesh partition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundaryMesh {
    patches: Vec<Patch>,
}

impl BoundaryMesh {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, patchi: usize) -> Option<&Patch> {
        self.patches.get(patchi)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }

    pub fn as_slice(&self) -> &[Patch] {
        &self.patches
    }

    /// Index of the patch with exactly this name.
    pub fn find_patch_id(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Patches whose name equals `key`, plus (with `use_groups`) every patch
    /// that belongs to a group called `key`. Result is in patch order.
    pub fn find_indices(&self, key: &str, use_groups: bool) -> Vec<usize> {
        self.patches
            .iter()
            .enumerate()
            .filter(|(_, p)| p.name == key || (use_groups && p.in_group(key)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Patch owning a boundary face, if any.
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        self.patches.iter().position(|p| p.range().contains(&face))
    }

    /// Indices of processor patches, in patch order.
    pub fn processor_patches(&self) -> impl Iterator<Item = usize> + '_ {
        self.patches
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind.is_processor())
            .map(|(i, _)| i)
    }
}

impl std::ops::Index<usize> for BoundaryMesh {
    type Output = Patch;

    fn index(&self, patchi: usize) -> &Patch {
        &self.patches[patchi]
    }
}

impl<'a> IntoIterator for &'a BoundaryMesh {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bmesh() -> BoundaryMesh {
        BoundaryMesh::new(vec![
            Patch::new("inlet", PatchKind::Normal, 10, 2).with_groups(["walls"]),
            Patch::new("outlet", PatchKind::Normal, 12, 2),
            Patch::new("top", PatchKind::Normal, 14, 3).with_groups(["walls", "lid"]),
            Patch::new("frontAndBack", PatchKind::Empty, 17, 4),
        ])
    }

    #[test]
    fn find_by_name_and_group() {
        let b = bmesh();
        assert_eq!(b.find_patch_id("outlet"), Some(1));
        assert_eq!(b.find_patch_id("walls"), None);
        assert_eq!(b.find_indices("walls", true), vec![0, 2]);
        assert!(b.find_indices("walls", false).is_empty());
        assert_eq!(b.find_indices("top", false), vec![2]);
    }

    #[test]
    fn face_lookup() {
        let b = bmesh();
        assert_eq!(b.which_patch(13), Some(1));
        assert_eq!(b.which_patch(9), None);
        assert_eq!(b[2].local_index(15), Some(1));
        assert_eq!(b[2].local_index(17), None);
    }

    #[test]
    fn kind_classification() {
        assert!(PatchKind::Empty.is_constraint());
        assert!(!PatchKind::Empty.is_coupled());
        assert!(PatchKind::Cyclic { neighbour_patch: 0 }.is_coupled());
        assert!(!PatchKind::Normal.is_constraint());
    }
}
