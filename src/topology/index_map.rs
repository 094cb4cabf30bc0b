//! Old-to-new renumbering produced by a topology change.
//!
//! An [`IndexMap`] is built once by [`TopoChange::commit`] and is read-only
//! afterwards. Every owner of mesh-indexed data consumes it through the
//! [`TopoChangeAware`] hook (or an equivalent rebinding method) to renumber or
//! drop its entries.
//!
//! [`TopoChange::commit`]: crate::topology::topo_change::TopoChange::commit

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::mesh::Point;
use std::ops::Range;

/// Implemented by everything that stores data indexed by mesh entities.
pub trait TopoChangeAware {
    /// Renumber (or discard) internal state after a committed change.
    fn topo_change(&mut self, map: &IndexMap) -> Result<(), MeshError>;
}

/// Dense old↔new tables for one committed topology change.
///
/// Forward tables (`*_map`) are indexed by old entity and hold `None` for
/// removed entities. Reverse tables are indexed by new entity and hold
/// `None` for entities added by the change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexMap {
    pub(crate) point_map: Vec<Option<usize>>,
    pub(crate) reverse_point_map: Vec<Option<usize>>,
    pub(crate) face_map: Vec<Option<usize>>,
    pub(crate) reverse_face_map: Vec<Option<usize>>,
    pub(crate) flip_face_flux: Vec<bool>,
    pub(crate) cell_map: Vec<Option<usize>>,
    pub(crate) reverse_cell_map: Vec<Option<usize>>,
    pub(crate) cell_sources: Vec<Vec<usize>>,
    /// Per old cell: the new cell it ended up in, following merges.
    pub(crate) merged_cell_map: Vec<Option<usize>>,
    pub(crate) patch_map: Vec<Option<usize>>,
    pub(crate) reverse_patch_map: Vec<Option<usize>>,
    pub(crate) old_patch_starts: Vec<usize>,
    pub(crate) old_patch_sizes: Vec<usize>,
    pub(crate) n_old_internal_faces: usize,
    pub(crate) pre_motion_points: Option<Vec<Point>>,
    pub(crate) coupled_patches_changed: bool,
}

impl IndexMap {
    /// Identity map for a mesh of the given sizes and patch layout.
    pub fn identity(
        n_points: usize,
        n_faces: usize,
        n_cells: usize,
        n_internal_faces: usize,
        patch_ranges: &[Range<usize>],
    ) -> Self {
        let ident = |n: usize| (0..n).map(Some).collect::<Vec<_>>();
        Self {
            point_map: ident(n_points),
            reverse_point_map: ident(n_points),
            face_map: ident(n_faces),
            reverse_face_map: ident(n_faces),
            flip_face_flux: vec![false; n_faces],
            cell_map: ident(n_cells),
            reverse_cell_map: ident(n_cells),
            cell_sources: (0..n_cells).map(|c| vec![c]).collect(),
            merged_cell_map: ident(n_cells),
            patch_map: ident(patch_ranges.len()),
            reverse_patch_map: ident(patch_ranges.len()),
            old_patch_starts: patch_ranges.iter().map(|r| r.start).collect(),
            old_patch_sizes: patch_ranges.iter().map(|r| r.len()).collect(),
            n_old_internal_faces: n_internal_faces,
            pre_motion_points: None,
            coupled_patches_changed: false,
        }
    }

    pub fn n_old_points(&self) -> usize {
        self.point_map.len()
    }

    pub fn n_old_faces(&self) -> usize {
        self.face_map.len()
    }

    pub fn n_old_cells(&self) -> usize {
        self.cell_map.len()
    }

    pub fn n_old_internal_faces(&self) -> usize {
        self.n_old_internal_faces
    }

    pub fn n_points(&self) -> usize {
        self.reverse_point_map.len()
    }

    pub fn n_faces(&self) -> usize {
        self.reverse_face_map.len()
    }

    pub fn n_cells(&self) -> usize {
        self.reverse_cell_map.len()
    }

    pub fn point_map(&self) -> &[Option<usize>] {
        &self.point_map
    }

    pub fn reverse_point_map(&self) -> &[Option<usize>] {
        &self.reverse_point_map
    }

    pub fn face_map(&self) -> &[Option<usize>] {
        &self.face_map
    }

    pub fn reverse_face_map(&self) -> &[Option<usize>] {
        &self.reverse_face_map
    }

    /// Per new face: orientation reversed relative to the old face.
    pub fn flip_face_flux(&self) -> &[bool] {
        &self.flip_face_flux
    }

    pub fn cell_map(&self) -> &[Option<usize>] {
        &self.cell_map
    }

    pub fn reverse_cell_map(&self) -> &[Option<usize>] {
        &self.reverse_cell_map
    }

    /// Per new cell: every old cell merged into it (empty for added cells).
    pub fn cell_sources(&self) -> &[Vec<usize>] {
        &self.cell_sources
    }

    pub fn patch_map(&self) -> &[Option<usize>] {
        &self.patch_map
    }

    pub fn reverse_patch_map(&self) -> &[Option<usize>] {
        &self.reverse_patch_map
    }

    /// Face range an old patch occupied before the change.
    pub fn old_patch_range(&self, old_patch: usize) -> Option<Range<usize>> {
        let start = *self.old_patch_starts.get(old_patch)?;
        Some(start..start + self.old_patch_sizes[old_patch])
    }

    /// New cell an old cell ended up in, following merges.
    pub fn merged_cell(&self, old_cell: usize) -> Option<usize> {
        self.merged_cell_map.get(old_cell).copied().flatten()
    }

    /// Per old cell: the new cell holding it, `None` for deleted cells.
    pub fn merged_cell_map(&self) -> &[Option<usize>] {
        &self.merged_cell_map
    }

    pub fn added_points(&self) -> impl Iterator<Item = usize> + '_ {
        added(&self.reverse_point_map)
    }

    pub fn added_faces(&self) -> impl Iterator<Item = usize> + '_ {
        added(&self.reverse_face_map)
    }

    pub fn added_cells(&self) -> impl Iterator<Item = usize> + '_ {
        added(&self.reverse_cell_map)
    }

    /// New point positions to apply after the change, if points moved.
    pub fn pre_motion_points(&self) -> Option<&[Point]> {
        self.pre_motion_points.as_deref()
    }

    pub fn has_motion_points(&self) -> bool {
        self.pre_motion_points.is_some()
    }

    /// True when coupled patches were resized, renumbered or dropped, so a
    /// communication schedule built before the change is stale.
    pub fn coupled_patches_changed(&self) -> bool {
        self.coupled_patches_changed
    }

    /// Carry point values over to the new numbering; `fill` supplies values
    /// for added points.
    pub fn map_point_values<T: Clone>(
        &self,
        old: &[T],
        fill: impl FnMut(usize) -> T,
    ) -> Result<Vec<T>, MeshError> {
        reverse_map_values("point values", &self.reverse_point_map, old, fill)
    }

    /// Carry face values over to the new numbering.
    pub fn map_face_values<T: Clone>(
        &self,
        old: &[T],
        fill: impl FnMut(usize) -> T,
    ) -> Result<Vec<T>, MeshError> {
        reverse_map_values("face values", &self.reverse_face_map, old, fill)
    }

    /// Carry cell values over to the new numbering. Merged cells take the
    /// value of the cell whose identity they inherit.
    pub fn map_cell_values<T: Clone>(
        &self,
        old: &[T],
        fill: impl FnMut(usize) -> T,
    ) -> Result<Vec<T>, MeshError> {
        reverse_map_values("cell values", &self.reverse_cell_map, old, fill)
    }
}

fn added(reverse: &[Option<usize>]) -> impl Iterator<Item = usize> + '_ {
    reverse
        .iter()
        .enumerate()
        .filter(|(_, old)| old.is_none())
        .map(|(new, _)| new)
}

/// Gather `old` through a new→old table.
pub fn reverse_map_values<T: Clone>(
    what: &str,
    reverse: &[Option<usize>],
    old: &[T],
    mut fill: impl FnMut(usize) -> T,
) -> Result<Vec<T>, MeshError> {
    reverse
        .iter()
        .enumerate()
        .map(|(new, src)| match src {
            Some(o) => old.get(*o).cloned().ok_or_else(|| MeshError::FieldSizeMismatch {
                what: what.to_string(),
                expected: o + 1,
                found: old.len(),
            }),
            None => Ok(fill(new)),
        })
        .collect()
}

fn check_inverse(
    what: &'static str,
    forward: &[Option<usize>],
    reverse: &[Option<usize>],
) -> Result<(), MeshError> {
    for (old, new) in forward.iter().enumerate() {
        if let Some(new) = *new {
            if reverse.get(new).copied().flatten() != Some(old) {
                return Err(MeshError::InvalidTopoChange(format!(
                    "{what} map: old {old} -> new {new} is not inverted"
                )));
            }
        }
    }
    for (new, old) in reverse.iter().enumerate() {
        if let Some(old) = *old {
            if forward.get(old).copied().flatten() != Some(new) {
                return Err(MeshError::InvalidTopoChange(format!(
                    "{what} map: new {new} <- old {old} is not inverted"
                )));
            }
        }
    }
    Ok(())
}

impl DebugInvariants for IndexMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "IndexMap");
    }

    fn validate_invariants(&self) -> Result<(), MeshError> {
        check_inverse("point", &self.point_map, &self.reverse_point_map)?;
        check_inverse("face", &self.face_map, &self.reverse_face_map)?;
        check_inverse("cell", &self.cell_map, &self.reverse_cell_map)?;
        check_inverse("patch", &self.patch_map, &self.reverse_patch_map)?;
        if self.flip_face_flux.len() != self.reverse_face_map.len() {
            return Err(MeshError::InvalidTopoChange(
                "flip flags do not cover all new faces".into(),
            ));
        }
        if self.cell_sources.len() != self.reverse_cell_map.len() {
            return Err(MeshError::InvalidTopoChange(
                "cell sources do not cover all new cells".into(),
            ));
        }
        if self.merged_cell_map.len() != self.cell_map.len() {
            return Err(MeshError::InvalidTopoChange(
                "merge targets do not cover all old cells".into(),
            ));
        }
        for (old, new) in self.merged_cell_map.iter().enumerate() {
            if let Some(new) = *new {
                if !self.cell_sources.get(new).is_some_and(|srcs| srcs.contains(&old)) {
                    return Err(MeshError::InvalidTopoChange(format!(
                        "old cell {old} merged into new cell {new} which does not list it"
                    )));
                }
            }
        }
        for (new, (master, srcs)) in self.reverse_cell_map.iter().zip(&self.cell_sources).enumerate() {
            if let Some(master) = master {
                if !srcs.contains(master) {
                    return Err(MeshError::InvalidTopoChange(format!(
                        "new cell {new} does not list its master {master} among its sources"
                    )));
                }
            }
        }
        Ok(())
    }
}
