//! Batched topology changes with all-or-nothing commit.
//!
//! A [`TopoChange`] records primitive operations against a snapshot of a
//! mesh's sizes. Nothing touches the mesh until [`TopoChange::commit`], which
//! validates the whole batch, builds the new numbering and only then swaps
//! the new topology in, returning the [`IndexMap`] every data owner must
//! consume.
//!
//! Entities added by the batch are addressed in an *extended* numbering:
//! added points are `n_points..`, added cells `n_cells..`, added faces
//! `n_faces..` (as returned by the `add_*` methods).
//!
//! Faces that reference a cell merged into another cell are redirected to
//! the surviving cell. After redirection every internal face must still
//! separate two distinct cells; internal faces come out ordered by
//! `(owner, neighbour)` with `owner < neighbour` (flipping where needed) and
//! boundary faces grouped by patch.

use crate::algs::schedule::CommsSchedule;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::index_map::{IndexMap, TopoChangeAware};
use crate::topology::mesh::{Point, PolyMesh, check_layout};
use crate::topology::patch::{BoundaryMesh, PatchKind};
use std::collections::{BTreeMap, BTreeSet};

/// Full description of a face after the change.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceChange {
    /// Point loop (extended point numbering).
    pub points: Vec<usize>,
    /// Owner cell (extended cell numbering).
    pub owner: usize,
    /// Neighbour cell for internal faces.
    pub neighbour: Option<usize>,
    /// Patch for boundary faces (old patch numbering).
    pub patch: Option<usize>,
    /// Orientation reversed with respect to the original face.
    pub flip: bool,
}

impl FaceChange {
    /// Copy of an existing mesh face.
    pub fn from_mesh(mesh: &PolyMesh, face: usize) -> Result<Self, MeshError> {
        let (owner, neighbour) = mesh.face_cells(face).ok_or(MeshError::IndexOutOfRange {
            entity: "face",
            index: face,
            size: mesh.n_faces(),
        })?;
        Ok(Self {
            points: mesh.faces()[face].clone(),
            owner,
            neighbour,
            patch: if neighbour.is_some() {
                None
            } else {
                mesh.boundary().which_patch(face)
            },
            flip: false,
        })
    }
}

/// Accumulated primitive operations for one mesh change.
#[derive(Clone, Debug, Default)]
pub struct TopoChange {
    n_points: usize,
    n_faces: usize,
    n_cells: usize,
    n_patches: usize,
    added_points: Vec<Point>,
    moved_points: BTreeMap<usize, Point>,
    removed_points: BTreeSet<usize>,
    added_faces: Vec<FaceChange>,
    modified_faces: BTreeMap<usize, FaceChange>,
    removed_faces: BTreeSet<usize>,
    n_added_cells: usize,
    removed_cells: BTreeMap<usize, Option<usize>>,
    removed_patches: BTreeSet<usize>,
    keep_orphan_points: bool,
}

fn check_index(entity: &'static str, index: usize, size: usize) -> Result<(), MeshError> {
    if index < size {
        Ok(())
    } else {
        Err(MeshError::IndexOutOfRange { entity, index, size })
    }
}

fn rejected(msg: impl Into<String>) -> MeshError {
    MeshError::InvalidTopoChange(msg.into())
}

/// Face staged for the new mesh, in new cell/patch numbering.
struct StagedFace {
    old: Option<usize>,
    points: Vec<usize>,
    owner: usize,
    neighbour: Option<usize>,
    patch: Option<usize>,
    flip: bool,
}

impl TopoChange {
    /// Start an empty batch against the current sizes of `mesh`.
    pub fn new(mesh: &PolyMesh) -> Self {
        Self {
            n_points: mesh.n_points(),
            n_faces: mesh.n_faces(),
            n_cells: mesh.n_cells(),
            n_patches: mesh.boundary().len(),
            ..Default::default()
        }
    }

    /// Keep points that no surviving face uses (default: drop them).
    pub fn keep_orphan_points(mut self, keep: bool) -> Self {
        self.keep_orphan_points = keep;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added_points.is_empty()
            && self.moved_points.is_empty()
            && self.removed_points.is_empty()
            && self.added_faces.is_empty()
            && self.modified_faces.is_empty()
            && self.removed_faces.is_empty()
            && self.n_added_cells == 0
            && self.removed_cells.is_empty()
            && self.removed_patches.is_empty()
    }

    pub fn removed_faces(&self) -> &BTreeSet<usize> {
        &self.removed_faces
    }

    pub fn removed_cells(&self) -> &BTreeMap<usize, Option<usize>> {
        &self.removed_cells
    }

    fn n_points_ext(&self) -> usize {
        self.n_points + self.added_points.len()
    }

    fn n_cells_ext(&self) -> usize {
        self.n_cells + self.n_added_cells
    }

    pub fn add_point(&mut self, point: Point) -> usize {
        self.added_points.push(point);
        self.n_points_ext() - 1
    }

    /// Move an existing point. The new position is reported through
    /// [`IndexMap::pre_motion_points`] rather than applied by the commit.
    pub fn modify_point(&mut self, point: usize, position: Point) -> Result<(), MeshError> {
        check_index("point", point, self.n_points)?;
        if self.removed_points.contains(&point) {
            return Err(rejected(format!("point {point} is already removed")));
        }
        self.moved_points.insert(point, position);
        Ok(())
    }

    pub fn remove_point(&mut self, point: usize) -> Result<(), MeshError> {
        check_index("point", point, self.n_points)?;
        if self.moved_points.contains_key(&point) {
            return Err(rejected(format!("point {point} is modified and removed")));
        }
        self.removed_points.insert(point);
        Ok(())
    }

    pub fn add_cell(&mut self) -> usize {
        self.n_added_cells += 1;
        self.n_cells_ext() - 1
    }

    /// Remove a cell, optionally merging it into `merge_into` (which then
    /// inherits every face reference to the removed cell).
    pub fn remove_cell(&mut self, cell: usize, merge_into: Option<usize>) -> Result<(), MeshError> {
        check_index("cell", cell, self.n_cells)?;
        if let Some(target) = merge_into {
            check_index("cell", target, self.n_cells_ext())?;
            if target == cell {
                return Err(rejected(format!("cell {cell} cannot merge into itself")));
            }
        }
        if self.removed_cells.contains_key(&cell) {
            return Err(rejected(format!("cell {cell} removed twice")));
        }
        self.removed_cells.insert(cell, merge_into);
        Ok(())
    }

    /// Add a face; returns its extended index.
    pub fn add_face(&mut self, face: FaceChange) -> Result<usize, MeshError> {
        self.check_face_refs(&face)?;
        self.added_faces.push(face);
        Ok(self.n_faces + self.added_faces.len() - 1)
    }

    /// Replace connectivity of an existing face.
    pub fn modify_face(&mut self, face: usize, change: FaceChange) -> Result<(), MeshError> {
        check_index("face", face, self.n_faces)?;
        if self.removed_faces.contains(&face) {
            return Err(rejected(format!("face {face} is removed and modified")));
        }
        self.check_face_refs(&change)?;
        self.modified_faces.insert(face, change);
        Ok(())
    }

    pub fn remove_face(&mut self, face: usize) -> Result<(), MeshError> {
        check_index("face", face, self.n_faces)?;
        if self.modified_faces.contains_key(&face) {
            return Err(rejected(format!("face {face} is modified and removed")));
        }
        self.removed_faces.insert(face);
        Ok(())
    }

    /// Drop a patch. It must be left without faces by the rest of the batch.
    pub fn remove_patch(&mut self, patch: usize) -> Result<(), MeshError> {
        check_index("patch", patch, self.n_patches)?;
        self.removed_patches.insert(patch);
        Ok(())
    }

    fn check_face_refs(&self, face: &FaceChange) -> Result<(), MeshError> {
        for &p in &face.points {
            check_index("point", p, self.n_points_ext())?;
        }
        check_index("cell", face.owner, self.n_cells_ext())?;
        if let Some(n) = face.neighbour {
            check_index("cell", n, self.n_cells_ext())?;
        }
        if let Some(p) = face.patch {
            check_index("patch", p, self.n_patches)?;
        }
        Ok(())
    }

    /// Follow merge chains to the cell that survives.
    fn surviving_cell(&self, cell: usize) -> Result<Option<usize>, MeshError> {
        let mut current = cell;
        for _ in 0..=self.removed_cells.len() {
            match self.removed_cells.get(&current) {
                None => return Ok(Some(current)),
                Some(None) => return Ok(None),
                Some(Some(next)) => current = *next,
            }
        }
        Err(rejected(format!("cyclic merge chain starting at cell {cell}")))
    }

    /// Validate the whole batch, renumber and apply it to `mesh`.
    ///
    /// On error the mesh is untouched.
    pub fn commit(self, mesh: &mut PolyMesh) -> Result<IndexMap, MeshError> {
        if mesh.n_points() != self.n_points
            || mesh.n_faces() != self.n_faces
            || mesh.n_cells() != self.n_cells
            || mesh.boundary().len() != self.n_patches
        {
            return Err(rejected("mesh changed since the batch was started"));
        }

        // Cells: survivors keep their relative order, added cells go last.
        let n_cells_ext = self.n_cells_ext();
        let mut cell_map = vec![None; self.n_cells];
        let mut reverse_cell_map = Vec::with_capacity(n_cells_ext);
        let mut ext_cell = vec![None; n_cells_ext];
        for c in 0..n_cells_ext {
            if self.removed_cells.contains_key(&c) {
                continue;
            }
            let new = reverse_cell_map.len();
            ext_cell[c] = Some(new);
            if c < self.n_cells {
                cell_map[c] = Some(new);
                reverse_cell_map.push(Some(c));
            } else {
                reverse_cell_map.push(None);
            }
        }
        for &c in self.removed_cells.keys() {
            ext_cell[c] = match self.surviving_cell(c)? {
                Some(s) => ext_cell[s],
                None => None,
            };
        }
        let n_new_cells = reverse_cell_map.len();
        let mut cell_sources = vec![Vec::new(); n_new_cells];
        for (c, new) in ext_cell.iter().enumerate().take(self.n_cells) {
            if let Some(new) = new {
                cell_sources[*new].push(c);
            }
        }

        // Patches.
        let mut patch_map = vec![None; self.n_patches];
        let mut reverse_patch_map = Vec::with_capacity(self.n_patches);
        for (p, slot) in patch_map.iter_mut().enumerate() {
            if !self.removed_patches.contains(&p) {
                *slot = Some(reverse_patch_map.len());
                reverse_patch_map.push(Some(p));
            }
        }

        // Faces, in new cell and patch numbering.
        let mut staged = Vec::with_capacity(self.n_faces + self.added_faces.len());
        for f in 0..self.n_faces {
            if self.removed_faces.contains(&f) {
                continue;
            }
            let change = match self.modified_faces.get(&f) {
                Some(change) => change.clone(),
                None => FaceChange::from_mesh(mesh, f)?,
            };
            staged.push(self.stage_face(Some(f), change, &ext_cell, &patch_map)?);
        }
        for change in &self.added_faces {
            staged.push(self.stage_face(None, change.clone(), &ext_cell, &patch_map)?);
        }

        let mut order: Vec<usize> = (0..staged.len()).collect();
        order.sort_by_key(|&i| {
            let s = &staged[i];
            match s.neighbour {
                Some(n) => (0, s.owner, n, i),
                None => (1, s.patch.unwrap_or(usize::MAX), 0, i),
            }
        });

        // Points: drop removed ones and (unless asked otherwise) orphans.
        let n_points_ext = self.n_points_ext();
        let mut used = vec![false; n_points_ext];
        for s in &staged {
            for &p in &s.points {
                if self.removed_points.contains(&p) {
                    let face = s.old.map_or_else(|| "added face".to_string(), |f| format!("face {f}"));
                    return Err(rejected(format!("{face} uses removed point {p}")));
                }
                used[p] = true;
            }
        }
        let mut point_map = vec![None; self.n_points];
        let mut reverse_point_map = Vec::with_capacity(n_points_ext);
        let mut ext_point = vec![None; n_points_ext];
        for p in 0..n_points_ext {
            let keep = !self.removed_points.contains(&p) && (used[p] || self.keep_orphan_points);
            if keep {
                let new = reverse_point_map.len();
                ext_point[p] = Some(new);
                if p < self.n_points {
                    point_map[p] = Some(new);
                    reverse_point_map.push(Some(p));
                } else {
                    reverse_point_map.push(None);
                }
            }
        }
        let old_points = mesh.points();
        let ext_position = |p: usize| -> Point {
            if p < self.n_points {
                old_points[p]
            } else {
                self.added_points[p - self.n_points]
            }
        };
        let mut new_points = Vec::with_capacity(reverse_point_map.len());
        for (p, new) in ext_point.iter().enumerate() {
            if new.is_some() {
                new_points.push(ext_position(p));
            }
        }
        let pre_motion_points = (!self.moved_points.is_empty()).then(|| {
            let mut moved = new_points.clone();
            for (&p, &pos) in &self.moved_points {
                if let Some(new) = ext_point[p] {
                    moved[new] = pos;
                }
            }
            moved
        });

        // Assemble the new face arrays.
        let mut face_map = vec![None; self.n_faces];
        let mut reverse_face_map = Vec::with_capacity(staged.len());
        let mut flip_face_flux = Vec::with_capacity(staged.len());
        let mut faces = Vec::with_capacity(staged.len());
        let mut owner = Vec::with_capacity(staged.len());
        let mut neighbour = Vec::new();
        let mut patch_sizes = vec![0usize; reverse_patch_map.len()];
        for &i in &order {
            let s = &staged[i];
            let new = faces.len();
            if let Some(old) = s.old {
                face_map[old] = Some(new);
            }
            reverse_face_map.push(s.old);
            flip_face_flux.push(s.flip);
            // Every used point survives, so the lookup cannot miss.
            faces.push(s.points.iter().filter_map(|&p| ext_point[p]).collect::<Vec<_>>());
            owner.push(s.owner);
            match (s.neighbour, s.patch) {
                (Some(n), _) => neighbour.push(n),
                (None, Some(p)) => patch_sizes[p] += 1,
                (None, None) => unreachable!("staged boundary face without patch"),
            }
        }

        // Patches with their new ranges.
        let old_boundary = mesh.boundary();
        let mut new_patches = Vec::with_capacity(reverse_patch_map.len());
        let mut start = neighbour.len();
        let mut coupled_patches_changed = false;
        for (new, old) in reverse_patch_map.iter().enumerate() {
            let old = old.ok_or_else(|| rejected("patch without source"))?;
            let mut patch = old_boundary[old].clone();
            if patch.kind.is_coupled() && (new != old || patch.size != patch_sizes[new]) {
                coupled_patches_changed = true;
            }
            patch.start = start;
            patch.size = patch_sizes[new];
            if let PatchKind::Cyclic { neighbour_patch } = patch.kind {
                let nbr = patch_map[neighbour_patch].ok_or_else(|| {
                    rejected(format!("cyclic patch {} loses its neighbour patch", patch.name))
                })?;
                patch.kind = PatchKind::Cyclic { neighbour_patch: nbr };
            }
            start += patch.size;
            new_patches.push(patch);
        }
        for &p in &self.removed_patches {
            if old_boundary[p].kind.is_coupled() {
                coupled_patches_changed = true;
            }
        }
        let boundary = BoundaryMesh::new(new_patches);

        check_layout(new_points.len(), &faces, &owner, &neighbour, n_new_cells, &boundary)?;

        let map = IndexMap {
            point_map,
            reverse_point_map,
            face_map,
            reverse_face_map,
            flip_face_flux,
            cell_map,
            reverse_cell_map,
            cell_sources,
            merged_cell_map: ext_cell[..self.n_cells].to_vec(),
            patch_map,
            reverse_patch_map,
            old_patch_starts: old_boundary.iter().map(|p| p.start).collect(),
            old_patch_sizes: old_boundary.iter().map(|p| p.size).collect(),
            n_old_internal_faces: mesh.n_internal_faces(),
            pre_motion_points,
            coupled_patches_changed,
        };
        map.debug_assert_invariants();

        let schedule: Option<CommsSchedule> = match mesh.patch_schedule() {
            Ok(s) if !coupled_patches_changed => {
                let mut s = s.clone();
                s.topo_change(&map)?;
                Some(s)
            }
            _ => None,
        };

        log::info!(
            "Committing topology change: cells {} -> {}, faces {} -> {}, points {} -> {}",
            self.n_cells,
            map.n_cells(),
            self.n_faces,
            map.n_faces(),
            self.n_points,
            map.n_points()
        );
        if coupled_patches_changed {
            log::debug!("Coupled patches changed; patch schedule must be rebuilt");
        }

        mesh.replace_topology(new_points, faces, owner, neighbour, n_new_cells, boundary, schedule);
        mesh.refresh_local_schedule();
        mesh.debug_assert_invariants();
        Ok(map)
    }

    fn stage_face(
        &self,
        old: Option<usize>,
        change: FaceChange,
        ext_cell: &[Option<usize>],
        patch_map: &[Option<usize>],
    ) -> Result<StagedFace, MeshError> {
        let label = || old.map_or_else(|| "added face".to_string(), |f| format!("face {f}"));
        let cell = |c: usize| -> Result<usize, MeshError> {
            ext_cell[c].ok_or_else(|| rejected(format!("{} references removed cell {c}", label())))
        };
        let mut points = change.points;
        let mut owner = cell(change.owner)?;
        let mut flip = change.flip;
        let (neighbour, patch) = match (change.neighbour, change.patch) {
            (Some(n), None) => {
                let mut n = cell(n)?;
                if n == owner {
                    return Err(rejected(format!(
                        "{} would become interior to merged cell {owner}",
                        label()
                    )));
                }
                if owner > n {
                    std::mem::swap(&mut owner, &mut n);
                    points.reverse();
                    flip = !flip;
                }
                (Some(n), None)
            }
            (None, Some(p)) => {
                let p = patch_map[p].ok_or_else(|| {
                    rejected(format!("{} lies on removed patch {p}", label()))
                })?;
                (None, Some(p))
            }
            (Some(_), Some(_)) => {
                return Err(rejected(format!("{} is internal but assigned a patch", label())));
            }
            (None, None) => {
                return Err(rejected(format!("{} is a boundary face without patch", label())));
            }
        };
        Ok(StagedFace {
            old,
            points,
            owner,
            neighbour,
            patch,
            flip,
        })
    }
}
