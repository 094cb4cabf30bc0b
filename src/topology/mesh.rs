//! Face-addressed polyhedral mesh partition.
//!
//! Faces are stored as point loops with an owner cell and, for internal
//! faces, a neighbour cell. Internal faces come first and satisfy
//! `owner < neighbour`; boundary faces follow, grouped by patch in patch
//! order. This is the layout [`TopoChange::commit`] produces.
//!
//! [`TopoChange::commit`]: crate::topology::topo_change::TopoChange::commit

use crate::algs::schedule::CommsSchedule;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::patch::{BoundaryMesh, PatchKind};
use serde::{Deserialize, Serialize};

/// Point coordinates.
pub type Point = [f64; 3];

/// One mesh partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolyMesh {
    points: Vec<Point>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    n_cells: usize,
    boundary: BoundaryMesh,
    #[serde(skip)]
    patch_schedule: Option<CommsSchedule>,
}

impl PolyMesh {
    /// Assemble and validate a mesh.
    ///
    /// `neighbour.len()` is the number of internal faces. The cell count is
    /// inferred from the largest cell index referenced. Meshes without
    /// processor patches get a local patch schedule straight away.
    pub fn new(
        points: Vec<Point>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        boundary: BoundaryMesh,
    ) -> Result<Self, MeshError> {
        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .max()
            .map_or(0, |&c| c + 1);
        let mut mesh = Self {
            points,
            faces,
            owner,
            neighbour,
            n_cells,
            boundary,
            patch_schedule: None,
        };
        mesh.validate_invariants()?;
        mesh.refresh_local_schedule();
        Ok(mesh)
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    pub fn boundary(&self) -> &BoundaryMesh {
        &self.boundary
    }

    pub fn is_internal_face(&self, face: usize) -> bool {
        face < self.neighbour.len()
    }

    /// Owner and (for internal faces) neighbour of a face.
    pub fn face_cells(&self, face: usize) -> Option<(usize, Option<usize>)> {
        let own = *self.owner.get(face)?;
        Some((own, self.neighbour.get(face).copied()))
    }

    /// Owner cells of the faces of one patch, in patch face order.
    pub fn patch_face_cells(&self, patchi: usize) -> Result<&[usize], MeshError> {
        let patch = self.boundary.get(patchi).ok_or(MeshError::IndexOutOfRange {
            entity: "patch",
            index: patchi,
            size: self.boundary.len(),
        })?;
        Ok(&self.owner[patch.range()])
    }

    /// Faces of every cell, internal faces first.
    pub fn cell_faces(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.n_cells];
        for (face, &own) in self.owner.iter().enumerate() {
            out[own].push(face);
        }
        for (face, &nei) in self.neighbour.iter().enumerate() {
            out[nei].push(face);
        }
        for faces in &mut out {
            faces.sort_unstable();
        }
        out
    }

    /// First internal face between two cells, in either orientation.
    pub fn find_face(&self, a: usize, b: usize) -> Option<usize> {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        (0..self.neighbour.len()).find(|&f| self.owner[f] == lo && self.neighbour[f] == hi)
    }

    /// Replace all point coordinates. The point count must not change.
    pub fn move_points(&mut self, points: Vec<Point>) -> Result<(), MeshError> {
        if points.len() != self.points.len() {
            return Err(MeshError::FieldSizeMismatch {
                what: "mesh points".into(),
                expected: self.points.len(),
                found: points.len(),
            });
        }
        self.points = points;
        Ok(())
    }

    /// Patch evaluation schedule used by scheduled communication.
    pub fn patch_schedule(&self) -> Result<&CommsSchedule, MeshError> {
        self.patch_schedule.as_ref().ok_or(MeshError::MissingSchedule)
    }

    /// Install a schedule built from the global coupling graph.
    pub fn set_patch_schedule(&mut self, schedule: CommsSchedule) -> Result<(), MeshError> {
        schedule.check_against(&self.boundary)?;
        self.patch_schedule = Some(schedule);
        Ok(())
    }

    pub fn has_processor_patches(&self) -> bool {
        self.boundary.processor_patches().next().is_some()
    }

    /// Build the local schedule when no processor coupling exists.
    pub(crate) fn refresh_local_schedule(&mut self) {
        if !self.has_processor_patches() && self.patch_schedule.is_none() {
            self.patch_schedule = Some(CommsSchedule::local(&self.boundary));
        }
    }

    /// Swap in a complete new topology. Callers validate beforehand.
    pub(crate) fn replace_topology(
        &mut self,
        points: Vec<Point>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        n_cells: usize,
        boundary: BoundaryMesh,
        schedule: Option<CommsSchedule>,
    ) {
        self.points = points;
        self.faces = faces;
        self.owner = owner;
        self.neighbour = neighbour;
        self.n_cells = n_cells;
        self.boundary = boundary;
        self.patch_schedule = schedule;
    }
}

/// Check face/patch layout rules shared by [`PolyMesh`] and topology commits.
pub(crate) fn check_layout(
    n_points: usize,
    faces: &[Vec<usize>],
    owner: &[usize],
    neighbour: &[usize],
    n_cells: usize,
    boundary: &BoundaryMesh,
) -> Result<(), MeshError> {
    if owner.len() != faces.len() {
        return Err(MeshError::InvalidMesh(format!(
            "{} faces but {} owners",
            faces.len(),
            owner.len()
        )));
    }
    if neighbour.len() > faces.len() {
        return Err(MeshError::InvalidMesh(format!(
            "{} neighbours for {} faces",
            neighbour.len(),
            faces.len()
        )));
    }
    for (face, verts) in faces.iter().enumerate() {
        if verts.len() < 3 {
            return Err(MeshError::InvalidMesh(format!(
                "face {face} has {} points",
                verts.len()
            )));
        }
        if let Some(&p) = verts.iter().find(|&&p| p >= n_points) {
            return Err(MeshError::IndexOutOfRange {
                entity: "point",
                index: p,
                size: n_points,
            });
        }
    }
    for (face, (&own, &nei)) in owner.iter().zip(neighbour).enumerate() {
        if own >= nei {
            return Err(MeshError::InvalidMesh(format!(
                "internal face {face} has owner {own} >= neighbour {nei}"
            )));
        }
    }
    if let Some(&c) = owner.iter().chain(neighbour).find(|&&c| c >= n_cells) {
        return Err(MeshError::IndexOutOfRange {
            entity: "cell",
            index: c,
            size: n_cells,
        });
    }

    let mut next = neighbour.len();
    for (patchi, patch) in boundary.iter().enumerate() {
        if patch.start != next {
            return Err(MeshError::InvalidMesh(format!(
                "patch {} starts at {} but previous patch ends at {next}",
                patch.name, patch.start
            )));
        }
        next += patch.size;
        if let PatchKind::Cyclic { neighbour_patch } = patch.kind {
            let nbr = boundary.get(neighbour_patch).ok_or(MeshError::IndexOutOfRange {
                entity: "patch",
                index: neighbour_patch,
                size: boundary.len(),
            })?;
            if neighbour_patch == patchi || nbr.size != patch.size {
                return Err(MeshError::InvalidMesh(format!(
                    "cyclic patch {} does not match neighbour patch {}",
                    patch.name, nbr.name
                )));
            }
        }
    }
    if next != faces.len() {
        return Err(MeshError::InvalidMesh(format!(
            "patches cover faces up to {next} of {}",
            faces.len()
        )));
    }

    let mut used = vec![false; n_cells];
    for &c in owner.iter().chain(neighbour) {
        used[c] = true;
    }
    if let Some(c) = used.iter().position(|u| !u) {
        return Err(MeshError::InvalidMesh(format!("cell {c} has no faces")));
    }
    Ok(())
}

impl DebugInvariants for PolyMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "PolyMesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshError> {
        check_layout(
            self.points.len(),
            &self.faces,
            &self.owner,
            &self.neighbour,
            self.n_cells,
            &self.boundary,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::patch::Patch;

    /// Two unit cubes side by side along x.
    fn two_cells() -> Result<PolyMesh, MeshError> {
        let mut points = Vec::new();
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..3 {
                    points.push([i as f64, j as f64, k as f64]);
                }
            }
        }
        let p = |i: usize, j: usize, k: usize| i + 3 * (j + 2 * k);
        let faces = vec![
            vec![p(1, 0, 0), p(1, 1, 0), p(1, 1, 1), p(1, 0, 1)],
            vec![p(0, 0, 0), p(0, 0, 1), p(0, 1, 1), p(0, 1, 0)],
            vec![p(2, 0, 0), p(2, 1, 0), p(2, 1, 1), p(2, 0, 1)],
        ];
        let boundary = BoundaryMesh::new(vec![
            Patch::new("left", PatchKind::Normal, 1, 1),
            Patch::new("right", PatchKind::Normal, 2, 1),
        ]);
        PolyMesh::new(points, faces, vec![0, 0, 1], vec![1], boundary)
    }

    #[test]
    fn queries() {
        let mesh = two_cells().unwrap();
        assert_eq!(mesh.n_cells(), 2);
        assert_eq!(mesh.n_internal_faces(), 1);
        assert_eq!(mesh.face_cells(0), Some((0, Some(1))));
        assert_eq!(mesh.face_cells(2), Some((1, None)));
        assert_eq!(mesh.patch_face_cells(1).unwrap(), &[1]);
        assert_eq!(mesh.cell_faces(), vec![vec![0, 1], vec![0, 2]]);
        assert_eq!(mesh.find_face(1, 0), Some(0));
        assert!(mesh.patch_schedule().is_ok());
    }

    #[test]
    fn rejects_gap_in_patches() {
        let mesh = two_cells().unwrap();
        let boundary = BoundaryMesh::new(vec![Patch::new("left", PatchKind::Normal, 1, 1)]);
        let err = PolyMesh::new(
            mesh.points().to_vec(),
            mesh.faces().to_vec(),
            mesh.owner().to_vec(),
            mesh.neighbour().to_vec(),
            boundary,
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::InvalidMesh(_)));
    }

    #[test]
    fn move_points_checks_size() {
        let mut mesh = two_cells().unwrap();
        assert!(mesh.move_points(vec![[0.0; 3]]).is_err());
        let shifted: Vec<Point> = mesh.points().iter().map(|p| [p[0] + 1.0, p[1], p[2]]).collect();
        mesh.move_points(shifted).unwrap();
        assert_eq!(mesh.points()[0], [1.0, 0.0, 0.0]);
    }
}
