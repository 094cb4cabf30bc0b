//! Compatible face removal: merge cells by deleting the faces between them.
//!
//! Removing an arbitrary set of internal faces can produce cells that share
//! more than one face with a neighbouring cell, or merged cells the geometry
//! layer cannot represent. [`FaceRemover::compatible_removes`] shrinks the
//! candidate set until neither happens and reports the resulting cell
//! regions; [`FaceRemover::set_refinement`] turns that result into
//! [`TopoChange`] primitives.
//!
//! The result is a fixed point: feeding the returned face list back in
//! returns it unchanged.

use crate::mesh_error::MeshError;
use crate::topology::index_map::{IndexMap, TopoChangeAware};
use crate::topology::mesh::PolyMesh;
use crate::topology::topo_change::TopoChange;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

/// Geometric admissibility of a merged cell.
pub trait MergeValidator {
    /// `cells` (ascending) would become one cell once `faces` are removed.
    fn admissible(&self, mesh: &PolyMesh, cells: &[usize], faces: &[usize]) -> bool;
}

/// Accepts every merge; only the duplicate-face rule applies.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllMerges;

impl MergeValidator for AcceptAllMerges {
    fn admissible(&self, _mesh: &PolyMesh, _cells: &[usize], _faces: &[usize]) -> bool {
        true
    }
}

/// Rejects merged cells built from more than the given number of cells.
#[derive(Clone, Copy, Debug)]
pub struct MaxRegionCells(pub usize);

impl MergeValidator for MaxRegionCells {
    fn admissible(&self, _mesh: &PolyMesh, cells: &[usize], _faces: &[usize]) -> bool {
        cells.len() <= self.0
    }
}

/// Outcome of [`FaceRemover::compatible_removes`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompatibleRemoves {
    /// Faces that will actually be removed, ascending.
    pub faces: Vec<usize>,
    /// Region of every cell; `None` for cells that are not merged.
    pub cell_region: Vec<Option<usize>>,
    /// Surviving (lowest-index) cell of each region.
    pub region_master: Vec<usize>,
}

impl CompatibleRemoves {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn n_regions(&self) -> usize {
        self.region_master.len()
    }

    /// Cells of one region, ascending.
    pub fn region_cells(&self, region: usize) -> Vec<usize> {
        self.cell_region
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == Some(region))
            .map(|(c, _)| c)
            .collect()
    }
}

/// Minimal disjoint-set forest whose roots are always the smallest member.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Cell regions induced by a set of accepted faces.
struct Regions {
    cell_region: Vec<Option<usize>>,
    master: Vec<usize>,
    cells: Vec<Vec<usize>>,
    /// Internal faces with both cells in the same region.
    interior: Vec<Vec<usize>>,
}

impl Regions {
    fn build(mesh: &PolyMesh, accepted: &BTreeSet<usize>) -> Self {
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        let mut sets = DisjointSets::new(mesh.n_cells());
        let mut touched = vec![false; mesh.n_cells()];
        for &f in accepted {
            sets.union(owner[f], neighbour[f]);
            touched[owner[f]] = true;
            touched[neighbour[f]] = true;
        }

        let mut root_region = BTreeMap::new();
        let mut master = Vec::new();
        let mut cell_region = vec![None; mesh.n_cells()];
        let mut cells: Vec<Vec<usize>> = Vec::new();
        for c in (0..mesh.n_cells()).filter(|&c| touched[c]) {
            let root = sets.find(c);
            let region = *root_region.entry(root).or_insert_with(|| {
                master.push(root);
                cells.push(Vec::new());
                master.len() - 1
            });
            cell_region[c] = Some(region);
            cells[region].push(c);
        }

        let mut interior = vec![Vec::new(); master.len()];
        for (f, (&own, &nei)) in owner.iter().zip(neighbour).enumerate() {
            if let Some(r) = cell_region[own] {
                if cell_region[nei] == Some(r) {
                    interior[r].push(f);
                }
            }
        }

        Self {
            cell_region,
            master,
            cells,
            interior,
        }
    }

    fn into_result(self) -> CompatibleRemoves {
        CompatibleRemoves {
            faces: self.interior.into_iter().flatten().sorted_unstable().collect(),
            cell_region: self.cell_region,
            region_master: self.master,
        }
    }
}

/// Either a merged region or a cell left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Node {
    Region(usize),
    Cell(usize),
}

/// Face-removal engine.
#[derive(Clone, Debug, Default)]
pub struct FaceRemover<V = AcceptAllMerges> {
    validator: V,
    merged_cells: Vec<usize>,
}

impl<V: MergeValidator> FaceRemover<V> {
    pub fn new(validator: V) -> Self {
        Self {
            validator,
            merged_cells: Vec::new(),
        }
    }

    /// Cells produced by the last applied merge, in current mesh numbering.
    pub fn merged_cells(&self) -> &[usize] {
        &self.merged_cells
    }

    /// Largest subset of `candidates` that can be removed consistently.
    ///
    /// Boundary and out-of-range faces are dropped. When the remaining
    /// candidates are compatible as a whole they are all removed. Otherwise
    /// candidates are accepted in ascending order, each one only if the
    /// merge stays compatible, and the rejected ones are retried until none
    /// fits. No rejected candidate can then be added back, and feeding the
    /// result in again returns it unchanged.
    ///
    /// Faces that end up between two cells of the same region are removed
    /// as well, even when they were not candidates. No candidate qualifying
    /// is not an error: the result is simply empty.
    pub fn compatible_removes(&self, mesh: &PolyMesh, candidates: &[usize]) -> CompatibleRemoves {
        let mut requested = BTreeSet::new();
        for &f in candidates {
            if f >= mesh.n_faces() {
                log::warn!("Ignoring face {f}: mesh has {} faces", mesh.n_faces());
            } else if !mesh.is_internal_face(f) {
                log::warn!("Not removing boundary face {f}");
            } else {
                requested.insert(f);
            }
        }
        let n_requested = requested.len();

        let regions = match self.compatible_regions(mesh, &requested) {
            Some(regions) => regions,
            None => {
                let mut accepted = BTreeSet::new();
                let mut rejected: Vec<usize> = requested.into_iter().collect();
                loop {
                    let before = rejected.len();
                    rejected.retain(|&f| {
                        accepted.insert(f);
                        if self.compatible_regions(mesh, &accepted).is_some() {
                            return false;
                        }
                        accepted.remove(&f);
                        true
                    });
                    if rejected.len() == before {
                        break;
                    }
                }
                for f in &rejected {
                    log::debug!("Keeping face {f}: removing it breaks a merged cell");
                }
                Regions::build(mesh, &accepted)
            }
        };

        let result = regions.into_result();
        log::debug!(
            "Compatible removal: {} of {n_requested} candidate faces, {} regions",
            result.faces.len(),
            result.n_regions()
        );
        result
    }

    /// Regions of `accepted` if every one of them is admissible and free of
    /// duplicate faces.
    fn compatible_regions(&self, mesh: &PolyMesh, accepted: &BTreeSet<usize>) -> Option<Regions> {
        let regions = Regions::build(mesh, accepted);
        let admissible = (0..regions.master.len())
            .all(|r| self.validator.admissible(mesh, &regions.cells[r], &regions.interior[r]));
        (admissible && !has_duplicate_faces(mesh, &regions)).then_some(regions)
    }

    /// Record the removal in `change`: faces go, non-master cells merge into
    /// their region master.
    pub fn set_refinement(
        &mut self,
        mesh: &PolyMesh,
        removes: &CompatibleRemoves,
        change: &mut TopoChange,
    ) -> Result<(), MeshError> {
        if removes.cell_region.len() != mesh.n_cells() {
            return Err(MeshError::FieldSizeMismatch {
                what: "cell regions".into(),
                expected: mesh.n_cells(),
                found: removes.cell_region.len(),
            });
        }
        for &f in &removes.faces {
            change.remove_face(f)?;
        }
        for (cell, region) in removes.cell_region.iter().enumerate() {
            let Some(region) = *region else { continue };
            let master = *removes.region_master.get(region).ok_or(MeshError::IndexOutOfRange {
                entity: "region",
                index: region,
                size: removes.region_master.len(),
            })?;
            if cell != master {
                change.remove_cell(cell, Some(master))?;
            }
        }
        self.merged_cells = removes.region_master.clone();
        Ok(())
    }
}

/// True when some region would share more than one surviving face with the
/// same neighbouring region or cell.
fn has_duplicate_faces(mesh: &PolyMesh, regions: &Regions) -> bool {
    let node = |c: usize| match regions.cell_region[c] {
        Some(r) => Node::Region(r),
        None => Node::Cell(c),
    };
    let mut shared: BTreeSet<(Node, Node)> = BTreeSet::new();
    for (&own, &nei) in mesh.owner().iter().zip(mesh.neighbour()) {
        let (a, b) = (node(own), node(nei));
        if a == b || (matches!(a, Node::Cell(_)) && matches!(b, Node::Cell(_))) {
            continue;
        }
        if !shared.insert((a.min(b), a.max(b))) {
            return true;
        }
    }
    false
}

impl<V> TopoChangeAware for FaceRemover<V> {
    fn topo_change(&mut self, map: &IndexMap) -> Result<(), MeshError> {
        self.merged_cells = self
            .merged_cells
            .iter()
            .filter_map(|&c| map.merged_cell(c))
            .sorted_unstable()
            .dedup()
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::block::BlockMesh;

    #[test]
    fn single_face_merges_two_cells() {
        let mesh = BlockMesh::new(2, 2, 2).build().unwrap();
        let f = mesh.find_face(4, 5).unwrap();
        let out = FaceRemover::new(AcceptAllMerges).compatible_removes(&mesh, &[f]);
        assert_eq!(out.faces, vec![f]);
        assert_eq!(out.n_regions(), 1);
        assert_eq!(out.region_cells(0), vec![4, 5]);
        assert_eq!(out.region_master, vec![4]);
    }

    #[test]
    fn boundary_and_unknown_faces_are_dropped() {
        let mesh = BlockMesh::new(2, 1, 1).build().unwrap();
        let out = FaceRemover::new(AcceptAllMerges).compatible_removes(&mesh, &[1, 2, 999]);
        assert!(out.is_empty());
        assert!(out.cell_region.iter().all(Option::is_none));
    }

    #[test]
    fn ring_of_four_keeps_one_merge() {
        // 0 1
        // 2 3 : removing (0,1) and (2,3) would leave two faces between the halves.
        let mesh = BlockMesh::new(2, 2, 1).build().unwrap();
        let a = mesh.find_face(0, 1).unwrap();
        let b = mesh.find_face(2, 3).unwrap();
        let remover = FaceRemover::new(AcceptAllMerges);
        let out = remover.compatible_removes(&mesh, &[a, b]);
        assert_eq!(out.faces, vec![a]);
        assert_eq!(out.region_master, vec![0]);
        assert_eq!(remover.compatible_removes(&mesh, &out.faces), out);
    }

    #[test]
    fn interior_faces_of_a_region_are_removed_too() {
        // Three faces around the 2x2 ring connect all four cells; the fourth
        // face becomes interior and must go as well.
        let mesh = BlockMesh::new(2, 2, 1).build().unwrap();
        let cands = [
            mesh.find_face(0, 1).unwrap(),
            mesh.find_face(0, 2).unwrap(),
            mesh.find_face(1, 3).unwrap(),
        ];
        let out = FaceRemover::new(AcceptAllMerges).compatible_removes(&mesh, &cands);
        assert_eq!(out.faces, vec![0, 1, 2, 3]);
        assert_eq!(out.region_master, vec![0]);
    }

    #[test]
    fn validator_limits_region_size() {
        let mesh = BlockMesh::new(4, 1, 1).build().unwrap();
        let all: Vec<usize> = (0..mesh.n_internal_faces()).collect();
        let out = FaceRemover::new(MaxRegionCells(2)).compatible_removes(&mesh, &all);
        assert_eq!(out.faces, vec![0, 2]);
        assert_eq!(out.region_cells(0), vec![0, 1]);
        assert_eq!(out.region_cells(1), vec![2, 3]);
    }

    #[test]
    fn only_the_conflicting_face_is_kept() {
        // 0 1 2
        // 3 4 5 : merging 0-1 and 0-3 touches cell 4 twice; 1-2 is fine.
        let mesh = BlockMesh::new(3, 3, 1).build().unwrap();
        let cands = [
            mesh.find_face(0, 1).unwrap(),
            mesh.find_face(0, 3).unwrap(),
            mesh.find_face(1, 2).unwrap(),
        ];
        let remover = FaceRemover::new(AcceptAllMerges);
        let out = remover.compatible_removes(&mesh, &cands);
        assert_eq!(out.faces, vec![cands[0], cands[2]]);
        assert_eq!(out.region_cells(0), vec![0, 1, 2]);
        assert_eq!(remover.compatible_removes(&mesh, &out.faces), out);
    }

    #[test]
    fn set_refinement_records_masters() {
        let mesh = BlockMesh::new(3, 1, 1).build().unwrap();
        let mut remover = FaceRemover::new(AcceptAllMerges);
        let out = remover.compatible_removes(&mesh, &[1]);
        let mut change = TopoChange::new(&mesh);
        remover.set_refinement(&mesh, &out, &mut change).unwrap();
        assert_eq!(change.removed_faces().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(change.removed_cells().get(&2), Some(&Some(1)));
        assert_eq!(remover.merged_cells(), &[1]);
    }
}
