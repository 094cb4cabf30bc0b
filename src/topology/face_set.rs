//! Named sets of faces, such as the candidate list handed to face removal.

use crate::mesh_error::MeshError;
use crate::topology::index_map::{IndexMap, TopoChangeAware};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSet {
    pub name: String,
    pub faces: BTreeSet<usize>,
}

impl FaceSet {
    pub fn new(name: impl Into<String>, faces: impl IntoIterator<Item = usize>) -> Self {
        Self {
            name: name.into(),
            faces: faces.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.faces.iter().copied().collect()
    }
}

impl TopoChangeAware for FaceSet {
    /// Removed faces leave the set; survivors take their new numbers.
    fn topo_change(&mut self, map: &IndexMap) -> Result<(), MeshError> {
        let face_map = map.face_map();
        self.faces = self
            .faces
            .iter()
            .filter_map(|&f| face_map.get(f).copied().flatten())
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_faces_drop_out() {
        let mut map = IndexMap::identity(0, 3, 0, 0, &[]);
        map.face_map = vec![Some(0), None, Some(1)];
        map.reverse_face_map = vec![Some(0), Some(2)];
        map.flip_face_flux = vec![false; 2];
        let mut set = FaceSet::new("cands", [1, 2]);
        set.topo_change(&map).unwrap();
        assert_eq!(set.to_vec(), vec![1]);
    }
}
