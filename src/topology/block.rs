//! Structured hexahedral block generator.
//!
//! Produces a [`PolyMesh`] of `nx × ny × nz` unit cubes with one patch per
//! block side. Cell `(i, j, k)` has index `i + nx * (j + ny * k)`. Side faces
//! are ordered so that opposite sides (and the matching sides of two blocks
//! placed next to each other) line up face by face, which is what cyclic and
//! processor coupling expect.

use crate::mesh_error::MeshError;
use crate::topology::mesh::{Point, PolyMesh};
use crate::topology::patch::{BoundaryMesh, Patch, PatchKind};

/// Block sides, in patch order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    XMin,
    XMax,
    YMin,
    YMax,
    ZMin,
    ZMax,
}

impl Side {
    pub const ALL: [Side; 6] = [
        Side::XMin,
        Side::XMax,
        Side::YMin,
        Side::YMax,
        Side::ZMin,
        Side::ZMax,
    ];

    /// Patch index of this side in the generated mesh.
    pub fn index(self) -> usize {
        self as usize
    }

    fn default_name(self) -> &'static str {
        match self {
            Side::XMin => "xMin",
            Side::XMax => "xMax",
            Side::YMin => "yMin",
            Side::YMax => "yMax",
            Side::ZMin => "zMin",
            Side::ZMax => "zMax",
        }
    }
}

#[derive(Clone, Debug)]
struct SideSpec {
    name: String,
    kind: PatchKind,
    groups: Vec<String>,
}

/// Builder for a structured block mesh.
#[derive(Clone, Debug)]
pub struct BlockMesh {
    n: [usize; 3],
    origin: Point,
    sides: Vec<SideSpec>,
}

impl BlockMesh {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let sides = Side::ALL
            .iter()
            .map(|s| SideSpec {
                name: s.default_name().to_string(),
                kind: PatchKind::Normal,
                groups: vec!["walls".to_string()],
            })
            .collect();
        Self {
            n: [nx, ny, nz],
            origin: [0.0; 3],
            sides,
        }
    }

    pub fn origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    /// Rename and re-type one side. Groups are cleared.
    pub fn side(mut self, side: Side, name: impl Into<String>, kind: PatchKind) -> Self {
        let spec = &mut self.sides[side.index()];
        spec.name = name.into();
        spec.kind = kind;
        spec.groups.clear();
        self
    }

    pub fn groups<I, S>(mut self, side: Side, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sides[side.index()].groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Couple the two x sides to each other as a cyclic pair.
    pub fn cyclic_x(self) -> Self {
        self.side(
            Side::XMin,
            "cyclicLeft",
            PatchKind::Cyclic {
                neighbour_patch: Side::XMax.index(),
            },
        )
        .side(
            Side::XMax,
            "cyclicRight",
            PatchKind::Cyclic {
                neighbour_patch: Side::XMin.index(),
            },
        )
    }

    pub fn build(&self) -> Result<PolyMesh, MeshError> {
        let [nx, ny, nz] = self.n;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(MeshError::InvalidMesh(format!(
                "block dimensions must be positive, got {nx}x{ny}x{nz}"
            )));
        }
        let pid = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cid = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push([
                        self.origin[0] + i as f64,
                        self.origin[1] + j as f64,
                        self.origin[2] + k as f64,
                    ]);
                }
            }
        }

        // Face loops with normals along +x, +y, +z through the corner (i, j, k).
        let x_face = |i, j, k| vec![pid(i, j, k), pid(i, j + 1, k), pid(i, j + 1, k + 1), pid(i, j, k + 1)];
        let y_face = |i, j, k| vec![pid(i, j, k), pid(i, j, k + 1), pid(i + 1, j, k + 1), pid(i + 1, j, k)];
        let z_face = |i, j, k| vec![pid(i, j, k), pid(i + 1, j, k), pid(i + 1, j + 1, k), pid(i, j + 1, k)];
        let reversed = |mut f: Vec<usize>| {
            f.reverse();
            f
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let c = cid(i, j, k);
                    if i + 1 < nx {
                        faces.push(x_face(i + 1, j, k));
                        owner.push(c);
                        neighbour.push(cid(i + 1, j, k));
                    }
                    if j + 1 < ny {
                        faces.push(y_face(i, j + 1, k));
                        owner.push(c);
                        neighbour.push(cid(i, j + 1, k));
                    }
                    if k + 1 < nz {
                        faces.push(z_face(i, j, k + 1));
                        owner.push(c);
                        neighbour.push(cid(i, j, k + 1));
                    }
                }
            }
        }
        // Internal faces were emitted per owner in increasing neighbour order.
        let mut order: Vec<usize> = (0..neighbour.len()).collect();
        order.sort_by_key(|&f| (owner[f], neighbour[f]));
        let mut faces: Vec<Vec<usize>> = order.iter().map(|&f| std::mem::take(&mut faces[f])).collect();
        let mut owner: Vec<usize> = order.iter().map(|&f| owner[f]).collect();
        let neighbour: Vec<usize> = order.iter().map(|&f| neighbour[f]).collect();

        let mut patches = Vec::with_capacity(6);
        for side in Side::ALL {
            let start = faces.len();
            match side {
                Side::XMin | Side::XMax => {
                    let (i, ci) = if side == Side::XMin { (0, 0) } else { (nx, nx - 1) };
                    for k in 0..nz {
                        for j in 0..ny {
                            let f = x_face(i, j, k);
                            faces.push(if side == Side::XMin { reversed(f) } else { f });
                            owner.push(cid(ci, j, k));
                        }
                    }
                }
                Side::YMin | Side::YMax => {
                    let (j, cj) = if side == Side::YMin { (0, 0) } else { (ny, ny - 1) };
                    for k in 0..nz {
                        for i in 0..nx {
                            let f = y_face(i, j, k);
                            faces.push(if side == Side::YMin { reversed(f) } else { f });
                            owner.push(cid(i, cj, k));
                        }
                    }
                }
                Side::ZMin | Side::ZMax => {
                    let (k, ck) = if side == Side::ZMin { (0, 0) } else { (nz, nz - 1) };
                    for j in 0..ny {
                        for i in 0..nx {
                            let f = z_face(i, j, k);
                            faces.push(if side == Side::ZMin { reversed(f) } else { f });
                            owner.push(cid(i, j, ck));
                        }
                    }
                }
            }
            let spec = &self.sides[side.index()];
            patches.push(
                Patch::new(spec.name.clone(), spec.kind.clone(), start, faces.len() - start)
                    .with_groups(spec.groups.iter().cloned()),
            );
        }

        PolyMesh::new(points, faces, owner, neighbour, BoundaryMesh::new(patches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_for_cube_of_eight() {
        let mesh = BlockMesh::new(2, 2, 2).build().unwrap();
        assert_eq!(mesh.n_cells(), 8);
        assert_eq!(mesh.n_points(), 27);
        assert_eq!(mesh.n_internal_faces(), 12);
        assert_eq!(mesh.n_faces(), 12 + 24);
        assert_eq!(mesh.boundary().len(), 6);
        assert!(mesh.boundary().iter().all(|p| p.size == 4));
    }

    #[test]
    fn internal_faces_are_upper_triangular() {
        let mesh = BlockMesh::new(3, 2, 2).build().unwrap();
        let pairs: Vec<_> = mesh.owner()[..mesh.n_internal_faces()]
            .iter()
            .zip(mesh.neighbour())
            .map(|(&o, &n)| (o, n))
            .collect();
        let mut sorted = pairs.clone();
        sorted.sort_unstable();
        assert_eq!(pairs, sorted);
    }

    #[test]
    fn cyclic_sides_line_up() {
        let mesh = BlockMesh::new(3, 2, 1).cyclic_x().build().unwrap();
        let left = mesh.patch_face_cells(Side::XMin.index()).unwrap();
        let right = mesh.patch_face_cells(Side::XMax.index()).unwrap();
        assert_eq!(left, &[0, 3]);
        assert_eq!(right, &[2, 5]);
    }

    #[test]
    fn rejects_empty_block() {
        assert!(BlockMesh::new(0, 1, 1).build().is_err());
    }
}
