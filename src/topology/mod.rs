//! Mesh topology: boundary patches, the face-based mesh, topology change
//! batches and the index map they produce.
//!
//! Most users will build a [`PolyMesh`] (directly or through [`BlockMesh`]),
//! record changes in a [`TopoChange`] and commit them to obtain an
//! [`IndexMap`] that every mesh-dependent object is remapped with.

pub mod block;
pub mod face_set;
pub mod index_map;
pub mod mesh;
pub mod patch;
pub mod remove_faces;
pub mod topo_change;

pub use block::{BlockMesh, Side};
pub use face_set::FaceSet;
pub use index_map::{IndexMap, TopoChangeAware};
pub use mesh::{Point, PolyMesh};
pub use patch::{BoundaryMesh, Patch, PatchKind};
pub use remove_faces::{CompatibleRemoves, FaceRemover, MergeValidator};
pub use topo_change::TopoChange;
