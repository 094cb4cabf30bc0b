//! # mesh-patchwork
//!
//! mesh-patchwork keeps per-patch boundary values of cell-centred fields
//! consistent across a partitioned finite-volume mesh, and reshapes that mesh
//! by merging cells across removed faces without losing field data.
//!
//! ## Features
//! - Boundary fields resolved from dictionaries keyed by patch name, group
//!   or regular expression, with a runtime factory of patch field types
//! - Coupled patch evaluation under blocking, non-blocking and scheduled
//!   communication disciplines, over pluggable [`Communicator`] backends
//! - Compatible face removal: a candidate face list is reduced to a set whose
//!   cell merges are mutually consistent, then committed as a topology change
//! - An [`IndexMap`] describing every committed change, used to remap fields,
//!   face sets and cached schedules
//!
//! ## Parallel model
//!
//! Each partition runs the same code against its own [`PolyMesh`]. Processor
//! patches name the neighbouring rank and a message tag; the exchange layer
//! matches sends and receives by `(source, destination, tag)`.
//!
//! [`Communicator`]: algs::communicator::Communicator
//! [`IndexMap`]: topology::index_map::IndexMap
//! [`PolyMesh`]: topology::mesh::PolyMesh

pub mod algs;
pub mod debug_invariants;
pub mod field;
pub mod io;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    pub use crate::algs::exchange::{CommsType, Exchange, ParallelConfig, PatchExchange};
    pub use crate::algs::schedule::{CommsSchedule, CouplingGraph};
    pub use crate::field::boundary_field::BoundaryField;
    pub use crate::field::dictionary::{Keyword, PatchFieldDict, PatchFieldEntry, PatchValue};
    pub use crate::field::factory::PatchFieldFactory;
    pub use crate::field::patch_field::PatchField;
    pub use crate::field::value::FieldValue;
    pub use crate::field::vol_field::{FieldRecord, VolField};
    pub use crate::io::{CaseDir, StoredField};
    pub use crate::mesh_error::MeshError;
    pub use crate::topology::block::{BlockMesh, Side};
    pub use crate::topology::face_set::FaceSet;
    pub use crate::topology::index_map::{IndexMap, TopoChangeAware};
    pub use crate::topology::mesh::PolyMesh;
    pub use crate::topology::patch::{BoundaryMesh, Patch, PatchKind};
    pub use crate::topology::remove_faces::{CompatibleRemoves, FaceRemover, MaxRegionCells, MergeValidator};
    pub use crate::topology::topo_change::TopoChange;
    pub use crate::DebugInvariants;
}
