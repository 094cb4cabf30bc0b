//! Fields over the mesh: per-patch boundary conditions, their runtime
//! selection, and the boundary field that evaluates them.

pub mod boundary_field;
pub mod dictionary;
pub mod factory;
pub mod patch_field;
pub mod value;
pub mod vol_field;

pub use boundary_field::BoundaryField;
pub use dictionary::{Keyword, PatchFieldDict, PatchFieldEntry, PatchValue};
pub use factory::{PatchArgs, PatchFieldFactory};
pub use patch_field::{FieldContext, PatchField};
pub use value::FieldValue;
pub use vol_field::{FieldRecord, VolField};
