//! MeshError: unified error type for mesh-patchwork public APIs
//!
//! Configuration errors (unresolved patch fields, unsupported communication
//! disciplines, malformed type lists) and invalid topology batches are all
//! reported through this enum. Nothing in the library panics on bad input.

use thiserror::Error;

/// Unified error type for mesh-patchwork operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// No dictionary entry resolved to a patch field for this patch.
    #[error("Cannot find patchField entry for {0}")]
    UnresolvedPatchField(String),
    /// No dictionary entry resolved for a cyclic patch.
    #[error("Cannot find patchField entry for cyclic {0}")]
    UnresolvedCyclicPatchField(String),
    /// A per-patch type list does not match the number of patches.
    #[error(
        "Incorrect number of patch type specifications given: \
         number of patches in mesh = {patches}, number of patch type specifications = {given}"
    )]
    PatchTypeCount { patches: usize, given: usize },
    /// The factory has no constructor registered for this type tag.
    #[error("Unknown patchField type {type_name} for patch {patch}")]
    UnknownPatchFieldType { type_name: String, patch: String },
    /// A patch field entry is missing a mandatory keyword.
    #[error("Essential entry `{keyword}` missing for patch {patch}")]
    MissingEntry { keyword: &'static str, patch: String },
    /// The requested communication discipline is not known.
    #[error("Unsupported communications type {0}")]
    UnsupportedCommsType(String),
    /// Scheduled evaluation was requested but no schedule has been built.
    #[error("No patch schedule available for scheduled evaluation")]
    MissingSchedule,
    /// A value list does not have the size of the entity it is attached to.
    #[error("Field size mismatch for {what}: expected {expected}, got {found}")]
    FieldSizeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    /// A stored field holds values of another type than requested.
    #[error("Field {field} holds {class} values")]
    FieldClass { field: String, class: String },
    /// Index out of range for a mesh entity.
    #[error("{entity} index {index} out of range (size {size})")]
    IndexOutOfRange {
        entity: &'static str,
        index: usize,
        size: usize,
    },
    /// A topology change batch was rejected during validation.
    #[error("Invalid topology change: {0}")]
    InvalidTopoChange(String),
    /// Mesh connectivity is inconsistent.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
    /// A dictionary key could not be compiled as a pattern.
    #[error("Invalid patch pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// A point-to-point exchange with a neighbouring partition failed.
    #[error("Communication error with neighbor {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// Reading or writing case data failed.
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}
