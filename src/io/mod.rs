//! Case directory persistence for the command-line driver.
//!
//! A case directory holds `mesh.json` (the [`PolyMesh`] snapshot),
//! `sets/<name>.json` (sorted face index lists) and `fields/<name>.json`
//! ([`FieldRecord`]s). Results of a run go either back into the same
//! directory or into the next numbered time directory below it.

use crate::debug_invariants::DebugInvariants;
use crate::field::value::FieldValue;
use crate::field::vol_field::FieldRecord;
use crate::mesh_error::MeshError;
use crate::topology::face_set::FaceSet;
use crate::topology::mesh::PolyMesh;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const MESH_FILE: &str = "mesh.json";
const SETS_DIR: &str = "sets";
const FIELDS_DIR: &str = "fields";

fn io_error(path: &Path, err: impl std::fmt::Display) -> MeshError {
    MeshError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn read_json<V: DeserializeOwned>(path: &Path) -> Result<V, MeshError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| io_error(path, e))
}

fn write_json<V: Serialize + ?Sized>(path: &Path, value: &V) -> Result<(), MeshError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| io_error(path, e))?;
    writer.flush().map_err(|e| io_error(path, e))
}

/// Just the element type tag of a stored field.
#[derive(Deserialize)]
struct FieldHeader {
    #[serde(default)]
    class: Option<String>,
}

/// A stored field of any supported element type.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredField {
    Scalar(FieldRecord<f64>),
    FloatScalar(FieldRecord<f32>),
    Vector(FieldRecord<[f64; 3]>),
}

impl StoredField {
    pub fn name(&self) -> &str {
        match self {
            StoredField::Scalar(r) => &r.name,
            StoredField::FloatScalar(r) => &r.name,
            StoredField::Vector(r) => &r.name,
        }
    }
}

/// Handle on a case directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseDir {
    root: PathBuf,
}

impl CaseDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mesh_path(&self) -> PathBuf {
        self.root.join(MESH_FILE)
    }

    pub fn set_path(&self, name: &str) -> PathBuf {
        self.root.join(SETS_DIR).join(format!("{name}.json"))
    }

    pub fn field_path(&self, name: &str) -> PathBuf {
        self.root.join(FIELDS_DIR).join(format!("{name}.json"))
    }

    /// First numbered subdirectory not yet present, starting at `1`.
    pub fn next_time(&self) -> Result<CaseDir, MeshError> {
        let mut latest = 0u64;
        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))? {
                let entry = entry.map_err(|e| io_error(&self.root, e))?;
                if let Some(t) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                    latest = latest.max(t);
                }
            }
        }
        Ok(CaseDir::new(self.root.join((latest + 1).to_string())))
    }

    /// Load and validate the mesh.
    pub fn read_mesh(&self) -> Result<PolyMesh, MeshError> {
        let mut mesh: PolyMesh = read_json(&self.mesh_path())?;
        mesh.validate_invariants()?;
        mesh.refresh_local_schedule();
        log::debug!(
            "Read mesh with {} cells, {} faces, {} patches",
            mesh.n_cells(),
            mesh.n_faces(),
            mesh.boundary().len()
        );
        Ok(mesh)
    }

    pub fn write_mesh(&self, mesh: &PolyMesh) -> Result<(), MeshError> {
        write_json(&self.mesh_path(), mesh)
    }

    pub fn read_face_set(&self, name: &str) -> Result<FaceSet, MeshError> {
        let faces: BTreeSet<usize> = read_json(&self.set_path(name))?;
        Ok(FaceSet {
            name: name.to_string(),
            faces,
        })
    }

    pub fn write_face_set(&self, set: &FaceSet) -> Result<(), MeshError> {
        write_json(&self.set_path(&set.name), &set.faces)
    }

    /// Names of all stored fields, sorted.
    pub fn field_names(&self) -> Result<Vec<String>, MeshError> {
        let dir = self.root.join(FIELDS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_error(&dir, e))? {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read_field<T: FieldValue>(&self, name: &str) -> Result<FieldRecord<T>, MeshError> {
        read_json(&self.field_path(name))
    }

    /// Read a field whatever its element type; untagged fields are scalars.
    pub fn read_stored_field(&self, name: &str) -> Result<StoredField, MeshError> {
        let header: FieldHeader = read_json(&self.field_path(name))?;
        match header.class.as_deref() {
            None => Ok(StoredField::Scalar(self.read_field(name)?)),
            Some(class) if class == f64::TYPE_NAME => Ok(StoredField::Scalar(self.read_field(name)?)),
            Some(class) if class == f32::TYPE_NAME => Ok(StoredField::FloatScalar(self.read_field(name)?)),
            Some(class) if class == <[f64; 3]>::TYPE_NAME => Ok(StoredField::Vector(self.read_field(name)?)),
            Some(class) => Err(MeshError::FieldClass {
                field: name.to_string(),
                class: class.to_string(),
            }),
        }
    }

    pub fn write_field<T: FieldValue>(&self, record: &FieldRecord<T>) -> Result<(), MeshError> {
        write_json(&self.field_path(&record.name), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::block::BlockMesh;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mesh-patchwork-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn mesh_and_sets_round_trip() {
        let root = scratch("roundtrip");
        let case = CaseDir::new(&root);
        let mesh = BlockMesh::new(2, 2, 1).build().unwrap();
        case.write_mesh(&mesh).unwrap();
        case.write_face_set(&FaceSet::new("cands", [3, 0])).unwrap();

        let back = case.read_mesh().unwrap();
        assert_eq!(back.n_cells(), 4);
        assert_eq!(back.boundary(), mesh.boundary());
        assert!(back.patch_schedule().is_ok());
        assert_eq!(case.read_face_set("cands").unwrap().to_vec(), vec![0, 3]);
        assert_eq!(case.next_time().unwrap().root(), root.join("1"));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn fields_are_read_by_class() {
        use crate::field::dictionary::{PatchFieldDict, PatchFieldEntry};

        let root = scratch("fields");
        let case = CaseDir::new(&root);
        fn walls<T>() -> PatchFieldDict<T> {
            PatchFieldDict::new()
                .with("walls", PatchFieldEntry::of_type("zeroGradient"))
                .unwrap()
        }
        case.write_field(&FieldRecord::new("p", vec![1.0], walls())).unwrap();
        case.write_field(&FieldRecord::new("U", vec![[1.0, 2.0, 3.0]], walls())).unwrap();

        assert_eq!(case.field_names().unwrap(), vec!["U", "p"]);
        assert!(matches!(case.read_stored_field("p").unwrap(), StoredField::Scalar(_)));
        match case.read_stored_field("U").unwrap() {
            StoredField::Vector(r) => assert_eq!(r.internal_field, vec![[1.0, 2.0, 3.0]]),
            other => panic!("expected a vector field, got {other:?}"),
        }

        fs::write(case.field_path("q"), r#"{"name":"q","class":"tensor","internalField":[],"boundaryField":{}}"#)
            .unwrap();
        assert!(matches!(
            case.read_stored_field("q"),
            Err(MeshError::FieldClass { class, .. }) if class == "tensor"
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_files_are_io_errors() {
        let case = CaseDir::new(scratch("missing"));
        assert!(matches!(case.read_mesh(), Err(MeshError::Io { .. })));
        assert!(case.field_names().unwrap().is_empty());
    }
}
