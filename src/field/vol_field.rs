//! Cell-centred field: internal values plus a boundary field.

use crate::algs::exchange::Exchange;
use crate::field::boundary_field::BoundaryField;
use crate::field::dictionary::PatchFieldDict;
use crate::field::factory::PatchFieldFactory;
use crate::field::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::index_map::IndexMap;
use crate::topology::mesh::PolyMesh;
use serde::{Deserialize, Serialize};

/// Stored form of a [`VolField`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord<T> {
    pub name: String,
    /// Element type tag, the `TYPE_NAME` of `T`. Untagged records are
    /// read as scalars.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub internal_field: Vec<T>,
    pub boundary_field: PatchFieldDict<T>,
}

impl<T: FieldValue> FieldRecord<T> {
    pub fn new(name: impl Into<String>, internal_field: Vec<T>, boundary_field: PatchFieldDict<T>) -> Self {
        Self {
            name: name.into(),
            class: Some(T::TYPE_NAME.to_string()),
            internal_field,
            boundary_field,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VolField<'m, T: FieldValue> {
    name: String,
    internal: Vec<T>,
    boundary: BoundaryField<'m, T>,
}

impl<'m, T: FieldValue> VolField<'m, T> {
    pub fn new(name: impl Into<String>, internal: Vec<T>, boundary: BoundaryField<'m, T>) -> Result<Self, MeshError> {
        let name = name.into();
        if internal.len() != boundary.mesh().n_cells() {
            return Err(MeshError::FieldSizeMismatch {
                what: format!("internal field of {name}"),
                expected: boundary.mesh().n_cells(),
                found: internal.len(),
            });
        }
        Ok(Self {
            name,
            internal,
            boundary,
        })
    }

    /// Build from configuration, resolving the boundary field.
    pub fn read(
        mesh: &'m PolyMesh,
        record: &FieldRecord<T>,
        factory: &PatchFieldFactory<T>,
    ) -> Result<Self, MeshError> {
        if let Some(class) = record.class.as_deref().filter(|c| *c != T::TYPE_NAME) {
            return Err(MeshError::FieldClass {
                field: record.name.clone(),
                class: class.to_string(),
            });
        }
        let boundary = BoundaryField::read(mesh, &record.internal_field, &record.boundary_field, factory)?;
        Self::new(record.name.clone(), record.internal_field.clone(), boundary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &'m PolyMesh {
        self.boundary.mesh()
    }

    pub fn internal(&self) -> &[T] {
        &self.internal
    }

    pub fn internal_mut(&mut self) -> &mut [T] {
        &mut self.internal
    }

    pub fn boundary(&self) -> &BoundaryField<'m, T> {
        &self.boundary
    }

    pub fn boundary_mut(&mut self) -> &mut BoundaryField<'m, T> {
        &mut self.boundary
    }

    /// Update coefficients and evaluate every patch.
    pub fn correct_boundary_conditions(&mut self, ex: &dyn Exchange) -> Result<(), MeshError> {
        self.boundary.update_coeffs(&self.internal)?;
        self.boundary.evaluate(&self.internal, ex)
    }

    pub fn record(&self) -> Result<FieldRecord<T>, MeshError> {
        Ok(FieldRecord::new(
            self.name.clone(),
            self.internal.clone(),
            self.boundary.to_dict()?,
        ))
    }

    /// Carry the field over to the mesh a topology change was committed
    /// to. A merged cell takes the mean of the cells it was built from;
    /// added cells start from the default value.
    pub fn topo_change<'n>(self, mesh: &'n PolyMesh, map: &IndexMap) -> Result<VolField<'n, T>, MeshError> {
        if self.internal.len() != map.n_old_cells() {
            return Err(MeshError::FieldSizeMismatch {
                what: format!("internal field of {}", self.name),
                expected: map.n_old_cells(),
                found: self.internal.len(),
            });
        }
        let internal: Vec<T> = map
            .cell_sources()
            .iter()
            .map(|srcs| {
                let vals: Vec<T> = srcs.iter().map(|&c| self.internal[c]).collect();
                T::average(&vals)
            })
            .collect();
        let boundary = self.boundary.topo_change(mesh, &internal, map)?;
        VolField::new(self.name, internal, boundary)
    }
}
