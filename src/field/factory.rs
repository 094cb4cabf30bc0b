//! Runtime selection of patch field types by name.

use crate::field::dictionary::PatchFieldEntry;
use crate::field::patch_field::{
    Calculated, Cyclic, Empty, FieldContext, FixedValue, PatchField, Processor, ZeroGradient,
};
use crate::field::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::patch::Patch;
use std::collections::BTreeMap;
use std::fmt;

/// Everything a constructor gets to build one patch field.
pub struct PatchArgs<'c, 'm, T> {
    pub patchi: usize,
    pub ctx: &'c FieldContext<'m, T>,
    /// Configuration entry, absent when built from a bare type name.
    pub entry: Option<&'c PatchFieldEntry<T>>,
}

impl<T: FieldValue> PatchArgs<'_, '_, T> {
    pub fn patch(&self) -> Result<&Patch, MeshError> {
        self.ctx.patch(self.patchi)
    }

    /// Configured `value`, or the adjacent cell values when none is given.
    fn value_or_internal(&self) -> Result<Vec<T>, MeshError> {
        let patch = self.patch()?;
        match self.entry.and_then(|e| e.value.as_ref()) {
            Some(v) => v.expand(&patch.name, patch.size),
            None => self.ctx.patch_internal(self.patchi),
        }
    }
}

pub type PatchFieldCtor<T> = fn(&PatchArgs<'_, '_, T>) -> Result<Box<dyn PatchField<T>>, MeshError>;

/// Type name → constructor table.
pub struct PatchFieldFactory<T> {
    table: BTreeMap<&'static str, PatchFieldCtor<T>>,
}

impl<T: FieldValue> Default for PatchFieldFactory<T> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<T: FieldValue> PatchFieldFactory<T> {
    /// Table without any registered types.
    pub fn new() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// The built-in patch field types.
    pub fn standard() -> Self {
        let mut f = Self::new();
        f.register(FixedValue::<T>::TYPE_NAME, |a| {
            let patch = a.patch()?;
            let values = match a.entry {
                Some(entry) => entry
                    .value
                    .as_ref()
                    .ok_or_else(|| MeshError::MissingEntry {
                        keyword: "value",
                        patch: patch.name.clone(),
                    })?
                    .expand(&patch.name, patch.size)?,
                None => a.ctx.patch_internal(a.patchi)?,
            };
            Ok(Box::new(FixedValue::new(a.patchi, values)))
        });
        f.register(ZeroGradient::<T>::TYPE_NAME, |a| {
            Ok(Box::new(ZeroGradient::new(a.patchi, a.ctx)?))
        });
        f.register(Calculated::<T>::TYPE_NAME, |a| {
            Ok(Box::new(Calculated::new(a.patchi, a.value_or_internal()?)))
        });
        f.register(Empty::<T>::TYPE_NAME, |a| Ok(Box::new(Empty::new(a.patchi))));
        f.register(Processor::<T>::TYPE_NAME, |a| {
            Ok(Box::new(Processor::new(a.patchi, a.ctx)?))
        });
        f.register(Cyclic::<T>::TYPE_NAME, |a| Ok(Box::new(Cyclic::new(a.patchi, a.ctx)?)));
        f
    }

    pub fn register(&mut self, type_name: &'static str, ctor: PatchFieldCtor<T>) {
        if self.table.insert(type_name, ctor).is_some() {
            log::debug!("Replacing patch field constructor for {type_name}");
        }
    }

    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }

    /// Build from a configuration entry.
    pub fn from_entry(
        &self,
        patchi: usize,
        ctx: &FieldContext<'_, T>,
        entry: &PatchFieldEntry<T>,
    ) -> Result<Box<dyn PatchField<T>>, MeshError> {
        self.build(&entry.type_name, None, patchi, ctx, Some(entry))
    }

    /// Build from a bare type name. `actual_type` names the patch type the
    /// requested type was meant for; when it matches a constraint patch's
    /// own type the request is honoured as is.
    pub fn of_type(
        &self,
        type_name: &str,
        actual_type: Option<&str>,
        patchi: usize,
        ctx: &FieldContext<'_, T>,
    ) -> Result<Box<dyn PatchField<T>>, MeshError> {
        self.build(type_name, actual_type, patchi, ctx, None)
    }

    fn build(
        &self,
        requested: &str,
        actual_type: Option<&str>,
        patchi: usize,
        ctx: &FieldContext<'_, T>,
        entry: Option<&PatchFieldEntry<T>>,
    ) -> Result<Box<dyn PatchField<T>>, MeshError> {
        let patch = ctx.patch(patchi)?;
        let own_type = patch.kind.type_name();
        let type_name = if patch.kind.is_constraint() && requested != own_type && actual_type != Some(own_type)
        {
            log::debug!(
                "Patch {} is {own_type}: using {own_type} instead of {requested}",
                patch.name
            );
            own_type
        } else {
            requested
        };
        let ctor = self
            .table
            .get(type_name)
            .ok_or_else(|| MeshError::UnknownPatchFieldType {
                type_name: type_name.to_string(),
                patch: patch.name.clone(),
            })?;
        ctor(&PatchArgs { patchi, ctx, entry })
    }
}

impl<T> fmt::Debug for PatchFieldFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::block::{BlockMesh, Side};
    use crate::topology::patch::PatchKind;

    #[test]
    fn constraint_patches_override_requested_type() {
        let mesh = BlockMesh::new(1, 1, 1)
            .side(Side::ZMin, "front", PatchKind::Empty)
            .build()
            .unwrap();
        let internal = [2.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        let factory = PatchFieldFactory::<f64>::standard();

        let pf = factory.of_type("zeroGradient", None, Side::ZMin.index(), &ctx).unwrap();
        assert_eq!(pf.type_name(), "empty");
        let pf = factory.of_type("zeroGradient", None, Side::XMin.index(), &ctx).unwrap();
        assert_eq!(pf.type_name(), "zeroGradient");
        assert_eq!(pf.values(), &[2.0]);
    }

    #[test]
    fn fixed_value_needs_a_value() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let internal = [0.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        let factory = PatchFieldFactory::<f64>::standard();
        let err = factory
            .from_entry(0, &ctx, &PatchFieldEntry::of_type("fixedValue"))
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::MissingEntry {
                keyword: "value",
                patch: "xMin".into()
            }
        );
        let pf = factory
            .from_entry(0, &ctx, &PatchFieldEntry::uniform("fixedValue", 4.0))
            .unwrap();
        assert_eq!(pf.values(), &[4.0]);
    }

    #[test]
    fn unknown_type_is_reported() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let internal = [0.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        let err = PatchFieldFactory::<f64>::standard()
            .of_type("slip", None, 0, &ctx)
            .unwrap_err();
        assert!(matches!(err, MeshError::UnknownPatchFieldType { .. }));
    }
}
