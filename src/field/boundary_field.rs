//! One patch field per mesh patch, resolved from configuration and
//! evaluated under the selected communication discipline.
//!
//! The container borrows the mesh it was built for. After a topology
//! change it is rebound to the committed mesh with
//! [`BoundaryField::topo_change`].

use crate::algs::exchange::{CommsType, Exchange};
use crate::debug_invariants::DebugInvariants;
use crate::field::dictionary::PatchFieldDict;
use crate::field::factory::PatchFieldFactory;
use crate::field::patch_field::{Empty, FieldContext, PatchField};
use crate::field::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::index_map::IndexMap;
use crate::topology::mesh::PolyMesh;
use crate::topology::patch::PatchKind;
use std::fmt;

pub struct BoundaryField<'m, T: FieldValue> {
    mesh: &'m PolyMesh,
    slots: Vec<Box<dyn PatchField<T>>>,
}

impl<'m, T: FieldValue> BoundaryField<'m, T> {
    /// Resolve a patch field for every patch from `dict`.
    ///
    /// Resolution runs in four phases, each only filling patches left
    /// unset by the previous ones:
    /// 1. plain keys naming a patch exactly;
    /// 2. plain keys naming a patch group, last-declared key first;
    /// 3. `empty` patches get an empty field, other patches the entry
    ///    `dict.lookup` finds for their name (word or pattern);
    /// 4. anything still unset is an error.
    pub fn read(
        mesh: &'m PolyMesh,
        internal: &[T],
        dict: &PatchFieldDict<T>,
        factory: &PatchFieldFactory<T>,
    ) -> Result<Self, MeshError> {
        let ctx = FieldContext::new(mesh, internal)?;
        let bmesh = mesh.boundary();
        let mut slots: Vec<Option<Box<dyn PatchField<T>>>> = (0..bmesh.len()).map(|_| None).collect();

        for (key, entry) in dict.iter().filter(|(k, _)| !k.is_pattern()) {
            if let Some(patchi) = bmesh.find_patch_id(key.as_str()) {
                slots[patchi] = Some(factory.from_entry(patchi, &ctx, entry)?);
            }
        }
        let mut n_unset = slots.iter().filter(|s| s.is_none()).count();
        log::debug!("Patch names resolved {} of {} patches", bmesh.len() - n_unset, bmesh.len());

        if n_unset > 0 {
            for (key, entry) in dict.iter().rev().filter(|(k, _)| !k.is_pattern()) {
                for patchi in bmesh.find_indices(key.as_str(), true) {
                    if slots[patchi].is_none() {
                        slots[patchi] = Some(factory.from_entry(patchi, &ctx, entry)?);
                    }
                }
            }
            n_unset = slots.iter().filter(|s| s.is_none()).count();
            log::debug!("Patch groups left {n_unset} patches unset");
        }

        for (patchi, slot) in slots.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let patch = &bmesh[patchi];
            if patch.kind == PatchKind::Empty {
                *slot = Some(factory.of_type(Empty::<T>::TYPE_NAME, None, patchi, &ctx)?);
            } else if let Some(entry) = dict.lookup(&patch.name) {
                *slot = Some(factory.from_entry(patchi, &ctx, entry)?);
            }
        }

        let slots = slots
            .into_iter()
            .enumerate()
            .map(|(patchi, slot)| {
                slot.ok_or_else(|| {
                    let patch = &bmesh[patchi];
                    match patch.kind {
                        PatchKind::Cyclic { .. } => MeshError::UnresolvedCyclicPatchField(patch.name.clone()),
                        _ => MeshError::UnresolvedPatchField(patch.name.clone()),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let field = Self { mesh, slots };
        field.debug_assert_invariants();
        Ok(field)
    }

    /// Every patch gets a field of the same type (constraint patches
    /// still get their own type).
    pub fn uniform_type(
        mesh: &'m PolyMesh,
        internal: &[T],
        type_name: &str,
        factory: &PatchFieldFactory<T>,
    ) -> Result<Self, MeshError> {
        let ctx = FieldContext::new(mesh, internal)?;
        let slots = (0..mesh.boundary().len())
            .map(|patchi| factory.of_type(type_name, None, patchi, &ctx))
            .collect::<Result<_, _>>()?;
        Ok(Self { mesh, slots })
    }

    /// One type per patch, optionally with the patch type each entry was
    /// meant for (`constraint_types`, empty to skip). Both lists must have
    /// one entry per patch.
    pub fn from_types<S: AsRef<str>>(
        mesh: &'m PolyMesh,
        internal: &[T],
        types: &[S],
        constraint_types: &[S],
        factory: &PatchFieldFactory<T>,
    ) -> Result<Self, MeshError> {
        let n = mesh.boundary().len();
        let bad = if types.len() != n {
            Some(types.len())
        } else if !constraint_types.is_empty() && constraint_types.len() != n {
            Some(constraint_types.len())
        } else {
            None
        };
        if let Some(given) = bad {
            return Err(MeshError::PatchTypeCount { patches: n, given });
        }

        let ctx = FieldContext::new(mesh, internal)?;
        let slots = types
            .iter()
            .enumerate()
            .map(|(patchi, ty)| {
                let actual = constraint_types.get(patchi).map(|s| s.as_ref());
                factory.of_type(ty.as_ref(), actual, patchi, &ctx)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { mesh, slots })
    }

    /// Adopt ready-made patch fields, one per patch in patch order.
    pub fn from_patch_fields(
        mesh: &'m PolyMesh,
        slots: Vec<Box<dyn PatchField<T>>>,
    ) -> Result<Self, MeshError> {
        let field = Self { mesh, slots };
        field.validate_invariants()?;
        Ok(field)
    }

    pub fn mesh(&self) -> &'m PolyMesh {
        self.mesh
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PatchField<T>> {
        self.slots.iter().map(|s| &**s)
    }

    pub fn get(&self, patchi: usize) -> Option<&dyn PatchField<T>> {
        self.slots.get(patchi).map(|s| &**s)
    }

    pub fn get_mut(&mut self, patchi: usize) -> Option<&mut Box<dyn PatchField<T>>> {
        self.slots.get_mut(patchi)
    }

    fn slot_mut(&mut self, patchi: usize) -> Result<&mut Box<dyn PatchField<T>>, MeshError> {
        let n = self.slots.len();
        self.slots.get_mut(patchi).ok_or(MeshError::IndexOutOfRange {
            entity: "patch",
            index: patchi,
            size: n,
        })
    }

    /// Type name of every patch field, in patch order.
    pub fn types(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.type_name()).collect()
    }

    pub fn update_coeffs(&mut self, internal: &[T]) -> Result<(), MeshError> {
        let ctx = FieldContext::new(self.mesh, internal)?;
        for slot in &mut self.slots {
            slot.update_coeffs(&ctx)?;
        }
        Ok(())
    }

    /// Evaluate every patch, exchanging coupled data as `ex` dictates.
    ///
    /// Blocking and non-blocking both start every patch before completing
    /// any; non-blocking additionally waits for all receives posted in
    /// between. Scheduled replays the mesh's patch schedule.
    pub fn evaluate(&mut self, internal: &[T], ex: &dyn Exchange) -> Result<(), MeshError> {
        let mesh = self.mesh;
        let ctx = FieldContext::new(mesh, internal)?;
        match ex.comms_type() {
            CommsType::Blocking | CommsType::NonBlocking => {
                let n_req = ex.n_requests();
                for slot in &mut self.slots {
                    slot.begin_exchange(&ctx, ex)?;
                }
                if ex.is_parallel() && ex.comms_type() == CommsType::NonBlocking {
                    log::debug!("Waiting for {} requests", ex.n_requests() - n_req);
                    ex.wait_requests(n_req)?;
                }
                for slot in &mut self.slots {
                    slot.complete_exchange(&ctx, ex)?;
                }
            }
            CommsType::Scheduled => {
                for step in mesh.patch_schedule()?.steps() {
                    let slot = self.slot_mut(step.patch)?;
                    if step.init {
                        slot.begin_exchange(&ctx, ex)?;
                    } else {
                        slot.complete_exchange(&ctx, ex)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Same-shaped field holding the owner cell value of every face.
    pub fn boundary_internal_field(&self, internal: &[T]) -> Result<Self, MeshError> {
        let ctx = FieldContext::new(self.mesh, internal)?;
        let mut result = self.clone();
        for (patchi, slot) in result.slots.iter_mut().enumerate() {
            if !slot.values().is_empty() {
                slot.force_assign(ctx.patch_internal(patchi)?)?;
            }
        }
        Ok(result)
    }

    /// Same-shaped field whose coupled patches hold the cell values across
    /// the interface; other patches keep their current values.
    pub fn boundary_neighbour_field(&self, internal: &[T], ex: &dyn Exchange) -> Result<Self, MeshError> {
        let ctx = FieldContext::new(self.mesh, internal)?;
        let mut result = self.clone();
        match ex.comms_type() {
            CommsType::Blocking | CommsType::NonBlocking => {
                let n_req = ex.n_requests();
                for slot in result.slots.iter_mut().filter(|s| s.is_coupled()) {
                    slot.begin_neighbour_exchange(&ctx, ex)?;
                }
                if ex.is_parallel() && ex.comms_type() == CommsType::NonBlocking {
                    ex.wait_requests(n_req)?;
                }
                for slot in result.slots.iter_mut().filter(|s| s.is_coupled()) {
                    assign_neighbour(slot, &ctx, ex)?;
                }
            }
            CommsType::Scheduled => {
                for step in self.mesh.patch_schedule()?.steps() {
                    let slot = result.slot_mut(step.patch)?;
                    if !slot.is_coupled() {
                        continue;
                    }
                    if step.init {
                        slot.begin_neighbour_exchange(&ctx, ex)?;
                    } else {
                        assign_neighbour(slot, &ctx, ex)?;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Configuration reproducing the current state, keyed by patch name.
    pub fn to_dict(&self) -> Result<PatchFieldDict<T>, MeshError> {
        let mut dict = PatchFieldDict::new();
        for (patch, slot) in self.mesh.boundary().iter().zip(&self.slots) {
            dict.insert(&patch.name, slot.entry())?;
        }
        Ok(dict)
    }

    /// Write `keyword { patchName { ... } ... }`.
    pub fn write_entry(&self, keyword: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{keyword}")?;
        writeln!(out, "{{")?;
        for (patch, slot) in self.mesh.boundary().iter().zip(&self.slots) {
            writeln!(out, "    {}", patch.name)?;
            writeln!(out, "    {{")?;
            slot.write(out)?;
            writeln!(out, "    }}")?;
        }
        writeln!(out, "}}")
    }

    /// Rebind to the mesh a topology change was committed to.
    ///
    /// Fields of removed patches are dropped. Surviving fields are
    /// renumbered through `map`. Every new patch must come from an old one.
    pub fn topo_change<'n>(
        self,
        mesh: &'n PolyMesh,
        internal: &[T],
        map: &IndexMap,
    ) -> Result<BoundaryField<'n, T>, MeshError> {
        let ctx = FieldContext::new(mesh, internal)?;
        let mut old: Vec<Option<Box<dyn PatchField<T>>>> = self.slots.into_iter().map(Some).collect();
        let dropped = map.patch_map().iter().filter(|p| p.is_none()).count();
        if dropped > 0 {
            log::debug!("Dropping patch fields of {dropped} removed patches");
        }

        let mut slots = Vec::with_capacity(mesh.boundary().len());
        for (patchi, src) in map.reverse_patch_map().iter().enumerate() {
            let (old_patchi, mut slot) = src
                .and_then(|o| old.get_mut(o).and_then(Option::take).map(|s| (o, s)))
                .ok_or_else(|| {
                    MeshError::InvalidTopoChange(format!("patch {patchi} has no patch field to inherit"))
                })?;
            let range = map.old_patch_range(old_patchi).ok_or(MeshError::IndexOutOfRange {
                entity: "patch",
                index: old_patchi,
                size: map.patch_map().len(),
            })?;
            slot.topo_change(patchi, range, map, &ctx)?;
            slots.push(slot);
        }
        let field = BoundaryField { mesh, slots };
        field.debug_assert_invariants();
        Ok(field)
    }
}

fn assign_neighbour<T: FieldValue>(
    slot: &mut Box<dyn PatchField<T>>,
    ctx: &FieldContext<'_, T>,
    ex: &dyn Exchange,
) -> Result<(), MeshError> {
    if let Some(values) = slot.neighbour_value(ctx, ex)? {
        slot.force_assign(values)?;
    }
    Ok(())
}

impl<T: FieldValue> Clone for BoundaryField<'_, T> {
    fn clone(&self) -> Self {
        Self {
            mesh: self.mesh,
            slots: self.slots.clone(),
        }
    }
}

impl<T: FieldValue> std::ops::Index<usize> for BoundaryField<'_, T> {
    type Output = dyn PatchField<T>;

    fn index(&self, patchi: usize) -> &Self::Output {
        &*self.slots[patchi]
    }
}

impl<T: FieldValue> fmt::Debug for BoundaryField<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.mesh
                    .boundary()
                    .iter()
                    .zip(&self.slots)
                    .map(|(p, s)| (&p.name, s.type_name())),
            )
            .finish()
    }
}

impl<T: FieldValue> DebugInvariants for BoundaryField<'_, T> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "BoundaryField");
    }

    fn validate_invariants(&self) -> Result<(), MeshError> {
        let bmesh = self.mesh.boundary();
        if self.slots.len() != bmesh.len() {
            return Err(MeshError::PatchTypeCount {
                patches: bmesh.len(),
                given: self.slots.len(),
            });
        }
        for (patchi, (patch, slot)) in bmesh.iter().zip(&self.slots).enumerate() {
            if slot.patch() != patchi {
                return Err(MeshError::InvalidMesh(format!(
                    "patch field in slot {patchi} is bound to patch {}",
                    slot.patch()
                )));
            }
            let n = slot.values().len();
            if n != patch.size && !(n == 0 && slot.type_name() == Empty::<T>::TYPE_NAME) {
                return Err(MeshError::FieldSizeMismatch {
                    what: format!("patch field {}", patch.name),
                    expected: patch.size,
                    found: n,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::exchange::PatchExchange;
    use crate::field::dictionary::PatchFieldEntry;
    use crate::topology::block::{BlockMesh, Side};

    fn dict(entries: &[(&str, PatchFieldEntry<f64>)]) -> PatchFieldDict<f64> {
        let mut d = PatchFieldDict::new();
        for (k, e) in entries {
            d.insert(k, e.clone()).unwrap();
        }
        d
    }

    #[test]
    fn name_beats_group() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let d = dict(&[
            ("xMin", PatchFieldEntry::uniform("fixedValue", 1.0)),
            ("walls", PatchFieldEntry::of_type("zeroGradient")),
        ]);
        let bf = BoundaryField::read(&mesh, &[0.5], &d, &PatchFieldFactory::standard()).unwrap();
        assert_eq!(bf.types()[0], "fixedValue");
        assert!(bf.types()[1..].iter().all(|t| *t == "zeroGradient"));
    }

    #[test]
    fn evaluate_serial_updates_zero_gradient() {
        let mesh = BlockMesh::new(2, 1, 1).build().unwrap();
        let mut bf =
            BoundaryField::uniform_type(&mesh, &[1.0, 2.0], "zeroGradient", &PatchFieldFactory::standard()).unwrap();
        for ct in [CommsType::Blocking, CommsType::NonBlocking, CommsType::Scheduled] {
            let internal = [3.0, ct as usize as f64];
            bf.evaluate(&internal, &PatchExchange::serial(ct)).unwrap();
            assert_eq!(bf[Side::XMin.index()].values(), &[3.0]);
            assert_eq!(bf[Side::XMax.index()].values(), &[ct as usize as f64]);
        }
    }

    #[test]
    fn internal_and_neighbour_fields() {
        let mesh = BlockMesh::new(3, 1, 1).cyclic_x().build().unwrap();
        let internal = [1.0, 2.0, 3.0];
        let d = dict(&[("\".*\"", PatchFieldEntry::uniform("fixedValue", 0.0))]);
        let bf = BoundaryField::read(&mesh, &internal, &d, &PatchFieldFactory::standard()).unwrap();
        assert_eq!(bf.types()[0], "cyclic");

        let bi = bf.boundary_internal_field(&internal).unwrap();
        assert_eq!(bi[0].values(), &[1.0]);
        assert_eq!(bi[1].values(), &[3.0]);

        let bn = bf
            .boundary_neighbour_field(&internal, &PatchExchange::serial(CommsType::NonBlocking))
            .unwrap();
        assert_eq!(bn[0].values(), &[3.0]);
        assert_eq!(bn[1].values(), &[1.0]);
        // Uncoupled patches keep their own values.
        assert_eq!(bn[2].values(), &[0.0; 3]);
    }

    #[test]
    fn write_entry_blocks_per_patch() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let bf = BoundaryField::uniform_type(&mesh, &[2.0], "calculated", &PatchFieldFactory::standard()).unwrap();
        let mut out = String::new();
        bf.write_entry("boundaryField", &mut out).unwrap();
        assert!(out.starts_with("boundaryField\n{\n    xMin\n    {\n        type            calculated;\n"));
        assert_eq!(out.matches("uniform 2;").count(), 6);
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn rebinding_needs_a_source_for_every_patch() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let bf = BoundaryField::uniform_type(&mesh, &[1.0], "zeroGradient", &PatchFieldFactory::standard()).unwrap();
        let ranges: Vec<_> = mesh.boundary().iter().map(|p| p.range()).collect();
        let map = IndexMap::identity(mesh.n_points(), mesh.n_faces(), 1, 0, &ranges);

        let kept = bf.clone().topo_change(&mesh, &[1.0], &map).unwrap();
        assert_eq!(kept.types(), bf.types());

        let mut orphan = map.clone();
        orphan.reverse_patch_map[0] = None;
        orphan.patch_map[0] = None;
        assert!(matches!(
            bf.topo_change(&mesh, &[1.0], &orphan),
            Err(MeshError::InvalidTopoChange(_))
        ));
    }

    #[test]
    fn from_patch_fields_checks_binding() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let bf = BoundaryField::uniform_type(&mesh, &[0.0], "calculated", &PatchFieldFactory::standard()).unwrap();
        let mut slots: Vec<_> = bf.slots.clone();
        slots.swap(0, 1);
        assert!(BoundaryField::from_patch_fields(&mesh, slots).is_err());
    }
}
