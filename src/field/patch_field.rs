//! Per-patch boundary conditions.
//!
//! Every variant embeds a [`PatchData`] (patch index plus one value per
//! patch face) and implements the capability set boundary evaluation
//! drives: `update_coeffs`, `begin_exchange` / `complete_exchange`,
//! `is_coupled` and, for coupled variants, the neighbour-value exchange.

use crate::algs::exchange::{CommsType, Exchange, RequestId};
use crate::field::dictionary::{PatchFieldEntry, PatchValue};
use crate::field::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::index_map::IndexMap;
use crate::topology::mesh::PolyMesh;
use crate::topology::patch::{Patch, PatchKind};
use std::fmt;
use std::ops::Range;

/// Mesh and internal (cell) values a patch field is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct FieldContext<'a, T> {
    pub mesh: &'a PolyMesh,
    pub internal: &'a [T],
}

impl<'a, T: FieldValue> FieldContext<'a, T> {
    pub fn new(mesh: &'a PolyMesh, internal: &'a [T]) -> Result<Self, MeshError> {
        if internal.len() != mesh.n_cells() {
            return Err(MeshError::FieldSizeMismatch {
                what: "internal field".into(),
                expected: mesh.n_cells(),
                found: internal.len(),
            });
        }
        Ok(Self { mesh, internal })
    }

    pub fn patch(&self, patchi: usize) -> Result<&'a Patch, MeshError> {
        self.mesh.boundary().get(patchi).ok_or(MeshError::IndexOutOfRange {
            entity: "patch",
            index: patchi,
            size: self.mesh.boundary().len(),
        })
    }

    /// Values of the cells owning the faces of a patch.
    pub fn patch_internal(&self, patchi: usize) -> Result<Vec<T>, MeshError> {
        Ok(self
            .mesh
            .patch_face_cells(patchi)?
            .iter()
            .map(|&c| self.internal[c])
            .collect())
    }
}

/// State every patch field carries.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchData<T> {
    pub patch: usize,
    pub values: Vec<T>,
}

/// A boundary condition bound to one patch.
pub trait PatchField<T: FieldValue>: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn data(&self) -> &PatchData<T>;
    fn data_mut(&mut self) -> &mut PatchData<T>;
    fn clone_box(&self) -> Box<dyn PatchField<T>>;

    fn patch(&self) -> usize {
        self.data().patch
    }

    fn values(&self) -> &[T] {
        &self.data().values
    }

    /// Overwrite the face values, keeping the size.
    fn force_assign(&mut self, values: Vec<T>) -> Result<(), MeshError> {
        let data = self.data_mut();
        if values.len() != data.values.len() {
            return Err(MeshError::FieldSizeMismatch {
                what: format!("values of patch {}", data.patch),
                expected: data.values.len(),
                found: values.len(),
            });
        }
        data.values = values;
        Ok(())
    }

    fn is_coupled(&self) -> bool {
        false
    }

    fn update_coeffs(&mut self, _ctx: &FieldContext<'_, T>) -> Result<(), MeshError> {
        Ok(())
    }

    /// Start evaluation; coupled variants send their data here.
    fn begin_exchange(&mut self, _ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        Ok(())
    }

    /// Finish evaluation and update the face values.
    fn complete_exchange(&mut self, ctx: &FieldContext<'_, T>, ex: &dyn Exchange) -> Result<(), MeshError>;

    /// Start fetching the cell values across a coupled interface.
    fn begin_neighbour_exchange(
        &mut self,
        _ctx: &FieldContext<'_, T>,
        _ex: &dyn Exchange,
    ) -> Result<(), MeshError> {
        Ok(())
    }

    /// Cell values across a coupled interface; `None` for uncoupled patches.
    fn neighbour_value(
        &mut self,
        _ctx: &FieldContext<'_, T>,
        _ex: &dyn Exchange,
    ) -> Result<Option<Vec<T>>, MeshError> {
        Ok(None)
    }

    /// Rebind to `new_patch` of the committed mesh.
    ///
    /// Faces that existed on the old patch keep their value; faces new to
    /// the patch take the value of the cell they now belong to.
    fn topo_change(
        &mut self,
        new_patch: usize,
        old_range: Range<usize>,
        map: &IndexMap,
        ctx: &FieldContext<'_, T>,
    ) -> Result<(), MeshError> {
        let range = ctx.patch(new_patch)?.range();
        let cells = ctx.mesh.patch_face_cells(new_patch)?;
        let data = self.data_mut();
        let values = range
            .zip(cells)
            .map(|(face, &cell)| match map.reverse_face_map()[face] {
                Some(old) if old_range.contains(&old) => data
                    .values
                    .get(old - old_range.start)
                    .copied()
                    .unwrap_or(ctx.internal[cell]),
                _ => ctx.internal[cell],
            })
            .collect();
        data.patch = new_patch;
        data.values = values;
        Ok(())
    }

    /// Serialisable configuration reproducing this field.
    fn entry(&self) -> PatchFieldEntry<T> {
        PatchFieldEntry {
            type_name: self.type_name().to_string(),
            value: Some(PatchValue::NonUniform(self.values().to_vec())),
        }
    }

    /// Write the body of this patch's block.
    fn write(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "        type            {};", self.type_name())?;
        write_values(self.values(), out)
    }
}

impl<T: FieldValue> Clone for Box<dyn PatchField<T>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// `value` keyword line, uniform when all faces agree.
pub fn write_values<T: FieldValue>(values: &[T], out: &mut dyn fmt::Write) -> fmt::Result {
    match values.first() {
        Some(first) if values.iter().all(|v| v == first) => {
            write!(out, "        value           uniform ")?;
            first.write_value(out)?;
            writeln!(out, ";")
        }
        _ => {
            write!(out, "        value           nonuniform List<{}> {}(", T::TYPE_NAME, values.len())?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.write_char(' ')?;
                }
                v.write_value(out)?;
            }
            writeln!(out, ");")
        }
    }
}

fn blend<T: FieldValue>(own: &[T], nbr: &[T]) -> Vec<T> {
    own.iter()
        .zip(nbr)
        .map(|(a, b)| a.scaled(0.5).plus(b.scaled(0.5)))
        .collect()
}

macro_rules! patch_data_accessors {
    () => {
        fn data(&self) -> &PatchData<T> {
            &self.data
        }

        fn data_mut(&mut self) -> &mut PatchData<T> {
            &mut self.data
        }

        fn clone_box(&self) -> Box<dyn PatchField<T>> {
            Box::new(self.clone())
        }
    };
}

/// Prescribed face values.
#[derive(Clone, Debug)]
pub struct FixedValue<T> {
    data: PatchData<T>,
}

impl<T: FieldValue> FixedValue<T> {
    pub const TYPE_NAME: &'static str = "fixedValue";

    pub fn new(patch: usize, values: Vec<T>) -> Self {
        Self {
            data: PatchData { patch, values },
        }
    }
}

impl<T: FieldValue> PatchField<T> for FixedValue<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn complete_exchange(&mut self, _ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Face values copy the adjacent cell values.
#[derive(Clone, Debug)]
pub struct ZeroGradient<T> {
    data: PatchData<T>,
}

impl<T: FieldValue> ZeroGradient<T> {
    pub const TYPE_NAME: &'static str = "zeroGradient";

    pub fn new(patch: usize, ctx: &FieldContext<'_, T>) -> Result<Self, MeshError> {
        Ok(Self {
            data: PatchData {
                patch,
                values: ctx.patch_internal(patch)?,
            },
        })
    }
}

impl<T: FieldValue> PatchField<T> for ZeroGradient<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn complete_exchange(&mut self, ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        self.data.values = ctx.patch_internal(self.data.patch)?;
        Ok(())
    }
}

/// Values set from outside; evaluation leaves them alone.
#[derive(Clone, Debug)]
pub struct Calculated<T> {
    data: PatchData<T>,
}

impl<T: FieldValue> Calculated<T> {
    pub const TYPE_NAME: &'static str = "calculated";

    pub fn new(patch: usize, values: Vec<T>) -> Self {
        Self {
            data: PatchData { patch, values },
        }
    }
}

impl<T: FieldValue> PatchField<T> for Calculated<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn complete_exchange(&mut self, _ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Constraint patch without data.
#[derive(Clone, Debug)]
pub struct Empty<T> {
    data: PatchData<T>,
}

impl<T: FieldValue> Empty<T> {
    pub const TYPE_NAME: &'static str = "empty";

    pub fn new(patch: usize) -> Self {
        Self {
            data: PatchData {
                patch,
                values: Vec::new(),
            },
        }
    }
}

impl<T: FieldValue> PatchField<T> for Empty<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn complete_exchange(&mut self, _ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        Ok(())
    }

    fn topo_change(
        &mut self,
        new_patch: usize,
        _old_range: Range<usize>,
        _map: &IndexMap,
        _ctx: &FieldContext<'_, T>,
    ) -> Result<(), MeshError> {
        self.data.patch = new_patch;
        Ok(())
    }

    fn entry(&self) -> PatchFieldEntry<T> {
        PatchFieldEntry::of_type(Self::TYPE_NAME)
    }

    fn write(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "        type            {};", Self::TYPE_NAME)
    }
}

/// Interface to another partition. Face values are the mean of the cell
/// values on both sides.
#[derive(Clone, Debug)]
pub struct Processor<T> {
    data: PatchData<T>,
    neighbour_rank: usize,
    tag: u16,
    /// Posted non-blocking receive of the current exchange.
    pending: Option<RequestId>,
}

impl<T: FieldValue> Processor<T> {
    pub const TYPE_NAME: &'static str = "processor";

    pub fn new(patch: usize, ctx: &FieldContext<'_, T>) -> Result<Self, MeshError> {
        let p = ctx.patch(patch)?;
        let PatchKind::Processor {
            neighbour_rank, tag, ..
        } = p.kind
        else {
            return Err(MeshError::InvalidMesh(format!(
                "processor patch field on {} patch {}",
                p.kind.type_name(),
                p.name
            )));
        };
        Ok(Self {
            data: PatchData {
                patch,
                values: ctx.patch_internal(patch)?,
            },
            neighbour_rank,
            tag,
            pending: None,
        })
    }

    fn send_internal(&mut self, ctx: &FieldContext<'_, T>, ex: &dyn Exchange) -> Result<(), MeshError> {
        let own = ctx.patch_internal(self.data.patch)?;
        ex.send(self.neighbour_rank, self.tag, bytemuck::cast_slice(own.as_slice()));
        if ex.comms_type() == CommsType::NonBlocking {
            let len = own.len() * std::mem::size_of::<T>();
            self.pending = Some(ex.post_recv(self.neighbour_rank, self.tag, len));
        }
        Ok(())
    }

    fn receive(&mut self, ex: &dyn Exchange) -> Result<Vec<T>, MeshError> {
        let len = self.data.values.len() * std::mem::size_of::<T>();
        let raw = match self.pending.take() {
            Some(id) => ex.take_request(id)?,
            None => ex.recv(self.neighbour_rank, self.tag, len)?,
        };
        if raw.len() != len {
            return Err(MeshError::FieldSizeMismatch {
                what: format!("data received from rank {}", self.neighbour_rank),
                expected: len,
                found: raw.len(),
            });
        }
        Ok(raw
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }
}

impl<T: FieldValue> PatchField<T> for Processor<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_coupled(&self) -> bool {
        true
    }

    fn begin_exchange(&mut self, ctx: &FieldContext<'_, T>, ex: &dyn Exchange) -> Result<(), MeshError> {
        if ex.is_parallel() {
            self.send_internal(ctx, ex)?;
        }
        Ok(())
    }

    fn complete_exchange(&mut self, ctx: &FieldContext<'_, T>, ex: &dyn Exchange) -> Result<(), MeshError> {
        if ex.is_parallel() {
            let nbr = self.receive(ex)?;
            self.data.values = blend(&ctx.patch_internal(self.data.patch)?, &nbr);
        }
        Ok(())
    }

    fn begin_neighbour_exchange(&mut self, ctx: &FieldContext<'_, T>, ex: &dyn Exchange) -> Result<(), MeshError> {
        self.begin_exchange(ctx, ex)
    }

    fn neighbour_value(
        &mut self,
        ctx: &FieldContext<'_, T>,
        ex: &dyn Exchange,
    ) -> Result<Option<Vec<T>>, MeshError> {
        if ex.is_parallel() {
            self.receive(ex).map(Some)
        } else {
            ctx.patch_internal(self.data.patch).map(Some)
        }
    }
}

/// Periodic coupling to another patch of the same partition.
#[derive(Clone, Debug)]
pub struct Cyclic<T> {
    data: PatchData<T>,
    neighbour_patch: usize,
}

impl<T: FieldValue> Cyclic<T> {
    pub const TYPE_NAME: &'static str = "cyclic";

    pub fn new(patch: usize, ctx: &FieldContext<'_, T>) -> Result<Self, MeshError> {
        let p = ctx.patch(patch)?;
        let PatchKind::Cyclic { neighbour_patch } = p.kind else {
            return Err(MeshError::InvalidMesh(format!(
                "cyclic patch field on {} patch {}",
                p.kind.type_name(),
                p.name
            )));
        };
        Ok(Self {
            data: PatchData {
                patch,
                values: ctx.patch_internal(patch)?,
            },
            neighbour_patch,
        })
    }
}

impl<T: FieldValue> PatchField<T> for Cyclic<T> {
    patch_data_accessors!();

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_coupled(&self) -> bool {
        true
    }

    fn complete_exchange(&mut self, ctx: &FieldContext<'_, T>, _ex: &dyn Exchange) -> Result<(), MeshError> {
        let own = ctx.patch_internal(self.data.patch)?;
        let nbr = ctx.patch_internal(self.neighbour_patch)?;
        self.data.values = blend(&own, &nbr);
        Ok(())
    }

    fn neighbour_value(
        &mut self,
        ctx: &FieldContext<'_, T>,
        _ex: &dyn Exchange,
    ) -> Result<Option<Vec<T>>, MeshError> {
        ctx.patch_internal(self.neighbour_patch).map(Some)
    }

    fn topo_change(
        &mut self,
        new_patch: usize,
        _old_range: Range<usize>,
        map: &IndexMap,
        ctx: &FieldContext<'_, T>,
    ) -> Result<(), MeshError> {
        self.neighbour_patch = map
            .patch_map()
            .get(self.neighbour_patch)
            .copied()
            .flatten()
            .ok_or_else(|| MeshError::InvalidTopoChange(format!("neighbour of cyclic patch {new_patch} was removed")))?;
        self.data.patch = new_patch;
        self.data.values = blend(
            &ctx.patch_internal(new_patch)?,
            &ctx.patch_internal(self.neighbour_patch)?,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::exchange::PatchExchange;
    use crate::topology::block::BlockMesh;

    #[test]
    fn zero_gradient_follows_cells() {
        let mesh = BlockMesh::new(2, 1, 1).build().unwrap();
        let internal = [1.0, 3.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        let mut pf = ZeroGradient::new(1, &ctx).unwrap();
        assert_eq!(pf.values(), &[3.0]);

        let internal = [1.0, 5.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        pf.complete_exchange(&ctx, &PatchExchange::serial(CommsType::Blocking)).unwrap();
        assert_eq!(pf.values(), &[5.0]);
    }

    #[test]
    fn cyclic_averages_both_sides() {
        let mesh = BlockMesh::new(3, 1, 1).cyclic_x().build().unwrap();
        let internal = [2.0, 0.0, 4.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        let ex = PatchExchange::serial(CommsType::NonBlocking);
        let mut pf = Cyclic::new(0, &ctx).unwrap();
        pf.complete_exchange(&ctx, &ex).unwrap();
        assert_eq!(pf.values(), &[3.0]);
        assert_eq!(pf.neighbour_value(&ctx, &ex).unwrap(), Some(vec![4.0]));
        assert!(pf.is_coupled());
    }

    #[test]
    fn force_assign_checks_size() {
        let mut pf = FixedValue::new(0, vec![1.0f64; 2]);
        assert!(pf.force_assign(vec![0.0]).is_err());
        pf.force_assign(vec![0.0, 2.0]).unwrap();
        assert_eq!(pf.values(), &[0.0, 2.0]);
    }

    #[test]
    fn uniform_values_are_written_compactly() {
        let pf = FixedValue::new(0, vec![1.5f64; 3]);
        let mut out = String::new();
        pf.write(&mut out).unwrap();
        assert!(out.contains("type            fixedValue;"));
        assert!(out.contains("value           uniform 1.5;"));

        let pf = Calculated::new(0, vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        let mut out = String::new();
        pf.write(&mut out).unwrap();
        assert!(out.contains("nonuniform List<vector> 2((0 1 0) (1 0 0));"));
    }

    #[test]
    fn processor_field_rejects_wrong_patch_kind() {
        let mesh = BlockMesh::new(1, 1, 1).build().unwrap();
        let internal = [0.0];
        let ctx = FieldContext::new(&mesh, &internal).unwrap();
        assert!(Processor::new(0, &ctx).is_err());
    }
}
