//! Element types a field can carry.

use bytemuck::Pod;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// Plain-old-data field element with the arithmetic patch evaluation needs.
///
/// `Pod` lets coupled patches put values on the wire with
/// `bytemuck::cast_slice`.
pub trait FieldValue:
    Pod + Default + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Name used in written field entries.
    const TYPE_NAME: &'static str;

    fn plus(self, other: Self) -> Self;
    fn scaled(self, factor: f64) -> Self;
    fn write_value(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Arithmetic mean; the default value for an empty slice.
    fn average(values: &[Self]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values
            .iter()
            .fold(Self::default(), |acc, v| acc.plus(*v))
            .scaled(1.0 / values.len() as f64)
    }
}

impl FieldValue for f64 {
    const TYPE_NAME: &'static str = "scalar";

    fn plus(self, other: Self) -> Self {
        self + other
    }

    fn scaled(self, factor: f64) -> Self {
        self * factor
    }

    fn write_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{self}")
    }
}

impl FieldValue for f32 {
    const TYPE_NAME: &'static str = "floatScalar";

    fn plus(self, other: Self) -> Self {
        self + other
    }

    fn scaled(self, factor: f64) -> Self {
        (self as f64 * factor) as f32
    }

    fn write_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "{self}")
    }
}

impl FieldValue for [f64; 3] {
    const TYPE_NAME: &'static str = "vector";

    fn plus(self, other: Self) -> Self {
        [self[0] + other[0], self[1] + other[1], self[2] + other[2]]
    }

    fn scaled(self, factor: f64) -> Self {
        self.map(|c| c * factor)
    }

    fn write_value(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "({} {} {})", self[0], self[1], self[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages() {
        assert_eq!(f64::average(&[1.0, 2.0, 6.0]), 3.0);
        assert_eq!(<[f64; 3]>::average(&[[1.0, 0.0, 2.0], [3.0, 2.0, 0.0]]), [2.0, 1.0, 1.0]);
        assert_eq!(f32::average(&[]), 0.0);
    }

    #[test]
    fn writes_openfoam_style_values() {
        let mut s = String::new();
        [1.0, 2.5, 0.0].write_value(&mut s).unwrap();
        assert_eq!(s, "(1 2.5 0)");
    }
}
