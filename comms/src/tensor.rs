use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

/// The dimensions of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// The amount of elements a tensor of this shape holds.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self(value.to_vec())
    }
}

/// The element type of a tensor.
///
/// Tensors are always held as `f32` in memory, the dtype decides how they travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    F16,
}

impl DType {
    pub(crate) fn tag(self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::F16 => f.write_str("f16"),
        }
    }
}

/// How a shard applies a pushed tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Adds the pushed delta to the current value.
    Accumulate,
    /// Replaces the current value.
    Overwrite,
}

/// A borrowed view over the elements of a tensor as they travel on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Values<'a> {
    F32(&'a [f32]),
    F16(&'a [f16]),
}

impl<'a> Values<'a> {
    pub fn dtype(&self) -> DType {
        match self {
            Values::F32(_) => DType::F32,
            Values::F16(_) => DType::F16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::F32(xs) => xs.len(),
            Values::F16(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens the values into an owned `f32` buffer.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Values::F32(xs) => xs.to_vec(),
            Values::F16(xs) => xs.iter().map(|x| x.to_f32()).collect(),
        }
    }

    pub(crate) fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Values::F32(xs) => bytemuck::cast_slice(xs),
            Values::F16(xs) => bytemuck::cast_slice(xs),
        }
    }
}

/// The wire encoding of a `Tensor`, `f16` tensors need an owned narrowed copy.
#[derive(Debug)]
pub enum Encoded<'a> {
    F32(&'a [f32]),
    F16(Vec<f16>),
}

impl Encoded<'_> {
    pub fn values(&self) -> Values<'_> {
        match self {
            Encoded::F32(xs) => Values::F32(xs),
            Encoded::F16(xs) => Values::F16(xs),
        }
    }
}

/// Returned when a tensor's elements don't fill its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenMismatch {
    pub shape: Shape,
    pub len: usize,
}

impl fmt::Display for LenMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape {} holds {} elements but {} were given",
            self.shape,
            self.shape.numel(),
            self.len
        )
    }
}

impl std::error::Error for LenMismatch {}

/// A dense numeric array with a shape and a dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the tensor.
    /// * `dtype` - The element type used on the wire.
    /// * `data` - The elements in row major order.
    ///
    /// # Returns
    /// A new `Tensor` or a `LenMismatch` if `data` doesn't fill `shape`.
    pub fn new(shape: Shape, dtype: DType, data: Vec<f32>) -> Result<Self, LenMismatch> {
        if shape.numel() != data.len() {
            return Err(LenMismatch {
                shape,
                len: data.len(),
            });
        }

        Ok(Self { shape, dtype, data })
    }

    /// Creates a zero filled `Tensor`.
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let data = vec![0.; shape.numel()];
        Self { shape, dtype, data }
    }

    /// Creates a one dimensional `f32` tensor.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: Shape::new([data.len()]),
            dtype: DType::F32,
            data,
        }
    }

    /// Creates a `f32` scalar stored as a one element vector.
    pub fn scalar(value: f32) -> Self {
        Self::vector(vec![value])
    }

    /// Builds a tensor from received wire values.
    ///
    /// # Arguments
    /// * `shape` - The declared shape of the values.
    /// * `values` - The received elements.
    ///
    /// # Returns
    /// A new `Tensor` or a `LenMismatch` if `values` doesn't fill `shape`.
    pub fn from_values(shape: Shape, values: Values<'_>) -> Result<Self, LenMismatch> {
        Self::new(shape, values.dtype(), values.to_f32_vec())
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Whether `other` has the same shape and dtype as this tensor.
    pub fn same_layout(&self, shape: &Shape, dtype: DType) -> bool {
        self.shape == *shape && self.dtype == dtype
    }

    /// Encodes the elements for sending, narrowing them if the dtype asks for it.
    pub fn encode(&self) -> Encoded<'_> {
        match self.dtype {
            DType::F32 => Encoded::F32(&self.data),
            DType::F16 => Encoded::F16(self.data.iter().copied().map(f16::from_f32).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_short_data() {
        let err = Tensor::new(Shape::new([2, 3]), DType::F32, vec![0.; 5]).unwrap_err();
        assert_eq!(err.len, 5);
        assert_eq!(err.shape.numel(), 6);
    }

    #[test]
    fn f16_encoding_narrows_and_widens_back() {
        let tensor = Tensor::new(Shape::new([3]), DType::F16, vec![0.5, -2.0, 1024.0]).unwrap();
        let encoded = tensor.encode();
        let values = encoded.values();

        assert_eq!(values.dtype(), DType::F16);
        assert_eq!(values.as_bytes().len(), 3 * size_of::<f16>());

        let back = Tensor::from_values(tensor.shape().clone(), values).unwrap();
        assert_eq!(back, tensor);
    }

    #[test]
    fn scalar_shape_has_one_element() {
        let t = Tensor::scalar(3.0);
        assert_eq!(t.shape().numel(), 1);
        assert_eq!(t.as_slice(), &[3.0]);
    }
}
