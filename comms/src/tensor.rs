use std::io;

/// The element type of a `Tensor`, as tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I64,
}

impl DType {
    /// Returns the size in bytes of a single element of this type.
    pub fn size(self) -> usize {
        match self {
            DType::F32 => size_of::<f32>(),
            DType::I64 => size_of::<i64>(),
        }
    }

    /// Returns the wire tag of this type.
    pub fn tag(self) -> u8 {
        match self {
            DType::F32 => 0,
            DType::I64 => 1,
        }
    }

    /// Resolves a wire tag into a `DType`.
    ///
    /// # Arguments
    /// * `tag` - The dtype byte read from a frame header.
    ///
    /// # Returns
    /// The matching dtype or an `InvalidData` error for unknown tags.
    pub fn from_tag(tag: u8) -> io::Result<Self> {
        match tag {
            0 => Ok(DType::F32),
            1 => Ok(DType::I64),
            tag => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Received an invalid dtype tag {tag}"),
            )),
        }
    }
}

/// A dense, row-major tensor carried between the edge and the server.
///
/// `data` always holds exactly `product(shape) * dtype.size()` bytes with
/// every element stored little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a new `Tensor` from its raw parts.
    ///
    /// # Arguments
    /// * `shape` - The dimension sizes, all of them positive.
    /// * `dtype` - The element type.
    /// * `data` - The raw little-endian payload.
    ///
    /// # Returns
    /// The tensor or an `InvalidData` error if the shape and payload disagree.
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> io::Result<Self> {
        if shape.is_empty() {
            return Err(invalid("tensor shape must have at least one dimension"));
        }

        if let Some(i) = shape.iter().position(|&dim| dim == 0) {
            return Err(invalid(format!("dimension {i} of shape {shape:?} is zero")));
        }

        let expected = byte_len(&shape, dtype)
            .ok_or_else(|| invalid(format!("shape {shape:?} overflows the payload size")))?;

        if data.len() != expected {
            return Err(invalid(format!(
                "payload of {} bytes does not match shape {shape:?} of {dtype:?}, expected {expected} bytes",
                data.len()
            )));
        }

        Ok(Self { shape, dtype, data })
    }

    /// Creates a new `f32` tensor.
    ///
    /// # Arguments
    /// * `shape` - The dimension sizes.
    /// * `values` - The row-major elements.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> io::Result<Self> {
        let data = values.iter().flat_map(|x| x.to_le_bytes()).collect();
        Self::new(shape, DType::F32, data)
    }

    /// Creates a new `i64` tensor.
    ///
    /// # Arguments
    /// * `shape` - The dimension sizes.
    /// * `values` - The row-major elements.
    pub fn from_i64(shape: Vec<usize>, values: &[i64]) -> io::Result<Self> {
        let data = values.iter().flat_map(|x| x.to_le_bytes()).collect();
        Self::new(shape, DType::I64, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the amount of elements in this tensor.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns the raw little-endian payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the payload as `f32` elements.
    ///
    /// # Returns
    /// The elements or an `InvalidData` error if the tensor is not `f32`.
    pub fn to_f32_vec(&self) -> io::Result<Vec<f32>> {
        self.expect_dtype(DType::F32)?;

        let values = self
            .data
            .chunks_exact(size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(values)
    }

    /// Decodes the payload as `i64` elements.
    ///
    /// # Returns
    /// The elements or an `InvalidData` error if the tensor is not `i64`.
    pub fn to_i64_vec(&self) -> io::Result<Vec<i64>> {
        self.expect_dtype(DType::I64)?;

        let values = self
            .data
            .chunks_exact(size_of::<i64>())
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();

        Ok(values)
    }

    fn expect_dtype(&self, dtype: DType) -> io::Result<()> {
        if self.dtype != dtype {
            return Err(invalid(format!(
                "expected a {dtype:?} tensor, got {:?}",
                self.dtype
            )));
        }

        Ok(())
    }
}

/// Computes the payload size of a tensor, `None` on overflow.
pub(crate) fn byte_len(shape: &[usize], dtype: DType) -> Option<usize> {
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &dim| acc.checked_mul(dim))
}

fn invalid<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
