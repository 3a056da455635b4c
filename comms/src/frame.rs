//! Implements the tensor framing: a 4 byte payload length, the shape header and the raw payload.
//!
//! ```text
//! [u32 BE payload length N][u8 rank R][R x u32 BE dims][u8 dtype tag][N payload bytes]
//! ```

use std::io::{self, Read};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    LEN_TYPE_SIZE, LenType,
    tensor::{self, DType, Tensor},
};

type DimType = u32;
const DIM_TYPE_SIZE: usize = size_of::<DimType>();

/// The largest rank a frame may declare.
pub const MAX_RANK: usize = 8;

/// The largest payload a frame may declare, checked before allocating.
pub const MAX_PAYLOAD_LEN: usize = 256 << 20;

/// Length prefix plus rank byte.
const PREFIX_SIZE: usize = LEN_TYPE_SIZE + 1;

/// Writes everything that precedes the payload of `tensor` into `buf`.
///
/// # Arguments
/// * `tensor` - The tensor to frame.
/// * `buf` - The buffer to append the header to.
///
/// # Returns
/// An `InvalidInput` error if the tensor can't be represented on the wire.
pub fn encode_header(tensor: &Tensor, buf: &mut Vec<u8>) -> io::Result<()> {
    let len = tensor.data().len();
    if len > MAX_PAYLOAD_LEN {
        return Err(unencodable(format!(
            "payload of {len} bytes exceeds the maximum of {MAX_PAYLOAD_LEN} bytes"
        )));
    }

    let rank = tensor.rank();
    if rank > MAX_RANK {
        return Err(unencodable(format!(
            "rank {rank} exceeds the maximum of {MAX_RANK}"
        )));
    }

    buf.reserve(PREFIX_SIZE + rank * DIM_TYPE_SIZE + 1);
    buf.extend_from_slice(&(len as LenType).to_be_bytes());
    buf.push(rank as u8);

    for &dim in tensor.shape() {
        let dim = DimType::try_from(dim)
            .map_err(|_| unencodable(format!("dimension {dim} does not fit in 4 bytes")))?;
        buf.extend_from_slice(&dim.to_be_bytes());
    }

    buf.push(tensor.dtype().tag());
    Ok(())
}

/// Encodes `tensor` into a single contiguous frame.
pub fn encode(tensor: &Tensor) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(PREFIX_SIZE + tensor.data().len() + 64);
    encode_header(tensor, &mut buf)?;
    buf.extend_from_slice(tensor.data());
    Ok(buf)
}

/// Decodes exactly one frame from `bytes`.
///
/// # Arguments
/// * `bytes` - A complete frame, without trailing data.
///
/// # Returns
/// The decoded tensor, an `UnexpectedEof` error if the frame is truncated or
/// an `InvalidData` error if it is malformed.
pub fn decode(mut bytes: &[u8]) -> io::Result<Tensor> {
    let mut prefix = [0; PREFIX_SIZE];
    Read::read_exact(&mut bytes, &mut prefix).map_err(|e| truncated(e, "length prefix"))?;
    let (len, rank) = parse_prefix(prefix)?;

    let mut header = vec![0; rank * DIM_TYPE_SIZE + 1];
    Read::read_exact(&mut bytes, &mut header).map_err(|e| truncated(e, "shape header"))?;
    let (shape, dtype) = parse_header(&header, len)?;

    let mut payload = vec![0; len];
    Read::read_exact(&mut bytes, &mut payload).map_err(|e| truncated(e, "payload"))?;

    if !bytes.is_empty() {
        return Err(malformed(format!(
            "{} trailing bytes after the payload",
            bytes.len()
        )));
    }

    Tensor::new(shape, dtype, payload)
}

/// Reads one frame from `src`.
///
/// # Arguments
/// * `src` - The reader to pull the frame from.
///
/// # Returns
/// The decoded tensor, an `UnexpectedEof` error if the peer closed before the
/// whole frame arrived or an `InvalidData` error if it is malformed.
pub async fn read_frame<R>(src: &mut R) -> io::Result<Tensor>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0; PREFIX_SIZE];
    src.read_exact(&mut prefix)
        .await
        .map_err(|e| truncated(e, "length prefix"))?;
    let (len, rank) = parse_prefix(prefix)?;

    let mut header = vec![0; rank * DIM_TYPE_SIZE + 1];
    src.read_exact(&mut header)
        .await
        .map_err(|e| truncated(e, "shape header"))?;
    let (shape, dtype) = parse_header(&header, len)?;

    let mut payload = vec![0; len];
    src.read_exact(&mut payload)
        .await
        .map_err(|e| truncated(e, "payload"))?;

    Tensor::new(shape, dtype, payload)
}

fn parse_prefix(prefix: [u8; PREFIX_SIZE]) -> io::Result<(usize, usize)> {
    let mut len = [0; LEN_TYPE_SIZE];
    len.copy_from_slice(&prefix[..LEN_TYPE_SIZE]);
    let len = LenType::from_be_bytes(len) as usize;
    let rank = prefix[LEN_TYPE_SIZE] as usize;

    if len > MAX_PAYLOAD_LEN {
        return Err(malformed(format!(
            "declared payload of {len} bytes exceeds the maximum of {MAX_PAYLOAD_LEN} bytes"
        )));
    }

    if rank == 0 || rank > MAX_RANK {
        return Err(malformed(format!(
            "declared rank {rank} is outside 1..={MAX_RANK}"
        )));
    }

    Ok((len, rank))
}

/// Parses the dims and dtype tag, checking them against the declared length.
fn parse_header(header: &[u8], len: usize) -> io::Result<(Vec<usize>, DType)> {
    let (dims, tag) = header.split_at(header.len() - 1);
    let dtype = DType::from_tag(tag[0])?;

    let shape: Vec<usize> = dims
        .chunks_exact(DIM_TYPE_SIZE)
        .map(|c| DimType::from_be_bytes([c[0], c[1], c[2], c[3]]) as usize)
        .collect();

    match tensor::byte_len(&shape, dtype) {
        Some(expected) if expected == len => Ok((shape, dtype)),
        _ => Err(malformed(format!(
            "declared payload of {len} bytes does not match shape {shape:?} of {dtype:?}"
        ))),
    }
}

fn truncated(err: io::Error, what: &str) -> io::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("connection closed while reading the {what}"),
        )
    } else {
        err
    }
}

fn malformed(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn unencodable(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
