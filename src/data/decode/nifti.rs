// --- File: src/data/decode/nifti.rs ---

//! NIfTI-1 single-file (`n+1`) reader and a minimal float32 writer.
//!
//! Voxels are stored x-fastest, so a volume with `dim = [3, nx, ny, nz]`
//! becomes an array of shape `[nz, ny, nx]`.

use super::{read_file, DecodeError, Decoder};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

const FORMAT: &str = "NIfTI-1";
const HEADER_LEN: usize = 348;
/// Header plus the 4-byte extension flag.
const MIN_VOX_OFFSET: usize = 352;

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

/// Fields of the header that decoding needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub little_endian: bool,
    /// `dim[1..=dim[0]]`, x first.
    pub dims: Vec<usize>,
    pub datatype: i16,
    pub vox_offset: usize,
    pub scl_slope: f32,
    pub scl_inter: f32,
}

impl NiftiHeader {
    /// Parses the first 348 bytes, detecting byte order from `sizeof_hdr`.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::malformed(FORMAT, "file shorter than header"));
        }
        if LittleEndian::read_i32(&bytes[0..4]) == HEADER_LEN as i32 {
            Self::parse_with::<LittleEndian>(bytes, true)
        } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_LEN as i32 {
            Self::parse_with::<BigEndian>(bytes, false)
        } else {
            Err(DecodeError::malformed(FORMAT, "sizeof_hdr is not 348"))
        }
    }

    fn parse_with<B: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<Self, DecodeError> {
        let magic = &bytes[344..348];
        if magic == b"ni1\0" {
            return Err(DecodeError::unsupported(FORMAT, "separate .hdr/.img pairs"));
        }
        if magic != b"n+1\0" {
            return Err(DecodeError::malformed(FORMAT, "bad magic"));
        }

        let dim_at = |i: usize| B::read_i16(&bytes[40 + 2 * i..42 + 2 * i]);
        let ndim = dim_at(0);
        if !(1..=7).contains(&ndim) {
            return Err(DecodeError::malformed(FORMAT, format!("dim[0] = {ndim}")));
        }
        let mut dims = Vec::with_capacity(ndim as usize);
        for i in 1..=ndim as usize {
            let d = dim_at(i);
            if d < 1 {
                return Err(DecodeError::malformed(FORMAT, format!("dim[{i}] = {d}")));
            }
            dims.push(d as usize);
        }

        let vox_offset = B::read_f32(&bytes[108..112]);
        if !(vox_offset >= MIN_VOX_OFFSET as f32) {
            return Err(DecodeError::malformed(FORMAT, format!("vox_offset = {vox_offset}")));
        }

        Ok(Self {
            little_endian,
            dims,
            datatype: B::read_i16(&bytes[70..72]),
            vox_offset: vox_offset as usize,
            scl_slope: B::read_f32(&bytes[112..116]),
            scl_inter: B::read_f32(&bytes[116..120]),
        })
    }

    /// Spatial shape in array order (`[z, y, x]` or `[y, x]`).
    ///
    /// Trailing singleton dimensions are dropped; a fourth non-singleton
    /// dimension (time series) is rejected.
    pub fn array_shape(&self) -> Result<Vec<usize>, DecodeError> {
        let mut dims = self.dims.clone();
        while dims.len() > 2 && dims.last() == Some(&1) {
            dims.pop();
        }
        if dims.len() > 3 {
            return Err(DecodeError::unsupported(
                FORMAT,
                format!("{}-dimensional image {:?}", dims.len(), self.dims),
            ));
        }
        if dims.len() == 1 {
            dims.push(1);
        }
        dims.reverse();
        Ok(dims)
    }
}

/// Decoder for `.nii` and `.nii.gz`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiDecoder;

impl NiftiDecoder {
    /// Decodes an in-memory (already inflated) NIfTI-1 file.
    pub fn decode_bytes(bytes: &[u8]) -> Result<ArrayD<f32>, DecodeError> {
        let header = NiftiHeader::parse(bytes)?;
        let shape = header.array_shape()?;
        let count: usize = shape.iter().product();

        let payload = bytes
            .get(header.vox_offset..)
            .ok_or_else(|| DecodeError::malformed(FORMAT, "vox_offset past end of file"))?;

        let mut voxels = if header.little_endian {
            read_voxels::<LittleEndian>(payload, header.datatype, count)?
        } else {
            read_voxels::<BigEndian>(payload, header.datatype, count)?
        };

        if header.scl_slope != 0.0 && header.scl_slope.is_finite() {
            let (slope, inter) = (header.scl_slope, header.scl_inter);
            if slope != 1.0 || inter != 0.0 {
                voxels.iter_mut().for_each(|v| *v = *v * slope + inter);
            }
        }

        ArrayD::from_shape_vec(IxDyn(&shape), voxels)
            .map_err(|e| DecodeError::malformed(FORMAT, e.to_string()))
    }
}

impl Decoder for NiftiDecoder {
    fn decode(&self, path: &Path) -> Result<ArrayD<f32>, DecodeError> {
        let bytes = read_file(path)?;
        Self::decode_bytes(&bytes)
    }

    fn name(&self) -> &'static str {
        "nifti"
    }
}

fn read_voxels<B: ByteOrder>(payload: &[u8], datatype: i16, count: usize) -> Result<Vec<f32>, DecodeError> {
    let width = match datatype {
        DT_UINT8 | DT_INT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => {
            return Err(DecodeError::unsupported(FORMAT, format!("datatype code {other}")));
        }
    };

    let needed = count * width;
    if payload.len() < needed {
        return Err(DecodeError::malformed(
            FORMAT,
            format!("expected {needed} bytes of voxel data, found {}", payload.len()),
        ));
    }
    let data = &payload[..needed];
    let chunks = data.chunks_exact(width);

    let voxels = match datatype {
        DT_UINT8 => data.iter().map(|&b| b as f32).collect(),
        DT_INT8 => data.iter().map(|&b| b as i8 as f32).collect(),
        DT_INT16 => chunks.map(|c| B::read_i16(c) as f32).collect(),
        DT_UINT16 => chunks.map(|c| B::read_u16(c) as f32).collect(),
        DT_INT32 => chunks.map(|c| B::read_i32(c) as f32).collect(),
        DT_UINT32 => chunks.map(|c| B::read_u32(c) as f32).collect(),
        DT_FLOAT32 => chunks.map(B::read_f32).collect(),
        _ => chunks.map(|c| B::read_f64(c) as f32).collect(),
    };
    Ok(voxels)
}

/// Encodes a 2D or 3D array as a little-endian float32 NIfTI-1 file.
///
/// The array is interpreted in `[z, y, x]` (or `[y, x]`) order, the inverse
/// of [`NiftiDecoder::decode_bytes`]. A leading channel axis of length 1 is
/// dropped. Used to dump preprocessed samples for inspection.
pub fn encode_f32(volume: &ArrayD<f32>) -> Result<Vec<u8>, DecodeError> {
    let mut shape: Vec<usize> = volume.shape().to_vec();
    if shape.len() == 4 && shape[0] == 1 {
        shape.remove(0);
    }
    if !(2..=3).contains(&shape.len()) {
        return Err(DecodeError::unsupported(
            FORMAT,
            format!("cannot encode array of shape {:?}", volume.shape()),
        ));
    }
    if shape.iter().any(|&d| d > i16::MAX as usize) {
        return Err(DecodeError::unsupported(FORMAT, "dimension exceeds i16 range"));
    }

    let mut header = vec![0u8; MIN_VOX_OFFSET];
    LittleEndian::write_i32(&mut header[0..4], HEADER_LEN as i32);
    LittleEndian::write_i16(&mut header[40..42], shape.len() as i16);
    for (i, &d) in shape.iter().rev().enumerate() {
        let at = 42 + 2 * i;
        LittleEndian::write_i16(&mut header[at..at + 2], d as i16);
    }
    for i in shape.len()..7 {
        let at = 42 + 2 * i;
        LittleEndian::write_i16(&mut header[at..at + 2], 1);
    }
    LittleEndian::write_i16(&mut header[70..72], DT_FLOAT32);
    LittleEndian::write_i16(&mut header[72..74], 32);
    // pixdim: qfac then unit spacing.
    for i in 0..8 {
        let at = 76 + 4 * i;
        LittleEndian::write_f32(&mut header[at..at + 4], 1.0);
    }
    LittleEndian::write_f32(&mut header[108..112], MIN_VOX_OFFSET as f32);
    LittleEndian::write_f32(&mut header[112..116], 1.0);
    header[344..348].copy_from_slice(b"n+1\0");

    header.reserve(volume.len() * 4);
    for &v in volume.iter() {
        header.extend_from_slice(&v.to_le_bytes());
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Builds a header by hand so that non-float datatypes and big-endian
    /// files can be exercised.
    fn build_i16_be(dims: &[i16], values: &[i16], slope: f32, inter: f32) -> Vec<u8> {
        let mut bytes = vec![0u8; MIN_VOX_OFFSET];
        BigEndian::write_i32(&mut bytes[0..4], 348);
        BigEndian::write_i16(&mut bytes[40..42], dims.len() as i16);
        for (i, &d) in dims.iter().enumerate() {
            BigEndian::write_i16(&mut bytes[42 + 2 * i..44 + 2 * i], d);
        }
        BigEndian::write_i16(&mut bytes[70..72], DT_INT16);
        BigEndian::write_f32(&mut bytes[108..112], 352.0);
        BigEndian::write_f32(&mut bytes[112..116], slope);
        BigEndian::write_f32(&mut bytes[116..120], inter);
        bytes[344..348].copy_from_slice(b"n+1\0");
        for &v in values {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_encode_decode_volume_layout() {
        let volume = ArrayD::from_shape_vec(IxDyn(&[2, 3, 4]), (0..24).map(|x| x as f32).collect()).unwrap();
        let bytes = encode_f32(&volume).unwrap();

        let header = NiftiHeader::parse(&bytes).unwrap();
        assert_eq!(header.dims, vec![4, 3, 2]);
        assert!(header.little_endian);

        let decoded = NiftiDecoder::decode_bytes(&bytes).unwrap();
        assert_eq!(decoded, volume);
    }

    #[test]
    fn test_big_endian_int16_with_scaling() {
        let bytes = build_i16_be(&[3, 2, 1], &[-1, 0, 1, 2, 3, 4], 2.0, 10.0);
        let decoded = NiftiDecoder::decode_bytes(&bytes).unwrap();

        // Trailing singleton z is dropped, x is fastest.
        assert_eq!(decoded.shape(), &[2, 3]);
        assert_eq!(decoded[[0, 0]], 8.0);
        assert_eq!(decoded[[1, 2]], 18.0);
    }

    #[test]
    fn test_gzip_file_is_inflated() {
        let volume = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 3.5f32);
        let raw = encode_f32(&volume).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&raw).unwrap();
        let gz = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");
        std::fs::write(&path, gz).unwrap();

        let decoded = NiftiDecoder.decode(&path).unwrap();
        assert_eq!(decoded, volume);
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let volume = ArrayD::from_elem(IxDyn(&[4, 4]), 1.0f32);
        let mut bytes = encode_f32(&volume).unwrap();
        bytes.truncate(bytes.len() - 5);

        assert!(matches!(
            NiftiDecoder::decode_bytes(&bytes),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage_and_time_series() {
        assert!(NiftiDecoder::decode_bytes(&[0u8; 400]).is_err());

        let series = build_i16_be(&[2, 2, 2, 3], &[0; 24], 0.0, 0.0);
        assert!(matches!(
            NiftiDecoder::decode_bytes(&series),
            Err(DecodeError::Unsupported { .. })
        ));
    }
}
