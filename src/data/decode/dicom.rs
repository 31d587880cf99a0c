// --- File: src/data/decode/dicom.rs ---

//! Minimal DICOM Part 10 reader for uncompressed monochrome images.
//!
//! Supported transfer syntaxes: implicit VR little endian and explicit VR
//! little endian. Encapsulated (compressed) pixel data and big-endian
//! files are rejected as unsupported.

use super::{read_file, DecodeError, Decoder};
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

const FORMAT: &str = "DICOM";
const PREAMBLE_LEN: usize = 128;
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
/// Deepest nesting of undefined-length sequences that is followed.
const MAX_SEQUENCE_DEPTH: usize = 32;

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

type Tag = (u16, u16);

const TRANSFER_SYNTAX: Tag = (0x0002, 0x0010);
const SAMPLES_PER_PIXEL: Tag = (0x0028, 0x0002);
const PHOTOMETRIC: Tag = (0x0028, 0x0004);
const NUMBER_OF_FRAMES: Tag = (0x0028, 0x0008);
const ROWS: Tag = (0x0028, 0x0010);
const COLUMNS: Tag = (0x0028, 0x0011);
const BITS_ALLOCATED: Tag = (0x0028, 0x0100);
const PIXEL_REPRESENTATION: Tag = (0x0028, 0x0103);
const RESCALE_INTERCEPT: Tag = (0x0028, 0x1052);
const RESCALE_SLOPE: Tag = (0x0028, 0x1053);
const PIXEL_DATA: Tag = (0x7FE0, 0x0010);

const ITEM: Tag = (0xFFFE, 0xE000);
const ITEM_DELIMITER: Tag = (0xFFFE, 0xE00D);
const SEQUENCE_DELIMITER: Tag = (0xFFFE, 0xE0DD);

/// One data element; `value` is empty for undefined-length sequences.
struct Element<'a> {
    tag: Tag,
    value: &'a [u8],
}

/// Cursor over a little-endian data set.
struct ElementReader<'a> {
    buf: &'a [u8],
    pos: usize,
    explicit_vr: bool,
    depth: usize,
}

impl<'a> ElementReader<'a> {
    fn new(buf: &'a [u8], pos: usize, explicit_vr: bool) -> Self {
        Self {
            buf,
            pos,
            explicit_vr,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| DecodeError::malformed(FORMAT, format!("element at byte {} runs past end of file", self.pos)))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn tag(&mut self) -> Result<Tag, DecodeError> {
        Ok((self.u16()?, self.u16()?))
    }

    fn peek_tag(&self) -> Result<Tag, DecodeError> {
        let mut ahead = ElementReader::new(self.buf, self.pos, self.explicit_vr);
        ahead.tag()
    }

    fn next_element(&mut self) -> Result<Element<'a>, DecodeError> {
        let tag = self.tag()?;
        if tag.0 == 0xFFFE {
            return Err(DecodeError::malformed(FORMAT, format!("unexpected delimiter {:04X},{:04X}", tag.0, tag.1)));
        }

        let len = if self.explicit_vr {
            let vr = self.take(2)?;
            if has_long_length(vr) {
                self.take(2)?;
                self.u32()?
            } else {
                self.u16()? as u32
            }
        } else {
            self.u32()?
        };

        if len == UNDEFINED_LENGTH {
            if tag == PIXEL_DATA {
                return Err(DecodeError::unsupported(FORMAT, "encapsulated (compressed) pixel data"));
            }
            self.skip_sequence()?;
            return Ok(Element { tag, value: &[] });
        }

        let value = self.take(len as usize)?;
        Ok(Element { tag, value })
    }

    /// Skips an undefined-length sequence up to and including its delimiter.
    fn skip_sequence(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_SEQUENCE_DEPTH {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("sequences nested deeper than {MAX_SEQUENCE_DEPTH} at byte {}", self.pos),
            ));
        }
        self.depth += 1;
        let skipped = self.skip_sequence_items();
        self.depth -= 1;
        skipped
    }

    fn skip_sequence_items(&mut self) -> Result<(), DecodeError> {
        loop {
            let tag = self.tag()?;
            let len = self.u32()?;
            match tag {
                SEQUENCE_DELIMITER => return Ok(()),
                ITEM if len == UNDEFINED_LENGTH => self.skip_item()?,
                ITEM => {
                    self.take(len as usize)?;
                }
                other => {
                    return Err(DecodeError::malformed(
                        FORMAT,
                        format!("unexpected tag {:04X},{:04X} inside sequence", other.0, other.1),
                    ));
                }
            }
        }
    }

    /// Skips the elements of an undefined-length item.
    fn skip_item(&mut self) -> Result<(), DecodeError> {
        loop {
            if self.peek_tag()? == ITEM_DELIMITER {
                self.take(8)?;
                return Ok(());
            }
            self.next_element()?;
        }
    }
}

/// VRs with a 2-byte reserved field and a 4-byte length in explicit VR.
fn has_long_length(vr: &[u8]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR" | b"UT" | b"UV"
    )
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn decimal(value: &[u8], tag: Tag) -> Result<f32, DecodeError> {
    // DS may be multi-valued; the first value applies.
    let s = text(value);
    let first = s.split('\\').next().unwrap_or("").trim();
    first.parse::<f32>().map_err(|_| {
        DecodeError::malformed(FORMAT, format!("bad decimal '{s}' in {:04X},{:04X}", tag.0, tag.1))
    })
}

fn unsigned_short(value: &[u8], tag: Tag) -> Result<usize, DecodeError> {
    if value.len() < 2 {
        return Err(DecodeError::malformed(FORMAT, format!("short US value in {:04X},{:04X}", tag.0, tag.1)));
    }
    Ok(LittleEndian::read_u16(value) as usize)
}

/// Image attributes collected from the data set.
#[derive(Debug, Default)]
struct PixelModule<'a> {
    rows: Option<usize>,
    columns: Option<usize>,
    frames: usize,
    bits_allocated: usize,
    signed: bool,
    samples_per_pixel: usize,
    photometric: String,
    slope: f32,
    intercept: f32,
    pixel_data: Option<&'a [u8]>,
}

/// Decoder for `.dcm` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomDecoder;

impl DicomDecoder {
    /// Decodes an in-memory DICOM Part 10 file.
    ///
    /// Returns `[rows, columns]`, or `[frames, rows, columns]` for
    /// multi-frame images, with the modality rescale applied.
    pub fn decode_bytes(bytes: &[u8]) -> Result<ArrayD<f32>, DecodeError> {
        if bytes.len() < PREAMBLE_LEN + 4 || &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] != b"DICM" {
            return Err(DecodeError::malformed(FORMAT, "missing DICM prefix"));
        }

        // File meta group is always explicit VR little endian.
        let mut reader = ElementReader::new(bytes, PREAMBLE_LEN + 4, true);
        let mut transfer_syntax = None;
        while !reader.at_end() && reader.peek_tag()?.0 == 0x0002 {
            let element = reader.next_element()?;
            if element.tag == TRANSFER_SYNTAX {
                transfer_syntax = Some(text(element.value));
            }
        }

        let syntax = transfer_syntax
            .ok_or_else(|| DecodeError::malformed(FORMAT, "no transfer syntax in file meta"))?;
        reader.explicit_vr = match syntax.as_str() {
            EXPLICIT_VR_LE => true,
            IMPLICIT_VR_LE => false,
            other => {
                return Err(DecodeError::unsupported(FORMAT, format!("transfer syntax {other}")));
            }
        };

        let module = Self::read_pixel_module(&mut reader)?;
        Self::pixels_to_array(&module)
    }

    fn read_pixel_module<'a>(reader: &mut ElementReader<'a>) -> Result<PixelModule<'a>, DecodeError> {
        let mut module = PixelModule {
            frames: 1,
            bits_allocated: 16,
            samples_per_pixel: 1,
            photometric: "MONOCHROME2".to_string(),
            slope: 1.0,
            ..PixelModule::default()
        };

        while !reader.at_end() {
            let element = reader.next_element()?;
            let value = element.value;
            match element.tag {
                ROWS => module.rows = Some(unsigned_short(value, ROWS)?),
                COLUMNS => module.columns = Some(unsigned_short(value, COLUMNS)?),
                BITS_ALLOCATED => module.bits_allocated = unsigned_short(value, BITS_ALLOCATED)?,
                PIXEL_REPRESENTATION => module.signed = unsigned_short(value, PIXEL_REPRESENTATION)? == 1,
                SAMPLES_PER_PIXEL => module.samples_per_pixel = unsigned_short(value, SAMPLES_PER_PIXEL)?,
                PHOTOMETRIC => module.photometric = text(value),
                NUMBER_OF_FRAMES => {
                    module.frames = text(value)
                        .parse()
                        .map_err(|_| DecodeError::malformed(FORMAT, "bad NumberOfFrames"))?;
                }
                RESCALE_SLOPE => module.slope = decimal(value, RESCALE_SLOPE)?,
                RESCALE_INTERCEPT => module.intercept = decimal(value, RESCALE_INTERCEPT)?,
                PIXEL_DATA => {
                    module.pixel_data = Some(value);
                    break;
                }
                _ => {}
            }
        }
        Ok(module)
    }

    fn pixels_to_array(module: &PixelModule<'_>) -> Result<ArrayD<f32>, DecodeError> {
        let (rows, columns) = match (module.rows, module.columns) {
            (Some(r), Some(c)) if r > 0 && c > 0 => (r, c),
            _ => return Err(DecodeError::malformed(FORMAT, "missing Rows/Columns")),
        };
        let data = module
            .pixel_data
            .ok_or_else(|| DecodeError::malformed(FORMAT, "no PixelData element"))?;
        if module.samples_per_pixel != 1 {
            return Err(DecodeError::unsupported(
                FORMAT,
                format!("{} samples per pixel", module.samples_per_pixel),
            ));
        }
        if module.frames == 0 {
            return Err(DecodeError::malformed(FORMAT, "NumberOfFrames is 0"));
        }

        let width = match module.bits_allocated {
            8 => 1,
            16 => 2,
            other => return Err(DecodeError::unsupported(FORMAT, format!("{other} bits allocated"))),
        };
        let needed = module
            .frames
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(columns))
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| DecodeError::malformed(FORMAT, "pixel count overflows"))?;
        if data.len() < needed {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("PixelData holds {} bytes, need {needed}", data.len()),
            ));
        }
        let data = &data[..needed];

        let mut pixels: Vec<f32> = match (width, module.signed) {
            (1, false) => data.iter().map(|&b| b as f32).collect(),
            (1, true) => data.iter().map(|&b| b as i8 as f32).collect(),
            (_, false) => data.chunks_exact(2).map(|c| LittleEndian::read_u16(c) as f32).collect(),
            (_, true) => data.chunks_exact(2).map(|c| LittleEndian::read_i16(c) as f32).collect(),
        };

        let (slope, intercept) = (module.slope, module.intercept);
        if slope != 1.0 || intercept != 0.0 {
            pixels.iter_mut().for_each(|p| *p = *p * slope + intercept);
        }

        // MONOCHROME1: low values are bright.
        if module.photometric == "MONOCHROME1" {
            let (lo, hi) = pixels
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &p| (lo.min(p), hi.max(p)));
            pixels.iter_mut().for_each(|p| *p = hi + lo - *p);
        } else if module.photometric != "MONOCHROME2" {
            return Err(DecodeError::unsupported(
                FORMAT,
                format!("photometric interpretation {}", module.photometric),
            ));
        }

        let shape: Vec<usize> = if module.frames > 1 {
            vec![module.frames, rows, columns]
        } else {
            vec![rows, columns]
        };
        ArrayD::from_shape_vec(IxDyn(&shape), pixels).map_err(|e| DecodeError::malformed(FORMAT, e.to_string()))
    }
}

impl Decoder for DicomDecoder {
    fn decode(&self, path: &Path) -> Result<ArrayD<f32>, DecodeError> {
        let bytes = read_file(path)?;
        Self::decode_bytes(&bytes)
    }

    fn name(&self) -> &'static str {
        "dicom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(buf: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], value: &[u8]) {
        buf.extend_from_slice(&tag.0.to_le_bytes());
        buf.extend_from_slice(&tag.1.to_le_bytes());
        buf.extend_from_slice(vr);
        if has_long_length(vr) {
            buf.extend_from_slice(&[0, 0]);
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
        buf.extend_from_slice(value);
    }

    fn implicit(buf: &mut Vec<u8>, tag: Tag, value: &[u8]) {
        buf.extend_from_slice(&tag.0.to_le_bytes());
        buf.extend_from_slice(&tag.1.to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);
    }

    fn preamble(syntax: &str) -> Vec<u8> {
        let mut buf = vec![0u8; PREAMBLE_LEN];
        buf.extend_from_slice(b"DICM");
        let mut uid = syntax.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        explicit(&mut buf, TRANSFER_SYNTAX, b"UI", &uid);
        buf
    }

    fn u16s(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_explicit_vr_16bit_with_rescale() {
        let mut buf = preamble(EXPLICIT_VR_LE);
        explicit(&mut buf, (0x0008, 0x0060), b"CS", b"CR");
        explicit(&mut buf, ROWS, b"US", &2u16.to_le_bytes());
        explicit(&mut buf, COLUMNS, b"US", &3u16.to_le_bytes());
        explicit(&mut buf, BITS_ALLOCATED, b"US", &16u16.to_le_bytes());
        explicit(&mut buf, RESCALE_INTERCEPT, b"DS", b"-10");
        explicit(&mut buf, RESCALE_SLOPE, b"DS", b"2 ");
        explicit(&mut buf, PIXEL_DATA, b"OW", &u16s(&[0, 1, 2, 3, 4, 5]));

        let image = DicomDecoder::decode_bytes(&buf).unwrap();
        assert_eq!(image.shape(), &[2, 3]);
        assert_eq!(image[[0, 0]], -10.0);
        assert_eq!(image[[1, 2]], 0.0);
    }

    #[test]
    fn test_implicit_vr_8bit_skips_undefined_sequence() {
        let mut buf = preamble(IMPLICIT_VR_LE);

        // Undefined-length sequence holding one undefined-length item.
        buf.extend_from_slice(&0x0008u16.to_le_bytes());
        buf.extend_from_slice(&0x1140u16.to_le_bytes());
        buf.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
        buf.extend_from_slice(&ITEM.0.to_le_bytes());
        buf.extend_from_slice(&ITEM.1.to_le_bytes());
        buf.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
        implicit(&mut buf, (0x0008, 0x1150), b"1.2.3\0");
        buf.extend_from_slice(&ITEM_DELIMITER.0.to_le_bytes());
        buf.extend_from_slice(&ITEM_DELIMITER.1.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&SEQUENCE_DELIMITER.0.to_le_bytes());
        buf.extend_from_slice(&SEQUENCE_DELIMITER.1.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        implicit(&mut buf, ROWS, &2u16.to_le_bytes());
        implicit(&mut buf, COLUMNS, &2u16.to_le_bytes());
        implicit(&mut buf, BITS_ALLOCATED, &8u16.to_le_bytes());
        implicit(&mut buf, PHOTOMETRIC, b"MONOCHROME1 ");
        implicit(&mut buf, PIXEL_DATA, &[0, 10, 20, 30]);

        let image = DicomDecoder::decode_bytes(&buf).unwrap();
        assert_eq!(image.shape(), &[2, 2]);
        // Inverted: 0 <-> 30.
        assert_eq!(image[[0, 0]], 30.0);
        assert_eq!(image[[1, 1]], 0.0);
    }

    #[test]
    fn test_compressed_syntax_is_unsupported() {
        let buf = preamble("1.2.840.10008.1.2.4.50");
        assert!(matches!(
            DicomDecoder::decode_bytes(&buf),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_missing_prefix_and_truncation_are_malformed() {
        assert!(matches!(
            DicomDecoder::decode_bytes(&[0u8; 64]),
            Err(DecodeError::Malformed { .. })
        ));

        let mut buf = preamble(EXPLICIT_VR_LE);
        explicit(&mut buf, ROWS, b"US", &4u16.to_le_bytes());
        explicit(&mut buf, COLUMNS, b"US", &4u16.to_le_bytes());
        explicit(&mut buf, PIXEL_DATA, b"OW", &u16s(&[1, 2, 3]));
        assert!(matches!(
            DicomDecoder::decode_bytes(&buf),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_huge_frame_count_is_malformed() {
        let mut buf = preamble(EXPLICIT_VR_LE);
        explicit(&mut buf, NUMBER_OF_FRAMES, b"IS", b"99999999999999");
        explicit(&mut buf, ROWS, b"US", &65535u16.to_le_bytes());
        explicit(&mut buf, COLUMNS, b"US", &65535u16.to_le_bytes());
        explicit(&mut buf, PIXEL_DATA, b"OW", &u16s(&[1, 2]));
        match DicomDecoder::decode_bytes(&buf) {
            Err(DecodeError::Malformed { reason, .. }) => assert!(reason.contains("overflows")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_deeply_nested_sequences_are_malformed() {
        let mut buf = preamble(IMPLICIT_VR_LE);
        let open_sequence = |buf: &mut Vec<u8>| {
            buf.extend_from_slice(&0x0008u16.to_le_bytes());
            buf.extend_from_slice(&0x1140u16.to_le_bytes());
            buf.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
            buf.extend_from_slice(&ITEM.0.to_le_bytes());
            buf.extend_from_slice(&ITEM.1.to_le_bytes());
            buf.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
        };
        for _ in 0..10_000 {
            open_sequence(&mut buf);
        }
        match DicomDecoder::decode_bytes(&buf) {
            Err(DecodeError::Malformed { reason, .. }) => assert!(reason.contains("nested")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }
}
