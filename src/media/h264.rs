//! H.264 Annex-B helpers
//!
//! Relay frames carry H.264 in Annex-B form: each NAL unit is preceded by a
//! start code (`00 00 00 01`, or the 3-byte `00 00 01` variant).
//!
//! ```text
//! +-------------+-----------+-------------+-----------+-----
//! | 00 00 00 01 | NAL (SPS) | 00 00 00 01 | NAL (PPS) | ...
//! +-------------+-----------+-------------+-----------+-----
//! ```
//!
//! NAL header byte: `forbidden_zero_bit (1) | nal_ref_idc (2) | nal_unit_type (5)`.

use bytes::{BufMut, Bytes, BytesMut};

/// 4-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }

    /// Whether this NAL carries coded picture data
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SlicePartA
                | NaluType::SlicePartB
                | NaluType::SlicePartC
                | NaluType::Idr
        )
    }

    /// Whether this NAL opens a new access unit once the current one holds a picture.
    ///
    /// `nalu` is the whole NAL unit, header included. A slice only opens a unit
    /// when it is the first slice of its picture (`first_mb_in_slice == 0`).
    fn starts_access_unit(&self, nalu: &[u8]) -> bool {
        match self {
            NaluType::Aud | NaluType::Sps | NaluType::Pps | NaluType::Sei => true,
            NaluType::Slice | NaluType::SlicePartA | NaluType::Idr => first_mb_is_zero(nalu),
            _ => false,
        }
    }
}

/// `first_mb_in_slice` is the first ue(v) after the header; it is 0 exactly
/// when its leading bit is set. A slice with no payload counts as a first slice.
fn first_mb_is_zero(nalu: &[u8]) -> bool {
    nalu.get(1).map_or(true, |b| b & 0x80 != 0)
}

/// Locate the next start code at or after `from`.
///
/// Returns `(code_begin, nal_begin)`; a zero byte directly before a 3-byte code
/// is treated as part of a 4-byte code.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let begin = if i > from && data[i - 1] == 0 { i - 1 } else { i };
            return Some((begin, i + 3));
        }
        i += 1;
    }
    None
}

/// Iterator over the NAL units of an Annex-B byte stream (start codes stripped)
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, nal_begin) = find_start_code(self.data, self.offset)?;
            let end = find_start_code(self.data, nal_begin)
                .map(|(begin, _)| begin)
                .unwrap_or(self.data.len());
            self.offset = end;

            if end > nal_begin {
                return Some(&self.data[nal_begin..end]);
            }
        }
    }
}

/// Type of the first NAL unit in an Annex-B payload
pub fn first_nalu_type(data: &[u8]) -> Option<NaluType> {
    NaluIterator::new(data)
        .next()
        .and_then(|nalu| NaluType::from_byte(nalu[0]))
}

/// Check if an access unit lets a decoder start: an IDR slice or a leading SPS
pub fn is_keyframe(data: &[u8]) -> bool {
    NaluIterator::new(data).any(|nalu| {
        matches!(
            NaluType::from_byte(nalu[0]),
            Some(NaluType::Idr) | Some(NaluType::Sps)
        )
    })
}

/// First NAL unit of the given type, without its start code
pub fn find_nalu(data: &[u8], kind: NaluType) -> Option<&[u8]> {
    NaluIterator::new(data).find(|nalu| NaluType::from_byte(nalu[0]) == Some(kind))
}

/// Check that a payload begins with the 4-byte start code
pub fn has_start_code(data: &[u8]) -> bool {
    data.starts_with(&START_CODE)
}

/// Rewrite a leading 3-byte start code into the 4-byte form
pub fn normalize_start_code(data: Bytes) -> Bytes {
    if has_start_code(&data) || !data.starts_with(&START_CODE[1..]) {
        return data;
    }

    let mut buf = BytesMut::with_capacity(data.len() + 1);
    buf.put_u8(0x00);
    buf.put_slice(&data);
    buf.freeze()
}

/// Split an Annex-B byte stream into access units.
///
/// A new unit starts at an AUD, parameter set, SEI or the first slice of a
/// picture once the current unit already holds a picture. Further slices of
/// the same picture stay in its unit. Units share memory with `data`.
pub fn split_access_units(data: &Bytes) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut unit_start: Option<usize> = None;
    let mut has_picture = false;
    let mut pos = 0;

    while let Some((code_begin, nal_begin)) = find_start_code(data, pos) {
        let nalu_type = data.get(nal_begin).and_then(|b| NaluType::from_byte(*b));
        let nalu = &data[nal_begin.min(data.len())..];

        if has_picture && nalu_type.map_or(false, |t| t.starts_access_unit(nalu)) {
            if let Some(start) = unit_start {
                units.push(data.slice(start..code_begin));
            }
            unit_start = Some(code_begin);
            has_picture = false;
        }

        if unit_start.is_none() {
            unit_start = Some(code_begin);
        }
        if nalu_type.map_or(false, |t| t.is_vcl()) {
            has_picture = true;
        }

        pos = nal_begin;
    }

    if let Some(start) = unit_start {
        if start < data.len() {
            units.push(data.slice(start..));
        }
    }

    units
}
