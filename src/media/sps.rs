//! H.264 sequence parameter set parsing
//!
//! Only the fields the relay needs are kept: profile/level for FMTP, picture
//! dimensions (corrected for frame cropping) and the VUI frame rate.
//!
//! Reference: ITU-T H.264 7.3.2.1.1 (SPS syntax) and E.1.1 (VUI syntax).

use crate::error::MediaError;

use super::h264::NaluType;

/// Profiles that carry chroma format and bit depth fields
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Extended_SAR marker in `aspect_ratio_idc`
const EXTENDED_SAR: u32 = 255;

/// Parsed sequence parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    /// Picture width in pixels after cropping
    pub width: u32,
    /// Picture height in pixels after cropping
    pub height: u32,
    /// Frame rate from VUI timing info, when present
    pub fps: Option<u32>,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (header byte included, start code stripped)
    pub fn parse(nalu: &[u8]) -> Result<Self, MediaError> {
        let header = *nalu.first().ok_or(MediaError::Truncated)?;
        if NaluType::from_byte(header) != Some(NaluType::Sps) {
            return Err(MediaError::UnexpectedNalType(header & 0x1F));
        }

        let rbsp = to_rbsp(&nalu[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        let level_idc = r.read_bits(8)? as u8;
        let _seq_parameter_set_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()? == 1;
            }
            let _bit_depth_luma_minus8 = r.read_ue()?;
            let _bit_depth_chroma_minus8 = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_bit()?;
            if r.read_bit()? == 1 {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_bit()? == 1 {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num_minus4 = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    let _offset_for_ref_frame = r.read_se()?;
                }
            }
            _ => {}
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_bit()?;
        let pic_width_in_mbs = r.read_ue()?.saturating_add(1);
        let pic_height_in_map_units = r.read_ue()?.saturating_add(1);
        let frame_mbs_only = r.read_bit()?;
        if frame_mbs_only == 0 {
            let _mb_adaptive_frame_field = r.read_bit()?;
        }
        let _direct_8x8_inference = r.read_bit()?;

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? == 1 {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        // Timing info is optional; a truncated VUI still leaves usable dimensions
        let fps = if r.read_bit().unwrap_or(0) == 1 {
            parse_vui_fps(&mut r).ok().flatten()
        } else {
            None
        };

        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            0 => (1, 2 - frame_mbs_only),
            1 => (2, 2 * (2 - frame_mbs_only)),
            2 => (2, 2 - frame_mbs_only),
            _ => (1, 2 - frame_mbs_only),
        };

        let width = cropped_size(pic_width_in_mbs, 1, crop_unit_x, crop_left, crop_right)
            .ok_or(MediaError::OutOfRange("pic_width_in_mbs"))?;
        let height = cropped_size(
            pic_height_in_map_units,
            2 - frame_mbs_only,
            crop_unit_y,
            crop_top,
            crop_bottom,
        )
        .ok_or(MediaError::OutOfRange("pic_height_in_map_units"))?;

        Ok(SpsInfo {
            profile_idc,
            constraint_flags,
            level_idc,
            chroma_format_idc,
            width,
            height,
            fps,
        })
    }

    /// `profile-level-id` as used in SDP fmtp lines
    pub fn profile_level_id(&self) -> String {
        format!(
            "{:02X}{:02X}{:02X}",
            self.profile_idc, self.constraint_flags, self.level_idc
        )
    }
}

/// Luma samples along one axis after cropping; `None` if the fields overflow
fn cropped_size(units: u32, scale: u32, crop_unit: u32, crop_a: u32, crop_b: u32) -> Option<u32> {
    let full = units.checked_mul(scale)?.checked_mul(16)?;
    let crop = crop_a.checked_add(crop_b)?.checked_mul(crop_unit)?;
    Some(full.saturating_sub(crop))
}

/// Skip VUI fields up to timing info and derive the frame rate
fn parse_vui_fps(r: &mut BitReader<'_>) -> Result<Option<u32>, MediaError> {
    if r.read_bit()? == 1 {
        if r.read_bits(8)? == EXTENDED_SAR {
            r.skip_bits(32)?;
        }
    }
    if r.read_bit()? == 1 {
        r.skip_bits(1)?;
    }
    if r.read_bit()? == 1 {
        r.skip_bits(4)?;
        if r.read_bit()? == 1 {
            r.skip_bits(24)?;
        }
    }
    if r.read_bit()? == 1 {
        let _top = r.read_ue()?;
        let _bottom = r.read_ue()?;
    }
    if r.read_bit()? == 0 {
        return Ok(None);
    }

    let num_units_in_tick = r.read_bits(32)?;
    let time_scale = r.read_bits(32)?;
    if num_units_in_tick == 0 {
        return Ok(None);
    }

    let fps = u64::from(time_scale) / (2 * u64::from(num_units_in_tick));
    Ok((fps > 0).then_some(fps as u32))
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<(), MediaError> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (i64::from(last_scale) + i64::from(delta)).rem_euclid(256) as i32;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Strip emulation prevention bytes (`00 00 03` -> `00 00`)
fn to_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_bit(&mut self) -> Result<u32, MediaError> {
        let byte = self.data.get(self.pos / 8).ok_or(MediaError::Truncated)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    /// Read up to 32 bits
    pub fn read_bits(&mut self, n: u32) -> Result<u32, MediaError> {
        let mut value: u64 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), MediaError> {
        if self.pos + n > self.data.len() * 8 {
            return Err(MediaError::Truncated);
        }
        self.pos += n;
        Ok(())
    }

    /// Unsigned Exp-Golomb `ue(v)`
    pub fn read_ue(&mut self) -> Result<u32, MediaError> {
        let mut leading_zeros = 0;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::InvalidExpGolomb);
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Signed Exp-Golomb `se(v)`
    pub fn read_se(&mut self) -> Result<i32, MediaError> {
        let k = self.read_ue()? as i64;
        let value = if k & 1 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }
}
