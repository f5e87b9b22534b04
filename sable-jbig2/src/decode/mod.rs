//! Region decoding procedures and the fields they share.

pub(crate) mod generic;
pub(crate) mod halftone;
pub(crate) mod pattern;
pub(crate) mod refinement;
pub(crate) mod symbol;
pub(crate) mod text;

use crate::error::{MalformedHeader, OutOfRange, Result, Truncated, Unsupported, bail, err};
use crate::reader::Reader;

/// "These operators describe how the segment's bitmap is to be combined with
/// the page bitmap." (7.4.1.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombinationOperator {
    Or,
    And,
    Xor,
    Xnor,
    Replace,
}

impl CombinationOperator {
    /// The full five-operator set of region segment flags.
    pub(crate) fn from_region_bits(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::Xor,
            3 => Self::Xnor,
            4 => Self::Replace,
            _ => return err!(MalformedHeader::InvalidCombinationOperator),
        })
    }

    /// The two-bit sets used by page defaults, text regions and halftone
    /// regions, which exclude REPLACE.
    pub(crate) fn from_two_bits(value: u8) -> Self {
        match value & 3 {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::Xor,
            _ => Self::Xnor,
        }
    }
}

/// Template used for generic region coding (6.2.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Template {
    /// Figure 3: 16 context pixels, 4 of them adaptive.
    Template0,
    /// Figure 4: 13 context pixels, 1 adaptive.
    Template1,
    /// Figure 5: 10 context pixels, 1 adaptive.
    Template2,
    /// Figure 6: 10 context pixels (one row), 1 adaptive.
    Template3,
}

impl Template {
    pub(crate) fn from_bits(value: u8) -> Self {
        match value & 3 {
            0 => Self::Template0,
            1 => Self::Template1,
            2 => Self::Template2,
            _ => Self::Template3,
        }
    }

    pub(crate) fn context_bits(self) -> usize {
        match self {
            Self::Template0 => 16,
            Self::Template1 => 13,
            Self::Template2 | Self::Template3 => 10,
        }
    }

    pub(crate) fn adaptive_pixel_count(self) -> usize {
        match self {
            Self::Template0 => 4,
            _ => 1,
        }
    }
}

/// Template used for refinement coding (6.3.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefinementTemplate {
    /// Figure 12: 13 context pixels, 2 adaptive.
    Template0,
    /// Figure 13: 10 context pixels.
    Template1,
}

impl RefinementTemplate {
    pub(crate) fn from_bit(value: u8) -> Self {
        if value & 1 == 0 {
            Self::Template0
        } else {
            Self::Template1
        }
    }

    pub(crate) fn context_bits(self) -> usize {
        match self {
            Self::Template0 => 13,
            Self::Template1 => 10,
        }
    }
}

/// A signed adaptive template offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdaptivePixel {
    pub(crate) x: i32,
    pub(crate) y: i32,
}

impl AdaptivePixel {
    pub(crate) const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// "Figure 7 - Field to which AT pixel locations are restricted": at or
    /// above the current row, and strictly left of the pixel on its own row.
    pub(crate) fn validate(self) -> Result<()> {
        if self.y > 0 || (self.y == 0 && self.x > -1) {
            bail!(OutOfRange::AdaptivePixel);
        }
        Ok(())
    }
}

/// Read `count` adaptive template pixel pairs (7.4.6.3).
pub(crate) fn parse_adaptive_pixels(
    reader: &mut Reader<'_>,
    count: usize,
) -> Result<Vec<AdaptivePixel>> {
    let mut pixels = Vec::with_capacity(count);
    for _ in 0..count {
        let x = reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as i8;
        let y = reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as i8;
        pixels.push(AdaptivePixel::new(x as i32, y as i32));
    }
    Ok(pixels)
}

/// Parsed region segment information field (7.4.1).
#[derive(Debug, Clone)]
pub(crate) struct RegionInfo {
    /// "This four-byte field gives the width in pixels of the bitmap encoded
    /// in this segment." (7.4.1.1)
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Offsets of the region within the page bitmap (7.4.1.3, 7.4.1.4).
    pub(crate) x: u32,
    pub(crate) y: u32,
    /// "Bits 0-2: External combination operator." (7.4.1.5)
    pub(crate) operator: CombinationOperator,
}

/// Parse the 17-byte region segment information field (7.4.1).
pub(crate) fn parse_region_info(reader: &mut Reader<'_>) -> Result<RegionInfo> {
    let width = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let height = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let x = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let y = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let operator = CombinationOperator::from_region_bits(flags & 0x07)?;

    // "Bit 3: Colour extension flag (COLEXTFLAG)." (7.4.1.5)
    if flags & 0x08 != 0 {
        bail!(Unsupported::Colour);
    }
    // "Bits 4-7: Reserved; must be 0."
    if flags & 0xF0 != 0 {
        bail!(MalformedHeader::ReservedBits);
    }

    Ok(RegionInfo {
        width,
        height,
        x,
        y,
        operator,
    })
}
