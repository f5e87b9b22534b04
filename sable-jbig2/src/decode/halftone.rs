//! Halftone region decoding (6.6, 7.4.5).

use crate::bitmap::Bitmap;
use crate::decode::pattern::PatternSet;
use crate::decode::{CombinationOperator, RegionInfo, Template, parse_region_info};
use crate::error::{DecodeError, DecoderInternal, Result, Truncated};
use crate::grayscale::{GrayScaleParams, decode_gray_scale};
use crate::reader::Reader;

/// A decoded halftone region segment.
pub(crate) struct HalftoneRegion {
    pub(crate) info: RegionInfo,
    pub(crate) bitmap: Bitmap,
}

/// Parsed halftone region segment data header (7.4.5.1).
struct HalftoneHeader {
    info: RegionInfo,
    mmr: bool,
    template: Template,
    enable_skip: bool,
    operator: CombinationOperator,
    default_pixel: bool,
    /// "HGW" / "HGH" - the grayscale grid dimensions.
    grid_width: u32,
    grid_height: u32,
    /// "HGX" / "HGY" - signed grid origin.
    grid_x: i32,
    grid_y: i32,
    /// "HRX" / "HRY" - grid vector, 256ths of a pixel.
    vector_x: u16,
    vector_y: u16,
}

fn parse_header(reader: &mut Reader<'_>) -> Result<HalftoneHeader> {
    let info = parse_region_info(reader)?;

    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let mmr = flags & 0x01 != 0;
    let template = Template::from_bits(flags >> 1);
    // "Bit 3: HENABLESKIP" (7.4.5.1.1)
    let enable_skip = flags & 0x08 != 0;
    // "Bits 4-6: HCOMBOP" (7.4.5.1.1); the full five-operator set.
    let operator = CombinationOperator::from_region_bits((flags >> 4) & 0x07)?;
    let default_pixel = flags & 0x80 != 0;

    let grid_width = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let grid_height = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let grid_x = reader.read_i32().ok_or(Truncated::UnexpectedEnd)?;
    let grid_y = reader.read_i32().ok_or(Truncated::UnexpectedEnd)?;
    let vector_x = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;
    let vector_y = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;

    Ok(HalftoneHeader {
        info,
        mmr,
        template,
        enable_skip,
        operator,
        default_pixel,
        grid_width,
        grid_height,
        grid_x,
        grid_y,
        vector_x,
        vector_y,
    })
}

/// Position of grid cell `(n, m)` in the region (6.6.5.1, 6.6.5.2):
/// `x = (HGX + m x HRY + n x HRX) >> 8`, `y = (HGY + m x HRX - n x HRY) >> 8`
/// with arithmetic shifts.
fn cell_position(header: &HalftoneHeader, m: u32, n: u32) -> Result<(i32, i32)> {
    let (m, n) = (m as i64, n as i64);
    let (rx, ry) = (header.vector_x as i64, header.vector_y as i64);

    let x = (header.grid_x as i64 + m * ry + n * rx) >> 8;
    let y = (header.grid_y as i64 + m * rx - n * ry) >> 8;

    let x = i32::try_from(x).map_err(|_| DecoderInternal::ValueOverflow)?;
    let y = i32::try_from(y).map_err(|_| DecoderInternal::ValueOverflow)?;
    Ok((x, y))
}

/// Compute the HSKIP bitmap (6.6.5.1): mark grid cells whose pattern patch
/// lies entirely outside the region.
fn compute_skip(header: &HalftoneHeader, patterns: &PatternSet) -> Result<Bitmap> {
    let mut skip = Bitmap::new(header.grid_width, header.grid_height)?;
    let (pw, ph) = (patterns.pattern_width as i64, patterns.pattern_height as i64);
    let (rw, rh) = (header.info.width as i64, header.info.height as i64);

    for m in 0..header.grid_height {
        for n in 0..header.grid_width {
            let (x, y) = cell_position(header, m, n)?;
            let (x, y) = (x as i64, y as i64);

            // "If ((x + HPW <= 0) OR (x >= HBW) OR (y + HPH <= 0) OR
            // (y >= HBH)) then set HSKIP[n, m] = 1" (6.6.5.1)
            if x + pw <= 0 || x >= rw || y + ph <= 0 || y >= rh {
                skip.set(n, m, true);
            }
        }
    }

    Ok(skip)
}

/// Decode a halftone region segment's data part (7.4.5.2, 6.6.5).
pub(crate) fn decode_segment(reader: &mut Reader<'_>, patterns: &PatternSet) -> Result<HalftoneRegion> {
    let header = parse_header(reader)?;

    // "1) Fill a bitmap HTREG, of the size given by the region segment
    // information field, with the HDEFPIXEL value." (6.6.5)
    let mut bitmap = Bitmap::filled(header.info.width, header.info.height, header.default_pixel)?;

    let skip = if header.enable_skip {
        Some(compute_skip(&header, patterns)?)
    } else {
        None
    };

    // "3) Set HBPP to ceil(log2(HNUMPATS))." (6.6.5) - zero for a
    // single-pattern dictionary, which carries no bitplanes at all.
    let bits_per_value = (patterns.patterns.len() as u32)
        .saturating_sub(1)
        .checked_ilog2()
        .map_or(0, |bits| bits + 1);

    // "4) Decode an image GI of size HGW by HGH with HBPP bits per pixel
    // using the gray-scale image decoding procedure of Annex C." (6.6.5)
    let data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;
    let gray = decode_gray_scale(
        data,
        &GrayScaleParams {
            bits_per_value,
            width: header.grid_width,
            height: header.grid_height,
            template: header.template,
            skip: skip.as_ref(),
            mmr: header.mmr,
        },
    )?;

    // "5) Place sequentially the patterns corresponding to the values in GI
    // into HTREG." (6.6.5, 6.6.5.2)
    for m in 0..header.grid_height {
        for n in 0..header.grid_width {
            let (x, y) = cell_position(&header, m, n)?;
            let index = gray[(m * header.grid_width + n) as usize] as usize;
            let pattern = patterns
                .patterns
                .get(index)
                .ok_or(DecodeError::DecoderInternal(DecoderInternal::SymbolIndex))?;

            bitmap.blit(pattern, x, y, header.operator);
        }
    }

    Ok(HalftoneRegion {
        info: header.info,
        bitmap,
    })
}
