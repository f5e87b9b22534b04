//! Pattern dictionary decoding (6.7, 7.4.4).

use crate::arith::{ArithDecoder, fresh_contexts};
use crate::bitmap::{Bitmap, SharedBitmap};
use crate::decode::generic::{GenericParams, decode_into, decode_mmr_into};
use crate::decode::{AdaptivePixel, Template};
use crate::error::{DecodeError, DecoderInternal, MalformedHeader, Result, Truncated, bail};
use crate::reader::Reader;

/// A decoded pattern dictionary: `gray_max + 1` patterns of one size.
pub(crate) struct PatternSet {
    pub(crate) patterns: Vec<SharedBitmap>,
    pub(crate) pattern_width: u32,
    pub(crate) pattern_height: u32,
}

/// Decode a pattern dictionary segment's data part (7.4.4, 6.7.5).
pub(crate) fn decode_segment(reader: &mut Reader<'_>) -> Result<PatternSet> {
    // 7.4.4.1.1: flags byte - HDMMR, HDTEMPLATE, reserved bits.
    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let mmr = flags & 0x01 != 0;
    let template = Template::from_bits(flags >> 1);
    if flags & 0xF8 != 0 {
        bail!(MalformedHeader::ReservedBits);
    }

    let pattern_width = reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as u32;
    let pattern_height = reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as u32;
    if pattern_width == 0 || pattern_height == 0 {
        bail!(MalformedHeader::WrongSegmentSize);
    }
    let gray_max = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    let pattern_count = gray_max
        .checked_add(1)
        .ok_or(DecodeError::DecoderInternal(DecoderInternal::ValueOverflow))?;

    // "1) Create a bitmap B_HDC. The width of the bitmap is
    // (GRAYMAX + 1) x HDPW. This bitmap contains all the patterns
    // concatenated left to right." (6.7.5)
    let collective_width = pattern_count
        .checked_mul(pattern_width)
        .ok_or(DecodeError::DecoderInternal(DecoderInternal::ValueOverflow))?;
    let mut collective = Bitmap::new(collective_width, pattern_height)?;

    let data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;

    if mmr {
        decode_mmr_into(&mut collective, data)?;
    } else {
        // Table 27: GBAT1 = (-HDPW, 0); the remaining template 0 taps are
        // fixed.
        let adaptive = [
            AdaptivePixel::new(-(pattern_width as i32), 0),
            AdaptivePixel::new(-3, -1),
            AdaptivePixel::new(2, -2),
            AdaptivePixel::new(-2, -2),
        ];
        let params = GenericParams {
            template,
            adaptive: &adaptive[..template.adaptive_pixel_count()],
            typical_prediction: false,
            skip: None,
        };

        let mut decoder = ArithDecoder::new(data);
        let mut contexts = fresh_contexts(1 << template.context_bits());
        decode_into(&mut collective, &mut decoder, &mut contexts, &params)?;
    }

    // "4) While GRAY <= GRAYMAX: let B_P be the subimage consisting of
    // columns HDPW x GRAY through HDPW x (GRAY + 1) - 1." (6.7.5)
    let mut patterns = Vec::with_capacity(pattern_count as usize);
    for gray in 0..pattern_count {
        let pattern =
            collective.sub_bitmap(gray * pattern_width, 0, pattern_width, pattern_height)?;
        patterns.push(SharedBitmap::new(pattern));
    }

    Ok(PatternSet {
        patterns,
        pattern_width,
        pattern_height,
    })
}
