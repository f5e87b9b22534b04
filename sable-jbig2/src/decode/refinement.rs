//! Generic refinement region decoding (6.3) and its segment form (7.4.7).

use crate::arith::{ArithContext, ArithDecoder, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::decode::{
    AdaptivePixel, RefinementTemplate, RegionInfo, parse_adaptive_pixels, parse_region_info,
};
use crate::error::{
    DecoderInternal, MalformedHeader, OutOfRange, Result, Truncated, Unsupported, bail,
};
use crate::reader::Reader;

/// Parameters of the refinement decoding procedure (Table 6).
pub(crate) struct RefinementParams<'a> {
    /// "GRTEMPLATE"
    pub(crate) template: RefinementTemplate,
    /// "GRAT" - two adaptive offsets, used by template 0 only.
    pub(crate) adaptive: &'a [AdaptivePixel],
    /// "GRREFERENCE" - the bitmap being refined.
    pub(crate) reference: &'a Bitmap,
    /// "GRREFERENCEDX"/"GRREFERENCEDY": the reference pixel for output
    /// `(x, y)` is `(x - dx, y - dy)`.
    pub(crate) dx: i32,
    pub(crate) dy: i32,
}

/// A decoded refinement region segment.
pub(crate) struct RefinementRegion {
    pub(crate) info: RegionInfo,
    pub(crate) bitmap: Bitmap,
}

/// Decode a generic refinement region segment's data part (7.4.7).
///
/// "If there are no referred-to segments, then use the page bitmap as the
/// reference buffer." (7.4.7.5) - and segments referring to intermediate
/// regions are rejected before reaching this point, so the reference is
/// always the page, offset by the region's own location.
pub(crate) fn decode_segment(reader: &mut Reader<'_>, page: &Bitmap) -> Result<RefinementRegion> {
    let info = parse_region_info(reader)?;

    // The region must lie inside the page for the reference offsets to make
    // sense; page composition performs the same check before compositing.
    if (info.x as u64) + (info.width as u64) > page.width() as u64
        || (info.y as u64) + (info.height as u64) > page.height() as u64
    {
        bail!(OutOfRange::RegionOutsidePage);
    }
    let dx = -i32::try_from(info.x).map_err(|_| DecoderInternal::ValueOverflow)?;
    let dy = -i32::try_from(info.y).map_err(|_| DecoderInternal::ValueOverflow)?;

    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let template = RefinementTemplate::from_bit(flags);

    // "Bit 1: TPGRON" (7.4.7.2). Refinement rows predicted from the
    // reference are not implemented; reject rather than mis-decode.
    if flags & 0x02 != 0 {
        bail!(Unsupported::RefinementTypicalPrediction);
    }
    if flags & 0xFC != 0 {
        bail!(MalformedHeader::ReservedBits);
    }

    let adaptive = if template == RefinementTemplate::Template0 {
        let pixels = parse_adaptive_pixels(reader, 2)?;
        for pixel in &pixels {
            pixel.validate()?;
        }
        pixels
    } else {
        Vec::new()
    };

    let data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;
    let mut decoder = ArithDecoder::new(data);
    let mut contexts = fresh_contexts(1 << template.context_bits());

    let mut bitmap = Bitmap::new(info.width, info.height)?;
    let params = RefinementParams {
        template,
        adaptive: &adaptive,
        reference: page,
        dx,
        dy,
    };
    decode_into(&mut bitmap, &mut decoder, &mut contexts, &params)?;

    Ok(RefinementRegion { info, bitmap })
}

/// Decode a refinement bitmap (6.3.5.6, with TPGRON = 0).
pub(crate) fn decode_into(
    bitmap: &mut Bitmap,
    decoder: &mut ArithDecoder<'_>,
    contexts: &mut [ArithContext],
    params: &RefinementParams<'_>,
) -> Result<()> {
    for y in 0..bitmap.height() {
        for x in 0..bitmap.width() {
            let context = gather_context(bitmap, x, y, params);
            let pixel = decoder.decode_bit(&mut contexts[context as usize]);
            if pixel != 0 {
                bitmap.set(x, y, true);
            }
        }
    }

    Ok(())
}

/// Compute the refinement context for the pixel at `(x, y)` (6.3.5.3).
///
/// The high bits come from already-decoded output pixels, the low bits from
/// the 3x3 reference neighbourhood centred on `(x - dx, y - dy)`.
fn gather_context(bitmap: &Bitmap, x: u32, y: u32, params: &RefinementParams<'_>) -> u32 {
    let (x, y) = (x as i32, y as i32);
    let (rx, ry) = (x - params.dx, y - params.dy);
    let out = |dx: i32, dy: i32| bitmap.fetch(x + dx, y + dy);
    let reference = |dx: i32, dy: i32| params.reference.fetch(rx + dx, ry + dy);

    match params.template {
        // Figure 12: 13 pixels, with one adaptive tap in the output and one
        // in the reference.
        RefinementTemplate::Template0 => {
            let a1 = params.adaptive[0];
            let a2 = params.adaptive[1];

            (bitmap.fetch(x + a1.x, y + a1.y) << 12)
                | (out(0, -1) << 11)
                | (out(1, -1) << 10)
                | (out(-1, 0) << 9)
                | (params.reference.fetch(rx + a2.x, ry + a2.y) << 8)
                | (reference(0, -1) << 7)
                | (reference(1, -1) << 6)
                | (reference(-1, 0) << 5)
                | (reference(0, 0) << 4)
                | (reference(1, 0) << 3)
                | (reference(-1, 1) << 2)
                | (reference(0, 1) << 1)
                | reference(1, 1)
        }
        // Figure 13: 10 pixels, no adaptive taps.
        RefinementTemplate::Template1 => {
            (out(-1, -1) << 9)
                | (out(0, -1) << 8)
                | (out(1, -1) << 7)
                | (out(-1, 0) << 6)
                | (reference(0, -1) << 5)
                | (reference(-1, 0) << 4)
                | (reference(0, 0) << 3)
                | (reference(1, 0) << 2)
                | (reference(0, 1) << 1)
                | reference(1, 1)
        }
    }
}
