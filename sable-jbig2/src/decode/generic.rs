//! Generic region decoding (6.2) and the generic region segment (7.4.6).

use crate::arith::{ArithContext, ArithDecoder, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::decode::{
    AdaptivePixel, RegionInfo, Template, parse_adaptive_pixels, parse_region_info,
};
use crate::error::{
    DecoderInternal, MalformedHeader, Result, Truncated, Unsupported, bail,
};
use crate::reader::Reader;

/// Parameters of the generic region decoding procedure (Table 2).
pub(crate) struct GenericParams<'a> {
    /// "GBTEMPLATE"
    pub(crate) template: Template,
    /// "GBAT" - adaptive template offsets, 4 for template 0, 1 otherwise.
    pub(crate) adaptive: &'a [AdaptivePixel],
    /// "TPGDON" - typical prediction for generic direct coding.
    pub(crate) typical_prediction: bool,
    /// "USESKIP"/"SKIP" - pixels to force to 0 without decoding.
    pub(crate) skip: Option<&'a Bitmap>,
}

/// A decoded generic region segment.
pub(crate) struct GenericRegion {
    pub(crate) info: RegionInfo,
    pub(crate) bitmap: Bitmap,
}

/// Decode a generic region segment's data part (7.4.6).
///
/// `unknown_length` marks a segment whose header carried 0xFFFFFFFF; its data
/// then ends with the marker sequence and a four-byte decoded-row count
/// (7.4.6.4).
pub(crate) fn decode_segment(reader: &mut Reader<'_>, unknown_length: bool) -> Result<GenericRegion> {
    let mut info = parse_region_info(reader)?;

    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let mmr = flags & 0x01 != 0;
    let template = Template::from_bits(flags >> 1);
    let typical_prediction = flags & 0x08 != 0;

    // "Bit 4: EXTTEMPLATE" (7.4.6.2)
    if flags & 0x10 != 0 {
        bail!(Unsupported::ExtendedTemplate);
    }
    if flags & 0xE0 != 0 {
        bail!(MalformedHeader::ReservedBits);
    }
    // "If MMR is 1 then this field must contain the value zero." (7.4.6.2)
    if mmr && template != Template::Template0 {
        bail!(MalformedHeader::ReservedBits);
    }

    let adaptive = if mmr {
        Vec::new()
    } else {
        let pixels = parse_adaptive_pixels(reader, template.adaptive_pixel_count())?;
        for pixel in &pixels {
            pixel.validate()?;
        }
        pixels
    };

    let mut data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;

    if unknown_length {
        // "It also indicates the height of the generic region, i.e. the
        // number of rows that have been decoded in this segment; it must be
        // no greater than the region segment bitmap height." (7.4.6.4)
        if data.len() < 4 {
            bail!(Truncated::UnexpectedEnd);
        }
        let (coded, trailer) = data.split_at(data.len() - 4);
        let decoded_rows = u32::from_be_bytes(trailer.try_into().unwrap());
        if decoded_rows > info.height {
            bail!(DecoderInternal::ValueOverflow);
        }
        info.height = decoded_rows;
        data = coded;
    }

    let mut bitmap = Bitmap::new(info.width, info.height)?;

    if mmr {
        decode_mmr_into(&mut bitmap, data)?;
    } else {
        let mut decoder = ArithDecoder::new(data);
        let mut contexts = fresh_contexts(1 << template.context_bits());
        let params = GenericParams {
            template,
            adaptive: &adaptive,
            typical_prediction,
            skip: None,
        };
        decode_into(&mut bitmap, &mut decoder, &mut contexts, &params)?;
    }

    Ok(GenericRegion { info, bitmap })
}

/// Decode a bitmap with a template and arithmetic coding (6.2.5).
///
/// The caller owns the decoder and context vector so that procedures which
/// decode several bitmaps from one stream (symbol dictionaries, grayscale
/// bitplanes) can share adaptation state.
pub(crate) fn decode_into(
    bitmap: &mut Bitmap,
    decoder: &mut ArithDecoder<'_>,
    contexts: &mut [ArithContext],
    params: &GenericParams<'_>,
) -> Result<()> {
    if let Some(skip) = params.skip {
        if skip.width() != bitmap.width() || skip.height() != bitmap.height() {
            bail!(DecoderInternal::ValueOverflow);
        }
    }
    debug_assert_eq!(params.adaptive.len(), params.template.adaptive_pixel_count());

    // "1) Set: LTP = 0" (6.2.5.7)
    let mut ltp = false;

    for y in 0..bitmap.height() {
        // "b) If TPGDON is 1, then decode a bit using the arithmetic entropy
        // coder [with the context of Figures 8-11]. Let SLTP be the value of
        // this bit. Set: LTP = LTP XOR SLTP" (6.2.5.7)
        if params.typical_prediction {
            let sltp_context = match params.template {
                Template::Template0 => 0b1001_1011_0010_0101,
                Template::Template1 => 0b0_0111_1001_0101,
                Template::Template2 => 0b00_1110_0101,
                Template::Template3 => 0b01_1001_0101,
            };
            let sltp = decoder.decode_bit(&mut contexts[sltp_context]);
            ltp ^= sltp != 0;
        }

        // "c) If LTP = 1 then set every pixel of the current row of GBREG
        // equal to the corresponding pixel of the row immediately above."
        // (6.2.5.7)
        if ltp {
            if y > 0 {
                bitmap.copy_row(y - 1, y);
            }
            continue;
        }

        // "d) If LTP = 0 then, from left to right, decode each pixel of the
        // current row." (6.2.5.7)
        for x in 0..bitmap.width() {
            if let Some(skip) = params.skip {
                if skip.get(x, y) {
                    continue;
                }
            }

            let context = gather_context(bitmap, x, y, params.template, params.adaptive);
            let pixel = decoder.decode_bit(&mut contexts[context as usize]);
            if pixel != 0 {
                bitmap.set(x, y, true);
            }
        }
    }

    Ok(())
}

/// Compute the context value for the pixel at `(x, y)` (6.2.5.3, 6.2.5.4).
///
/// Bits are packed in raster order of the template figures, top row first,
/// leftmost pixel in the most significant position.
pub(crate) fn gather_context(
    bitmap: &Bitmap,
    x: u32,
    y: u32,
    template: Template,
    adaptive: &[AdaptivePixel],
) -> u32 {
    let (x, y) = (x as i32, y as i32);
    let p = |dx: i32, dy: i32| bitmap.fetch(x + dx, y + dy);
    let a = |i: usize| bitmap.fetch(x + adaptive[i].x, y + adaptive[i].y);

    match template {
        // Figure 3 (16 pixels; A1 trails row -1, A2..A4 float higher).
        Template::Template0 => {
            (a(3) << 15)
                | (p(-1, -2) << 14)
                | (p(0, -2) << 13)
                | (p(1, -2) << 12)
                | (a(2) << 11)
                | (a(1) << 10)
                | (p(-2, -1) << 9)
                | (p(-1, -1) << 8)
                | (p(0, -1) << 7)
                | (p(1, -1) << 6)
                | (p(2, -1) << 5)
                | (a(0) << 4)
                | (p(-4, 0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        // Figure 4 (13 pixels).
        Template::Template1 => {
            (p(-1, -2) << 12)
                | (p(0, -2) << 11)
                | (p(1, -2) << 10)
                | (p(2, -2) << 9)
                | (p(-2, -1) << 8)
                | (p(-1, -1) << 7)
                | (p(0, -1) << 6)
                | (p(1, -1) << 5)
                | (p(2, -1) << 4)
                | (a(0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        // Figure 5 (10 pixels).
        Template::Template2 => {
            (p(-1, -2) << 9)
                | (p(0, -2) << 8)
                | (p(1, -2) << 7)
                | (p(-2, -1) << 6)
                | (p(-1, -1) << 5)
                | (p(0, -1) << 4)
                | (p(1, -1) << 3)
                | (a(0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        // Figure 6 (10 pixels, single history row).
        Template::Template3 => {
            (p(-3, -1) << 9)
                | (p(-2, -1) << 8)
                | (p(-1, -1) << 7)
                | (p(0, -1) << 6)
                | (p(1, -1) << 5)
                | (a(0) << 4)
                | (p(-4, 0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
    }
}

/// Decode an MMR-coded bitmap (6.2.6) and return the consumed byte count.
///
/// "An invocation of the generic region decoding procedure with MMR equal to
/// 1 shall consume an integral number of bytes, beginning and ending on a
/// byte boundary." (6.2.6)
pub(crate) fn decode_mmr_into(bitmap: &mut Bitmap, data: &[u8]) -> Result<usize> {
    struct Sink<'a> {
        bitmap: &'a mut Bitmap,
        x: u32,
        y: u32,
    }

    impl sable_ccitt::RowSink for Sink<'_> {
        fn push_run(&mut self, black: bool, run: u32) {
            // CCITT white runs map to 0 pixels, already the buffer default.
            if black {
                self.bitmap.fill_run(self.x, self.y, run, true);
            }
            self.x += run;
        }

        fn end_row(&mut self) {
            self.x = 0;
            self.y += 1;
        }
    }

    let settings = sable_ccitt::Settings {
        columns: bitmap.width(),
        rows: bitmap.height(),
        // "If the number of bytes is known in advance, it is permissible for
        // the data stream not to contain an EOFB" (6.2.6) - but it may.
        end_of_block: true,
    };

    let mut sink = Sink { bitmap, x: 0, y: 0 };
    sable_ccitt::decode(data, &mut sink, &settings).map_err(|error| match error {
        sable_ccitt::DecodeError::UnexpectedEof => Truncated::UnexpectedEnd.into(),
        _ => DecoderInternal::MmrData.into(),
    })
}
