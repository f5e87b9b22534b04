//! Text region decoding (6.4, 7.4.3).

use crate::arith::{ArithContext, ArithDecoder, fresh_contexts};
use crate::bitmap::{Bitmap, SharedBitmap};
use crate::decode::refinement::{RefinementParams, decode_into as decode_refinement};
use crate::decode::{
    AdaptivePixel, CombinationOperator, RefinementTemplate, RegionInfo, parse_adaptive_pixels,
    parse_region_info,
};
use crate::error::{
    DecodeError, DecoderInternal, MalformedHeader, Result, Truncated, Unsupported, bail,
};
use crate::huffman::{self, Code, HuffmanTable};
use crate::integer::{IdDecoder, IntDecoder};
use crate::reader::Reader;

/// A decoded text region segment.
pub(crate) struct TextRegion {
    pub(crate) info: RegionInfo,
    pub(crate) bitmap: Bitmap,
}

/// "REFCORNER" - which corner of the symbol the (S, T) coordinate anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corner {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

impl Corner {
    fn from_bits(value: u8) -> Self {
        match value & 3 {
            0 => Self::BottomLeft,
            1 => Self::TopLeft,
            2 => Self::BottomRight,
            _ => Self::TopRight,
        }
    }

    fn is_right(self) -> bool {
        matches!(self, Self::TopRight | Self::BottomRight)
    }

    fn is_bottom(self) -> bool {
        matches!(self, Self::BottomLeft | Self::BottomRight)
    }

    fn is_top(self) -> bool {
        matches!(self, Self::TopLeft | Self::TopRight)
    }
}

/// Parsed text region segment flags (7.4.3.1.1).
struct TextFlags {
    huffman: bool,
    refine: bool,
    /// "LOGSBSTRIPS"
    log_strip_size: u8,
    corner: Corner,
    transposed: bool,
    operator: CombinationOperator,
    default_pixel: bool,
    /// "SBDSOFFSET" - signed 5-bit S adjustment between instances.
    ds_offset: i32,
    refinement_template: RefinementTemplate,
}

/// Huffman table selections (7.4.3.1.2).
struct TextHuffmanFlags {
    first_s: u8,
    delta_s: u8,
    delta_t: u8,
    refinement_size: u8,
}

struct TextHeader {
    info: RegionInfo,
    flags: TextFlags,
    huffman_flags: Option<TextHuffmanFlags>,
    refinement_adaptive: Vec<AdaptivePixel>,
    /// "SBNUMINSTANCES"
    instance_count: u32,
    symbol_id_table: Option<HuffmanTable>,
}

fn parse_header(reader: &mut Reader<'_>, symbol_count: u32) -> Result<TextHeader> {
    let info = parse_region_info(reader)?;

    let word = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;
    let huffman = word & 0x0001 != 0;
    let refine = word & 0x0002 != 0;
    let log_strip_size = ((word >> 2) & 3) as u8;
    let corner = Corner::from_bits((word >> 4) as u8);
    let transposed = word & 0x0040 != 0;
    let operator = CombinationOperator::from_two_bits((word >> 7) as u8);
    let default_pixel = word & 0x0200 != 0;

    // Sign-extend the 5-bit SBDSOFFSET field.
    let ds_offset = ((word >> 10) & 0x1F) as i32;
    let ds_offset = if ds_offset >= 16 { ds_offset - 32 } else { ds_offset };

    let refinement_template = RefinementTemplate::from_bit((word >> 15) as u8);

    if huffman && refine {
        // Per-instance refinement data sizes would have to be read through
        // SBHUFFRSIZE; not implemented, reject.
        bail!(Unsupported::HuffmanRefinement);
    }

    let flags = TextFlags {
        huffman,
        refine,
        log_strip_size,
        corner,
        transposed,
        operator,
        default_pixel,
        ds_offset,
        refinement_template,
    };

    let huffman_flags = if huffman {
        let word = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;
        if word & 0x8000 != 0 {
            bail!(MalformedHeader::ReservedBits);
        }

        Some(TextHuffmanFlags {
            first_s: (word & 3) as u8,
            delta_s: ((word >> 2) & 3) as u8,
            delta_t: ((word >> 4) & 3) as u8,
            // RDW/RDH/RDX/RDY selections (bits 6-13) matter only under
            // refinement, which Huffman coding rejects above.
            refinement_size: ((word >> 14) & 1) as u8,
        })
    } else {
        None
    };

    let refinement_adaptive = if refine && refinement_template == RefinementTemplate::Template0 {
        let pixels = parse_adaptive_pixels(reader, 2)?;
        for pixel in &pixels {
            pixel.validate()?;
        }
        pixels
    } else {
        Vec::new()
    };

    let instance_count = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    let symbol_id_table = if huffman {
        Some(read_symbol_id_table(reader, symbol_count)?)
    } else {
        None
    };

    Ok(TextHeader {
        info,
        flags,
        huffman_flags,
        refinement_adaptive,
        instance_count,
        symbol_id_table,
    })
}

/// Build the symbol ID Huffman table from its run-coded lengths (7.4.3.1.7).
fn read_symbol_id_table(reader: &mut Reader<'_>, symbol_count: u32) -> Result<HuffmanTable> {
    // "Decode the 35 runcode lengths; each is coded on 4 bits."
    let mut runcode_rows = Vec::with_capacity(35);
    for runcode in 0..35 {
        let length = reader.read_bits(4).ok_or(Truncated::UnexpectedEnd)? as u8;
        runcode_rows.push(Code::value(runcode, length, 0));
    }
    let runcodes = HuffmanTable::new(runcode_rows);

    let mut lengths: Vec<u8> = Vec::with_capacity(symbol_count as usize);
    while (lengths.len() as u32) < symbol_count {
        let runcode = runcodes.decode_required(reader)?;
        match runcode {
            // A literal code length.
            0..=31 => lengths.push(runcode as u8),
            // "Repeat the previous length 3 to 6 times."
            32 => {
                let repeats = reader.read_bits(2).ok_or(Truncated::UnexpectedEnd)? + 3;
                let previous = *lengths
                    .last()
                    .ok_or(DecodeError::DecoderInternal(DecoderInternal::InvalidHuffmanCode))?;
                lengths.extend(std::iter::repeat_n(previous, repeats as usize));
            }
            // "Repeat a zero length 3 to 10 times."
            33 => {
                let repeats = reader.read_bits(3).ok_or(Truncated::UnexpectedEnd)? + 3;
                lengths.extend(std::iter::repeat_n(0, repeats as usize));
            }
            // "Repeat a zero length 11 to 138 times."
            34 => {
                let repeats = reader.read_bits(7).ok_or(Truncated::UnexpectedEnd)? + 11;
                lengths.extend(std::iter::repeat_n(0, repeats as usize));
            }
            _ => bail!(DecoderInternal::InvalidHuffmanCode),
        }
    }

    if lengths.len() as u32 != symbol_count {
        bail!(DecoderInternal::InvalidHuffmanCode);
    }

    // "Skip over any remaining bits in the last byte read."
    reader.align();

    let rows = lengths
        .iter()
        .enumerate()
        .map(|(id, &length)| Code::value(id as i32, length, 0))
        .collect();
    Ok(HuffmanTable::new(rows))
}

/// The Huffman tables a text region reads coordinates through (7.4.3.1.6).
struct TextTables<'a> {
    first_s: &'a HuffmanTable,
    delta_s: &'a HuffmanTable,
    delta_t: &'a HuffmanTable,
    symbol_ids: &'a HuffmanTable,
}

/// Resolve table selections; custom tables are consumed positionally in flag
/// order.
fn select_tables<'a>(
    flags: &TextHuffmanFlags,
    symbol_ids: &'a HuffmanTable,
    custom: &[&'a HuffmanTable],
) -> Result<TextTables<'a>> {
    let mut next_custom = 0_usize;
    let mut take_custom = || -> Result<&'a HuffmanTable> {
        let table = custom
            .get(next_custom)
            .copied()
            .ok_or(DecodeError::DecoderInternal(DecoderInternal::MissingArtifact))?;
        next_custom += 1;
        Ok(table)
    };

    let first_s = match flags.first_s {
        0 => &*huffman::TABLE_F,
        1 => &*huffman::TABLE_G,
        3 => take_custom()?,
        _ => bail!(MalformedHeader::InvalidHuffmanSelection),
    };

    let delta_s = match flags.delta_s {
        0 => &*huffman::TABLE_H,
        1 => &*huffman::TABLE_I,
        2 => &*huffman::TABLE_J,
        3 => take_custom()?,
        _ => bail!(MalformedHeader::InvalidHuffmanSelection),
    };

    let delta_t = match flags.delta_t {
        0 => &*huffman::TABLE_K,
        1 => &*huffman::TABLE_L,
        2 => &*huffman::TABLE_M,
        3 => take_custom()?,
        _ => bail!(MalformedHeader::InvalidHuffmanSelection),
    };

    // SBHUFFRSIZE would be resolved here (selection 1 consumes a custom
    // slot), but Huffman refinement is rejected during header parsing.
    let _ = flags.refinement_size;

    Ok(TextTables {
        first_s,
        delta_s,
        delta_t,
        symbol_ids,
    })
}

/// The integer decoders of arithmetic text coding, one per procedure.
struct TextDecoders {
    /// "IADT" (6.4.6)
    delta_t: IntDecoder,
    /// "IAFS" (6.4.7)
    first_s: IntDecoder,
    /// "IADS" (6.4.8)
    delta_s: IntDecoder,
    /// "IAIT" (6.4.9)
    cur_t: IntDecoder,
    /// "IAID" (6.4.10)
    ids: IdDecoder,
    /// "IARI" and the four refinement deltas (6.4.11)
    refine_flag: IntDecoder,
    refine_dw: IntDecoder,
    refine_dh: IntDecoder,
    refine_dx: IntDecoder,
    refine_dy: IntDecoder,
}

impl TextDecoders {
    fn new(id_code_length: u32) -> Self {
        Self {
            delta_t: IntDecoder::new(),
            first_s: IntDecoder::new(),
            delta_s: IntDecoder::new(),
            cur_t: IntDecoder::new(),
            ids: IdDecoder::new(id_code_length),
            refine_flag: IntDecoder::new(),
            refine_dw: IntDecoder::new(),
            refine_dh: IntDecoder::new(),
            refine_dx: IntDecoder::new(),
            refine_dy: IntDecoder::new(),
        }
    }
}

/// Entropy-coding state of one text region decode: either a Huffman bit
/// reader with its tables, or the arithmetic decoder with its contexts.
enum Coding<'a, 'data> {
    Huffman {
        reader: Reader<'data>,
        tables: TextTables<'a>,
    },
    Arithmetic {
        decoder: ArithDecoder<'data>,
        decoders: TextDecoders,
        refinement_contexts: Vec<ArithContext>,
    },
}

impl Coding<'_, '_> {
    /// 6.4.6: the strip T delta, scaled by SBSTRIPS.
    fn strip_delta_t(&mut self, strip_size: u32) -> Result<i32> {
        let value = match self {
            Self::Huffman { reader, tables } => tables.delta_t.decode_required(reader)?,
            Self::Arithmetic {
                decoder, decoders, ..
            } => decoders.delta_t.decode_required(decoder)?,
        };
        value
            .checked_mul(strip_size as i32)
            .ok_or(DecoderInternal::ValueOverflow.into())
    }

    /// 6.4.7: the first symbol instance's S delta. Never OOB.
    fn first_s(&mut self) -> Result<i32> {
        match self {
            Self::Huffman { reader, tables } => tables.first_s.decode_required(reader),
            Self::Arithmetic {
                decoder, decoders, ..
            } => decoders.first_s.decode_required(decoder),
        }
    }

    /// 6.4.8: the next S delta; OOB ends the strip.
    fn delta_s(&mut self) -> Result<Option<i32>> {
        match self {
            Self::Huffman { reader, tables } => tables.delta_s.decode(reader),
            Self::Arithmetic {
                decoder, decoders, ..
            } => decoders.delta_s.decode(decoder),
        }
    }

    /// 6.4.9: the T offset within the strip.
    fn cur_t(&mut self, strip_size: u32, log_strip_size: u8) -> Result<i32> {
        if strip_size == 1 {
            return Ok(0);
        }

        match self {
            Self::Huffman { reader, .. } => Ok(reader
                .read_bits(log_strip_size)
                .ok_or(Truncated::UnexpectedEnd)? as i32),
            Self::Arithmetic {
                decoder, decoders, ..
            } => decoders.cur_t.decode_required(decoder),
        }
    }

    /// 6.4.10: the symbol ID.
    fn symbol_id(&mut self) -> Result<usize> {
        match self {
            Self::Huffman { reader, tables } => {
                Ok(tables.symbol_ids.decode_required(reader)? as usize)
            }
            Self::Arithmetic {
                decoder, decoders, ..
            } => Ok(decoders.ids.decode(decoder) as usize),
        }
    }

    /// 6.4.11: whether this instance refines its symbol.
    fn refine_flag(&mut self) -> Result<bool> {
        match self {
            Self::Huffman { .. } => bail!(Unsupported::HuffmanRefinement),
            Self::Arithmetic {
                decoder, decoders, ..
            } => Ok(decoders.refine_flag.decode_required(decoder)? != 0),
        }
    }
}

/// Decode a text region segment's data part (7.4.3, 6.4).
pub(crate) fn decode_segment(
    reader: &mut Reader<'_>,
    symbols: &[SharedBitmap],
    custom_tables: &[&HuffmanTable],
) -> Result<TextRegion> {
    let header = parse_header(reader, symbols.len() as u32)?;

    let coding = if header.flags.huffman {
        let huffman_flags = header
            .huffman_flags
            .as_ref()
            .ok_or(DecodeError::DecoderInternal(DecoderInternal::MissingArtifact))?;
        let symbol_ids = header
            .symbol_id_table
            .as_ref()
            .ok_or(DecodeError::DecoderInternal(DecoderInternal::MissingArtifact))?;
        let tables = select_tables(huffman_flags, symbol_ids, custom_tables)?;
        Coding::Huffman {
            reader: reader.clone(),
            tables,
        }
    } else {
        let data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;
        // "SBSYMCODELEN = ceil(log2(SBNUMSYMS))" (7.4.3.1.1)
        let id_code_length = 32 - (symbols.len() as u32).saturating_sub(1).leading_zeros();
        Coding::Arithmetic {
            decoder: ArithDecoder::new(data),
            decoders: TextDecoders::new(id_code_length),
            refinement_contexts: fresh_contexts(
                1 << header.flags.refinement_template.context_bits(),
            ),
        }
    };

    let bitmap = decode_instances(coding, symbols, &header)?;

    Ok(TextRegion {
        info: header.info,
        bitmap,
    })
}

/// The instance placement loop (6.4.5).
fn decode_instances(
    mut coding: Coding<'_, '_>,
    symbols: &[SharedBitmap],
    header: &TextHeader,
) -> Result<Bitmap> {
    let flags = &header.flags;
    let mut bitmap = Bitmap::filled(header.info.width, header.info.height, flags.default_pixel)?;

    let strip_size = 1_u32 << flags.log_strip_size;

    // "1) Decode the initial STRIPT value; negate it." (6.4.5)
    let mut strip_t = coding
        .strip_delta_t(strip_size)?
        .checked_neg()
        .ok_or(DecoderInternal::ValueOverflow)?;
    let mut first_s: i32 = 0;
    let mut placed: u32 = 0;

    // "2 c) If NINSTANCES = SBNUMINSTANCES then the last strip has been
    // decoded." (6.4.5)
    while placed < header.instance_count {
        strip_t = strip_t
            .checked_add(coding.strip_delta_t(strip_size)?)
            .ok_or(DecoderInternal::ValueOverflow)?;

        let mut cur_s: i32 = 0;
        let mut first_in_strip = true;

        loop {
            if first_in_strip {
                first_s = first_s
                    .checked_add(coding.first_s()?)
                    .ok_or(DecoderInternal::ValueOverflow)?;
                cur_s = first_s;
                first_in_strip = false;
            } else {
                // "If the result of this decoding is OOB then the last
                // symbol instance of the strip has been decoded." (6.4.5)
                let Some(delta) = coding.delta_s()? else {
                    break;
                };
                cur_s = cur_s
                    .checked_add(delta)
                    .and_then(|s| s.checked_add(flags.ds_offset))
                    .ok_or(DecoderInternal::ValueOverflow)?;
            }

            if placed == header.instance_count {
                bail!(DecoderInternal::TooManySymbols);
            }

            let t = strip_t
                .checked_add(coding.cur_t(strip_size, flags.log_strip_size)?)
                .ok_or(DecoderInternal::ValueOverflow)?;

            let id = coding.symbol_id()?;
            let symbol: &Bitmap = symbols
                .get(id)
                .map(|symbol| symbol.as_ref())
                .ok_or(DecodeError::DecoderInternal(DecoderInternal::SymbolIndex))?;

            // 6.4.11: replace the symbol by a refined bitmap when IARI says
            // so.
            let refined = if flags.refine && coding.refine_flag()? {
                Some(refine_instance(&mut coding, symbol, header)?)
            } else {
                None
            };
            let glyph: &Bitmap = refined.as_ref().unwrap_or(symbol);

            place_instance(&mut bitmap, glyph, &mut cur_s, t, flags);
            placed += 1;
        }
    }

    Ok(bitmap)
}

/// Decode one refined instance bitmap (6.4.11 steps 1 to 7).
fn refine_instance(
    coding: &mut Coding<'_, '_>,
    symbol: &Bitmap,
    header: &TextHeader,
) -> Result<Bitmap> {
    let Coding::Arithmetic {
        decoder,
        decoders,
        refinement_contexts,
    } = coding
    else {
        bail!(Unsupported::HuffmanRefinement);
    };

    let dw = decoders.refine_dw.decode_required(decoder)?;
    let dh = decoders.refine_dh.decode_required(decoder)?;
    let dx = decoders.refine_dx.decode_required(decoder)?;
    let dy = decoders.refine_dy.decode_required(decoder)?;

    let width = u32::try_from(symbol.width() as i64 + dw as i64)
        .map_err(|_| DecoderInternal::ValueOverflow)?;
    let height = u32::try_from(symbol.height() as i64 + dh as i64)
        .map_err(|_| DecoderInternal::ValueOverflow)?;

    // "GRREFERENCEDX = floor(RDW / 2) + RDX,
    //  GRREFERENCEDY = floor(RDH / 2) + RDY" (6.4.11, Table 12)
    let mut refined = Bitmap::new(width, height)?;
    let params = RefinementParams {
        template: header.flags.refinement_template,
        adaptive: &header.refinement_adaptive,
        reference: symbol,
        dx: dw.div_euclid(2) + dx,
        dy: dh.div_euclid(2) + dy,
    };
    decode_refinement(&mut refined, decoder, refinement_contexts, &params)?;

    Ok(refined)
}

/// Anchor one glyph at (S, T) and advance CURS (6.4.5 step 3 c).
fn place_instance(bitmap: &mut Bitmap, glyph: &Bitmap, cur_s: &mut i32, t: i32, flags: &TextFlags) {
    let width = glyph.width() as i32;
    let height = glyph.height() as i32;

    // Right and bottom corners advance CURS before placement; left and top
    // corners after. (6.4.5 steps 3 c vi and x)
    if !flags.transposed && flags.corner.is_right() {
        *cur_s += width - 1;
    } else if flags.transposed && flags.corner.is_bottom() {
        *cur_s += height - 1;
    }

    let s = *cur_s;
    let (x, y) = if !flags.transposed {
        match flags.corner {
            Corner::TopLeft => (s, t),
            Corner::TopRight => (s - width + 1, t),
            Corner::BottomLeft => (s, t - height + 1),
            Corner::BottomRight => (s - width + 1, t - height + 1),
        }
    } else {
        match flags.corner {
            Corner::TopLeft => (t, s),
            Corner::TopRight => (t - width + 1, s),
            Corner::BottomLeft => (t, s - height + 1),
            Corner::BottomRight => (t - width + 1, s - height + 1),
        }
    };

    // "If any part of the symbol instance's bitmap lies outside the text
    // region's bitmap, it is clipped." (6.4.5)
    bitmap.blit(glyph, x, y, flags.operator);

    if !flags.transposed && !flags.corner.is_right() {
        *cur_s += width - 1;
    } else if flags.transposed && flags.corner.is_top() {
        *cur_s += height - 1;
    }
}
