//! Symbol dictionary decoding (6.5, 7.4.2).

use crate::arith::{ArithContext, ArithDecoder, fresh_contexts};
use crate::bitmap::{Bitmap, SharedBitmap};
use crate::decode::generic::{GenericParams, decode_into as decode_generic, decode_mmr_into};
use crate::decode::refinement::{RefinementParams, decode_into as decode_refinement};
use crate::decode::{
    AdaptivePixel, RefinementTemplate, Template, parse_adaptive_pixels,
};
use crate::error::{
    DecodeError, DecoderInternal, MalformedHeader, Result, Truncated, Unsupported, bail,
};
use crate::huffman::{self, HuffmanTable};
use crate::integer::{IdDecoder, IntDecoder};
use crate::reader::Reader;

/// Parsed symbol dictionary flags and fields (7.4.2.1).
struct SymbolHeader {
    huffman: bool,
    refine_aggregate: bool,
    template: Template,
    refinement_template: RefinementTemplate,
    adaptive: Vec<AdaptivePixel>,
    refinement_adaptive: Vec<AdaptivePixel>,
    /// "SDNUMEXSYMS"
    exported_count: u32,
    /// "SDNUMNEWSYMS"
    new_count: u32,
    /// Huffman table selections, `(SDHUFFDH, SDHUFFDW, SDHUFFBMSIZE,
    /// SDHUFFAGGINST)`.
    table_selections: (u8, u8, u8, u8),
}

fn parse_header(reader: &mut Reader<'_>) -> Result<SymbolHeader> {
    let word = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;
    let huffman = word & 0x0001 != 0;
    let refine_aggregate = word & 0x0002 != 0;
    let table_selections = (
        ((word >> 2) & 3) as u8,
        ((word >> 4) & 3) as u8,
        ((word >> 6) & 1) as u8,
        ((word >> 7) & 1) as u8,
    );
    // Bits 8 and 9 (bitmap coding context used / retained) describe context
    // carry-over between segments, which this decoder does not perform.
    let template = Template::from_bits((word >> 10) as u8);
    let refinement_template = RefinementTemplate::from_bit((word >> 12) as u8);

    if word & 0xE000 != 0 {
        bail!(MalformedHeader::ReservedBits);
    }
    if huffman && refine_aggregate {
        bail!(Unsupported::HuffmanRefinement);
    }

    let adaptive = if huffman {
        Vec::new()
    } else {
        let pixels = parse_adaptive_pixels(reader, template.adaptive_pixel_count())?;
        for pixel in &pixels {
            pixel.validate()?;
        }
        pixels
    };

    let refinement_adaptive =
        if refine_aggregate && refinement_template == RefinementTemplate::Template0 {
            let pixels = parse_adaptive_pixels(reader, 2)?;
            for pixel in &pixels {
                pixel.validate()?;
            }
            pixels
        } else {
            Vec::new()
        };

    let exported_count = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let new_count = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    Ok(SymbolHeader {
        huffman,
        refine_aggregate,
        template,
        refinement_template,
        adaptive,
        refinement_adaptive,
        exported_count,
        new_count,
        table_selections,
    })
}

/// The Huffman tables a symbol dictionary reads through (7.4.2.1.6).
struct SymbolTables<'a> {
    /// "SDHUFFDH"
    delta_height: &'a HuffmanTable,
    /// "SDHUFFDW"
    delta_width: &'a HuffmanTable,
    /// "SDHUFFBMSIZE"
    bitmap_size: &'a HuffmanTable,
    /// Export run lengths always come from Table B.1 (6.5.10).
    export_runs: &'a HuffmanTable,
}

fn select_tables<'a>(
    selections: (u8, u8, u8, u8),
    custom: &[&'a HuffmanTable],
) -> Result<SymbolTables<'a>> {
    let mut next_custom = 0_usize;
    let mut take_custom = || -> Result<&'a HuffmanTable> {
        let table = custom
            .get(next_custom)
            .copied()
            .ok_or(DecodeError::DecoderInternal(DecoderInternal::MissingArtifact))?;
        next_custom += 1;
        Ok(table)
    };

    let delta_height = match selections.0 {
        0 => &*huffman::TABLE_D,
        // Selection 1 names standard table E (B.5).
        1 => bail!(Unsupported::StandardHuffmanTable),
        3 => take_custom()?,
        _ => bail!(MalformedHeader::InvalidHuffmanSelection),
    };

    let delta_width = match selections.1 {
        0 => &*huffman::TABLE_B,
        // Selection 1 names standard table C (B.3).
        1 => bail!(Unsupported::StandardHuffmanTable),
        3 => take_custom()?,
        _ => bail!(MalformedHeader::InvalidHuffmanSelection),
    };
    // Width deltas are OOB-terminated, so their table must carry one.
    if !delta_width.has_oob() {
        bail!(MalformedHeader::InvalidHuffmanSelection);
    }

    let bitmap_size = if selections.2 == 0 {
        &*huffman::TABLE_A
    } else {
        take_custom()?
    };

    // SDHUFFAGGINST would resolve here, but Huffman together with
    // refinement/aggregation was already rejected.
    if selections.3 != 0 {
        let _ = take_custom()?;
    }

    Ok(SymbolTables {
        delta_height,
        delta_width,
        bitmap_size,
        export_runs: &*huffman::TABLE_A,
    })
}

/// Entropy-coding state of one dictionary decode.
enum Coding<'a, 'data> {
    Huffman {
        reader: Reader<'data>,
        tables: SymbolTables<'a>,
    },
    Arithmetic {
        decoder: ArithDecoder<'data>,
        /// "IADH", "IADW", "IAEX", "IAAI"
        delta_height: IntDecoder,
        delta_width: IntDecoder,
        export_runs: IntDecoder,
        aggregate_count: IntDecoder,
        /// "IAID", "IARDX", "IARDY" for refinement/aggregate coding.
        ids: IdDecoder,
        refine_dx: IntDecoder,
        refine_dy: IntDecoder,
        generic_contexts: Vec<ArithContext>,
        refinement_contexts: Vec<ArithContext>,
    },
}

impl Coding<'_, '_> {
    /// 6.5.6: the next height class delta. Never OOB.
    fn delta_height(&mut self) -> Result<i32> {
        match self {
            Self::Huffman { reader, tables } => tables.delta_height.decode_required(reader),
            Self::Arithmetic {
                decoder,
                delta_height,
                ..
            } => delta_height.decode_required(decoder),
        }
    }

    /// 6.5.7: the next width delta; OOB ends the height class.
    fn delta_width(&mut self) -> Result<Option<i32>> {
        match self {
            Self::Huffman { reader, tables } => tables.delta_width.decode(reader),
            Self::Arithmetic {
                decoder,
                delta_width,
                ..
            } => delta_width.decode(decoder),
        }
    }

    /// 6.5.10: the next export run length.
    fn export_run(&mut self) -> Result<i32> {
        match self {
            Self::Huffman { reader, tables } => tables.export_runs.decode_required(reader),
            Self::Arithmetic {
                decoder,
                export_runs,
                ..
            } => export_runs.decode_required(decoder),
        }
    }
}

/// Decode a symbol dictionary segment's data part (7.4.2, 6.5.5).
///
/// `input_symbols` is SDINSYMS: the referred-to dictionaries' exports in
/// referred order. Returns SDEXSYMS.
pub(crate) fn decode_segment(
    reader: &mut Reader<'_>,
    input_symbols: &[SharedBitmap],
    custom_tables: &[&HuffmanTable],
) -> Result<Vec<SharedBitmap>> {
    let header = parse_header(reader)?;

    let total_count = (input_symbols.len() as u64) + header.new_count as u64;

    let mut coding = if header.huffman {
        Coding::Huffman {
            reader: reader.clone(),
            tables: select_tables(header.table_selections, custom_tables)?,
        }
    } else {
        let data = reader.tail().ok_or(Truncated::UnexpectedEnd)?;
        // "SBSYMCODELEN = ceil(log2(SDNUMINSYMS + SDNUMNEWSYMS))" (6.5.8.2.3)
        let id_code_length = 32 - (total_count as u32).saturating_sub(1).leading_zeros();
        Coding::Arithmetic {
            decoder: ArithDecoder::new(data),
            delta_height: IntDecoder::new(),
            delta_width: IntDecoder::new(),
            export_runs: IntDecoder::new(),
            aggregate_count: IntDecoder::new(),
            ids: IdDecoder::new(id_code_length),
            refine_dx: IntDecoder::new(),
            refine_dy: IntDecoder::new(),
            generic_contexts: fresh_contexts(1 << header.template.context_bits()),
            refinement_contexts: fresh_contexts(1 << header.refinement_template.context_bits()),
        }
    };

    let mut new_symbols: Vec<Bitmap> = Vec::with_capacity(header.new_count as usize);
    // Widths per symbol, needed to slice Huffman collective bitmaps.
    let mut widths: Vec<u32> = Vec::new();

    // "4) Decode each height class as follows:" (6.5.5)
    let mut class_height: u32 = 0;
    let mut decoded: u32 = 0;

    while decoded < header.new_count {
        // "b) Decode the height class delta height. Set:
        //     HCHEIGHT = HCHEIGHT + HCDH" (6.5.5)
        let delta = coding.delta_height()?;
        class_height = class_height
            .checked_add_signed(delta)
            .ok_or(DecoderInternal::ValueOverflow)?;

        let class_first = decoded as usize;
        let mut width: u32 = 0;
        let mut class_width: u32 = 0;

        // "c) Decode each symbol within the height class. If the result of
        // this decoding is OOB then all the symbols in this height class
        // have been decoded." (6.5.5)
        while let Some(delta) = coding.delta_width()? {
            if decoded == header.new_count {
                bail!(DecoderInternal::TooManySymbols);
            }

            width = width
                .checked_add_signed(delta)
                .ok_or(DecoderInternal::ValueOverflow)?;
            class_width = class_width
                .checked_add(width)
                .ok_or(DecoderInternal::ValueOverflow)?;

            if header.huffman {
                // Bitmaps follow collectively once the class is complete.
                widths.push(width);
            } else if !header.refine_aggregate {
                // "6.5.8.1 Direct-coded symbol bitmap": one generic region
                // continuing the dictionary's single arithmetic stream.
                let Coding::Arithmetic {
                    decoder,
                    generic_contexts,
                    ..
                } = &mut coding
                else {
                    bail!(DecoderInternal::MissingArtifact);
                };

                let mut symbol = Bitmap::new(width, class_height)?;
                decode_generic(
                    &mut symbol,
                    decoder,
                    generic_contexts,
                    &GenericParams {
                        template: header.template,
                        adaptive: &header.adaptive,
                        typical_prediction: false,
                        skip: None,
                    },
                )?;
                new_symbols.push(symbol);
            } else {
                let symbol = decode_aggregate(
                    &mut coding,
                    &header,
                    input_symbols,
                    &new_symbols,
                    width,
                    class_height,
                )?;
                new_symbols.push(symbol);
            }

            decoded += 1;
        }

        if header.huffman {
            decode_collective_class(
                &mut coding,
                &mut new_symbols,
                &widths[class_first..],
                class_width,
                class_height,
            )?;
        }
    }

    export_symbols(&mut coding, &header, input_symbols, new_symbols, total_count)
}

/// Decode one symbol through refinement/aggregation (6.5.8.2).
fn decode_aggregate(
    coding: &mut Coding<'_, '_>,
    header: &SymbolHeader,
    input_symbols: &[SharedBitmap],
    new_symbols: &[Bitmap],
    width: u32,
    height: u32,
) -> Result<Bitmap> {
    let Coding::Arithmetic {
        decoder,
        aggregate_count,
        ids,
        refine_dx,
        refine_dy,
        refinement_contexts,
        ..
    } = coding
    else {
        bail!(Unsupported::HuffmanRefinement);
    };

    // "6.5.8.2.1 Number of symbol instances in aggregation" - only a single
    // instance refines directly; larger aggregates would nest a whole text
    // region decode.
    let instances = aggregate_count.decode_required(decoder)?;
    if instances != 1 {
        bail!(Unsupported::AggregateInstances);
    }

    // "6.5.8.2.2 Decoding a bitmap when REFAGGNINST is 1": an ID into the
    // symbols gathered so far, two offsets, then a refinement of that symbol.
    let id = ids.decode(decoder) as usize;
    let dx = refine_dx.decode_required(decoder)?;
    let dy = refine_dy.decode_required(decoder)?;

    let reference: &Bitmap = if id < input_symbols.len() {
        &input_symbols[id]
    } else {
        new_symbols
            .get(id - input_symbols.len())
            .ok_or(DecodeError::DecoderInternal(DecoderInternal::SymbolIndex))?
    };

    let mut symbol = Bitmap::new(width, height)?;
    decode_refinement(
        &mut symbol,
        decoder,
        refinement_contexts,
        &RefinementParams {
            template: header.refinement_template,
            adaptive: &header.refinement_adaptive,
            reference,
            dx,
            dy,
        },
    )?;

    Ok(symbol)
}

/// Decode a height class's collective bitmap and slice it into symbols
/// (6.5.9, 6.5.5 step 4 d).
fn decode_collective_class(
    coding: &mut Coding<'_, '_>,
    new_symbols: &mut Vec<Bitmap>,
    class_widths: &[u32],
    class_width: u32,
    class_height: u32,
) -> Result<()> {
    let Coding::Huffman { reader, tables } = coding else {
        bail!(DecoderInternal::MissingArtifact);
    };

    // "1) Read the size in bytes using the SDHUFFBMSIZE table.
    //  2) Skip over any bits remaining in the last byte read." (6.5.9)
    let size = tables.bitmap_size.decode_required(reader)?;
    let size = u32::try_from(size).map_err(|_| DecoderInternal::ValueOverflow)?;
    reader.align();

    let mut collective = Bitmap::new(class_width, class_height)?;

    if size == 0 {
        // "If BMSIZE is zero, the bitmap is stored uncompressed; its size is
        // HCHEIGHT x ceil(TOTWIDTH / 8) bytes." (6.5.9)
        let pitch = collective.pitch();
        for y in 0..class_height {
            let row = reader.read_bytes(pitch).ok_or(Truncated::UnexpectedEnd)?;
            collective.row_mut(y).copy_from_slice(row);
        }
    } else {
        // "Otherwise, decode the bitmap using a generic bitmap decoding
        // procedure with MMR = 1." (6.5.9, Table 19)
        let data = reader
            .read_bytes(size as usize)
            .ok_or(Truncated::UnexpectedEnd)?;
        decode_mmr_into(&mut collective, data)?;
    }

    // "Break up the bitmap B_HC to obtain the symbols SDNEWSYMS[HCFIRSTSYM]
    // through SDNEWSYMS[NSYMSDECODED - 1]; B_HC contains them concatenated
    // left-to-right with no intervening gaps." (6.5.5 step 4 d)
    let mut x = 0;
    for &width in class_widths {
        new_symbols.push(collective.sub_bitmap(x, 0, width, class_height)?);
        x += width;
    }

    Ok(())
}

/// Run the export filter (6.5.10) and collect SDEXSYMS.
fn export_symbols(
    coding: &mut Coding<'_, '_>,
    header: &SymbolHeader,
    input_symbols: &[SharedBitmap],
    new_symbols: Vec<Bitmap>,
    total_count: u64,
) -> Result<Vec<SharedBitmap>> {
    // "1) Set: EXINDEX = 0, CUREXFLAG = 0" (6.5.10)
    let mut flags = vec![false; total_count as usize];
    let mut index: u64 = 0;
    let mut exporting = false;

    // "5) Repeat until EXINDEX = SDNUMINSYMS + SDNUMNEWSYMS." (6.5.10)
    while index < total_count {
        // "2) Decode a value using Table B.1 if SDHUFF is 1, or the IAEX
        // integer arithmetic decoding procedure otherwise." (6.5.10)
        let run = coding.export_run()?;
        if run < 0 || index + run as u64 > total_count {
            bail!(DecoderInternal::ExportCount);
        }

        // "3) Set EXFLAGS[EXINDEX] through EXFLAGS[EXINDEX + EXRUNLENGTH - 1]
        // to CUREXFLAG. 4) Toggle CUREXFLAG." (6.5.10)
        for flag in &mut flags[index as usize..(index + run as u64) as usize] {
            *flag = exporting;
        }
        index += run as u64;
        exporting = !exporting;
    }

    // "8) If EXFLAGS[I] = 1: take input symbols at their original position,
    // new symbols by increasing index." (6.5.10)
    let mut new_symbols = new_symbols.into_iter().map(SharedBitmap::new);
    let mut exported = Vec::with_capacity(header.exported_count as usize);

    for (i, &flag) in flags.iter().enumerate() {
        if i < input_symbols.len() {
            if flag {
                exported.push(input_symbols[i].clone());
            }
        } else {
            let symbol = new_symbols
                .next()
                .ok_or(DecodeError::DecoderInternal(DecoderInternal::ExportCount))?;
            if flag {
                exported.push(symbol);
            }
        }
    }

    if exported.len() != header.exported_count as usize {
        bail!(DecoderInternal::ExportCount);
    }

    Ok(exported)
}
