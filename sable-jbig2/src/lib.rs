/*!
A memory-safe JBIG2 decoder.

`sable-jbig2` decodes bi-level images compressed with JBIG2 as specified in
ITU-T T.88 (also known as ISO/IEC 14492), the format PDF documents use for
scanned text. Both standalone file organizations (sequential and
random-access) and the embedded, pre-segmented arrangement of the PDF
`JBIG2Decode` filter are handled.

# Example
```rust,no_run
let data = std::fs::read("scan.jb2").unwrap();

let mut decoder = sable_jbig2::Decoder::new(&data).unwrap();
let frame = decoder.frame(0).unwrap();

println!("{}x{} pixels", frame.width, frame.height);
```

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod arith;
mod bitmap;
mod decode;
mod error;
mod file;
mod grayscale;
mod huffman;
mod integer;
mod page;
mod reader;
mod segment;

use std::collections::HashMap;
use std::collections::HashSet;

use crate::bitmap::SharedBitmap;
use crate::decode::pattern::PatternSet;
use crate::decode::{CombinationOperator, RegionInfo, generic, halftone, pattern, refinement, symbol, text};
use crate::error::bail;
use crate::file::Organization;
use crate::huffman::HuffmanTable;
use crate::page::PageLayout;
use crate::reader::Reader;
use crate::segment::{Segment, SegmentType};

pub use crate::bitmap::Bitmap;
pub use crate::error::{
    DecodeError, DecoderInternal, InconsistentState, MalformedHeader, OutOfRange, Result,
    Truncated, Unsupported,
};

/// Whether the data begins with the JBIG2 file ID string.
pub fn sniff(data: &[u8]) -> bool {
    data.starts_with(&file::ID_STRING)
}

/// One decoded page, converted for display.
///
/// `data` holds 4 bytes per pixel in BGRx order: black pixels decode to
/// `00 00 00 FF` and white pixels to `FF FF FF FF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// BGRx pixel data, row-major, `4 * width * height` bytes.
    pub data: Vec<u8>,
}

/// A decoder over one standalone JBIG2 file.
///
/// Creating the decoder parses every segment header and validates every
/// page's composition rules; pixel decoding happens on [`Decoder::frame`]
/// and is cached per page. A page whose decode fails stays failed: repeated
/// `frame` calls return the same error.
pub struct Decoder<'a> {
    segments: Vec<Segment<'a>>,
    page_numbers: Vec<u32>,
    layouts: Vec<PageLayout>,
    results: Vec<Option<core::result::Result<Bitmap, DecodeError>>>,
}

impl<'a> Decoder<'a> {
    /// Parse a standalone JBIG2 file and build its page list.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let (header, segments) = file::parse_file(data)?;
        check_unique_segment_numbers(&segments)?;

        let page_numbers = page::scan_page_numbers(&segments, header.page_count)?;
        let layouts = page_numbers
            .iter()
            .map(|&number| page::scan_page(&segments, number, header.organization))
            .collect::<Result<Vec<_>>>()?;

        let results = vec![None; page_numbers.len()];
        Ok(Self {
            segments,
            page_numbers,
            layouts,
            results,
        })
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    /// Final size of the page at `index`, stripe accumulation included.
    pub fn page_size(&self, index: usize) -> Option<(u32, u32)> {
        let layout = self.layouts.get(index)?;
        Some((layout.info.width, layout.height))
    }

    /// Decode the page at `index` into a BGRx frame.
    pub fn frame(&mut self, index: usize) -> Result<Frame> {
        if index >= self.page_numbers.len() {
            bail!(OutOfRange::PageIndex);
        }

        if self.results[index].is_none() {
            let decoded = decode_page(
                &self.segments,
                self.page_numbers[index],
                &self.layouts[index],
            );
            self.results[index] = Some(decoded);
        }

        match &self.results[index] {
            Some(Ok(bitmap)) => Ok(to_frame(bitmap)),
            Some(Err(error)) => Err(*error),
            None => unreachable!(),
        }
    }
}

/// Decode pre-segmented embedded JBIG2 data, as found behind the PDF
/// `JBIG2Decode` filter: no file header, no end-of-page or end-of-file
/// segments, exactly one page. Returns the page's packed bit rows.
pub fn decode_embedded(chunks: &[&[u8]]) -> Result<Bitmap> {
    let segments = file::parse_embedded(chunks)?;
    check_unique_segment_numbers(&segments)?;

    let page_numbers = page::scan_page_numbers(&segments, None)?;
    let [page_number] = page_numbers.as_slice() else {
        bail!(InconsistentState::EmbeddedPageCount);
    };

    let layout = page::scan_page(&segments, *page_number, Organization::Embedded)?;
    decode_page(&segments, *page_number, &layout)
}

/// "Segment numbers must be unique." (7.2.2)
fn check_unique_segment_numbers(segments: &[Segment<'_>]) -> Result<()> {
    let mut seen = HashSet::with_capacity(segments.len());
    for segment in segments {
        if !seen.insert(segment.header.number) {
            bail!(InconsistentState::DuplicateSegmentNumber);
        }
    }
    Ok(())
}

fn to_frame(bitmap: &Bitmap) -> Frame {
    let mut data = Vec::with_capacity(4 * bitmap.width() as usize * bitmap.height() as usize);
    for y in 0..bitmap.height() {
        for x in 0..bitmap.width() {
            let luma = if bitmap.get(x, y) { 0x00 } else { 0xFF };
            data.extend_from_slice(&[luma, luma, luma, 0xFF]);
        }
    }

    Frame {
        width: bitmap.width(),
        height: bitmap.height(),
        data,
    }
}

/// What a non-region segment leaves behind for later segments to refer to.
enum Artifact {
    Symbols(Vec<SharedBitmap>),
    Patterns(PatternSet),
    Table(HuffmanTable),
}

/// Decode all segments of one page, compositing immediate regions onto the
/// page bitmap (8.2, reduced to whole-buffer decoding).
fn decode_page(segments: &[Segment<'_>], page_number: u32, layout: &PageLayout) -> Result<Bitmap> {
    let mut artifacts: HashMap<u32, Artifact> = HashMap::new();
    let mut page: Option<Bitmap> = None;

    for segment in segments {
        // Segments associated with page 0 (dictionaries and tables shared by
        // the whole file) take part in every page's decode.
        if segment.header.page != 0 && segment.header.page != page_number {
            continue;
        }

        let mut reader = Reader::new(segment.data);

        match segment.header.segment_type {
            SegmentType::SymbolDictionary => {
                let (symbols, tables) = referred_inputs(&artifacts, segment);
                let exported = symbol::decode_segment(&mut reader, &symbols, &tables)?;
                artifacts.insert(segment.header.number, Artifact::Symbols(exported));
            }
            SegmentType::Tables => {
                let table = HuffmanTable::from_stream(&mut reader)?;
                artifacts.insert(segment.header.number, Artifact::Table(table));
            }
            SegmentType::PatternDictionary => {
                let patterns = pattern::decode_segment(&mut reader)?;
                artifacts.insert(segment.header.number, Artifact::Patterns(patterns));
            }
            SegmentType::ImmediateTextRegion | SegmentType::ImmediateLosslessTextRegion => {
                let page = active_page(&mut page)?;
                let (symbols, tables) = referred_inputs(&artifacts, segment);
                let region = text::decode_segment(&mut reader, &symbols, &tables)?;
                compose(page, layout, &region.info, &region.bitmap, false)?;
            }
            SegmentType::ImmediateGenericRegion | SegmentType::ImmediateLosslessGenericRegion => {
                let page = active_page(&mut page)?;
                let unknown_length = segment.header.data_length.is_none();
                let region = generic::decode_segment(&mut reader, unknown_length)?;
                compose(page, layout, &region.info, &region.bitmap, false)?;
            }
            SegmentType::ImmediateHalftoneRegion
            | SegmentType::ImmediateLosslessHalftoneRegion => {
                let page = active_page(&mut page)?;
                let patterns = referred_patterns(&artifacts, segment)?;
                let region = halftone::decode_segment(&mut reader, patterns)?;
                compose(page, layout, &region.info, &region.bitmap, false)?;
            }
            SegmentType::ImmediateGenericRefinementRegion
            | SegmentType::ImmediateLosslessGenericRefinementRegion => {
                // A refinement region with referred-to segments refines an
                // intermediate region, which this decoder rejects; without
                // any it refines the page bitmap in place (7.4.7.5).
                if !segment.header.referred_to.is_empty() {
                    bail!(Unsupported::IntermediateRegion);
                }
                let page = active_page(&mut page)?;
                let region = refinement::decode_segment(&mut reader, page)?;
                compose(page, layout, &region.info, &region.bitmap, true)?;
            }
            SegmentType::PageInformation => {
                if page.is_some() {
                    bail!(InconsistentState::MultiplePageInformation);
                }
                // The layout pre-pass resolved striping; allocate at the
                // final height and fill with the page default pixel.
                page = Some(Bitmap::filled(
                    layout.info.width,
                    layout.height,
                    layout.info.default_pixel,
                )?);
            }
            // Consumed by the layout pre-pass.
            SegmentType::EndOfPage | SegmentType::EndOfStripe | SegmentType::EndOfFile => {}
            SegmentType::IntermediateTextRegion
            | SegmentType::IntermediateGenericRegion
            | SegmentType::IntermediateHalftoneRegion
            | SegmentType::IntermediateGenericRefinementRegion => {
                bail!(Unsupported::IntermediateRegion)
            }
            SegmentType::Profiles => bail!(Unsupported::Profiles),
            SegmentType::ColourPalette => bail!(Unsupported::Colour),
            SegmentType::Extension => handle_extension(segment.data)?,
        }
    }

    page.ok_or(InconsistentState::MissingPageInformation.into())
}

fn active_page<'p>(page: &'p mut Option<Bitmap>) -> Result<&'p mut Bitmap> {
    page.as_mut()
        .ok_or(InconsistentState::MissingPageInformation.into())
}

/// Gather SDINSYMS/SBSYMS and the custom code tables from the referred-to
/// segments, in referred order (7.4.3.1.7, 6.5.5 step 1).
fn referred_inputs<'s>(
    artifacts: &'s HashMap<u32, Artifact>,
    segment: &Segment<'_>,
) -> (Vec<SharedBitmap>, Vec<&'s HuffmanTable>) {
    let mut symbols = Vec::new();
    let mut tables = Vec::new();

    for number in &segment.header.referred_to {
        match artifacts.get(number) {
            Some(Artifact::Symbols(exported)) => symbols.extend(exported.iter().cloned()),
            Some(Artifact::Table(table)) => tables.push(table),
            Some(Artifact::Patterns(_)) | None => {
                log::debug!(
                    "segment {} refers to segment {number} without symbols or tables",
                    segment.header.number
                );
            }
        }
    }

    (symbols, tables)
}

/// The pattern dictionary a halftone region refers to (7.4.5.2).
fn referred_patterns<'s>(
    artifacts: &'s HashMap<u32, Artifact>,
    segment: &Segment<'_>,
) -> Result<&'s PatternSet> {
    for number in &segment.header.referred_to {
        if let Some(Artifact::Patterns(patterns)) = artifacts.get(number) {
            return Ok(patterns);
        }
    }
    Err(DecoderInternal::MissingArtifact.into())
}

/// Composite a decoded region onto the page, enforcing the placement and
/// operator rules of 7.4.1 and 7.4.8.5.
fn compose(
    page: &mut Bitmap,
    layout: &PageLayout,
    info: &RegionInfo,
    bitmap: &Bitmap,
    refines_page: bool,
) -> Result<()> {
    // "The part of the page's bitmap to be modified must lie entirely within
    // the page's bitmap." (8.2)
    if (info.x as u64) + (info.width as u64) > page.width() as u64
        || (info.y as u64) + (info.height as u64) > page.height() as u64
    {
        bail!(OutOfRange::RegionOutsidePage);
    }

    // "Refinement region segments that refer to no region segments must have
    // an external combination operator of REPLACE, and all other region
    // segments must use the page default unless the override bit is set."
    // (7.4.8.5 NOTE 1)
    if refines_page {
        if info.operator != CombinationOperator::Replace {
            bail!(InconsistentState::CombinationOperatorConflict);
        }
    } else if !layout.info.operator_override && info.operator != layout.info.default_operator {
        bail!(InconsistentState::CombinationOperatorConflict);
    }

    let x = i32::try_from(info.x).map_err(|_| DecoderInternal::ValueOverflow)?;
    let y = i32::try_from(info.y).map_err(|_| DecoderInternal::ValueOverflow)?;
    page.blit(bitmap, x, y, info.operator);
    Ok(())
}

/// Extension segments (7.4.14). Comments are structural no-ops; anything
/// unknown is fatal only if flagged necessary.
fn handle_extension(data: &[u8]) -> Result<()> {
    let mut reader = Reader::new(data);
    let extension_type = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    match extension_type {
        // 7.4.15.1 single-byte coded comment, 7.4.15.2 multi-byte coded
        // comment: key/value text with no effect on the decoded image.
        0x2000_0000 | 0x2000_0002 => {
            log::debug!("skipping comment extension segment");
            Ok(())
        }
        // "Bit 31: necessary bit. If this bit is 1, the decoder must
        // understand the extension to decode the page." (7.4.14)
        _ if extension_type & 0x8000_0000 != 0 => Err(Unsupported::Extension.into()),
        _ => {
            log::warn!("ignoring unknown extension type {extension_type:#010x}");
            Ok(())
        }
    }
}
