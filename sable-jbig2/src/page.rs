//! Page information segments and page composition rules (7.4.8, 8.2).

use crate::decode::CombinationOperator;
use crate::error::{
    DecoderInternal, InconsistentState, MalformedHeader, Result, Truncated, bail,
};
use crate::file::Organization;
use crate::reader::Reader;
use crate::segment::{Segment, SegmentType};

/// Parsed page information segment (7.4.8).
#[derive(Debug, Clone)]
pub(crate) struct PageInfo {
    /// 7.4.8.1, 7.4.8.2. A height of 0xFFFFFFFF stays unknown until the end
    /// of stripe segments resolve it.
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "Bit 2: Page default pixel value. The initial value for every pixel
    /// in the page." (7.4.8.5)
    pub(crate) default_pixel: bool,
    /// "Bits 3-4: Page default combination operator." (7.4.8.5)
    pub(crate) default_operator: CombinationOperator,
    /// "Bit 6: If this bit is 1, direct region segments may use any
    /// combination operators." (7.4.8.5)
    pub(crate) operator_override: bool,
    /// "Bit 15: Page is striped." (7.4.8.6)
    pub(crate) striped: bool,
    /// "Bits 0-14: Maximum stripe size." (7.4.8.6)
    pub(crate) max_stripe_size: u16,
}

/// The page height declared when it is only known after the last stripe.
pub(crate) const UNKNOWN_HEIGHT: u32 = 0xFFFF_FFFF;

/// Parse a page information segment's 19-byte data part (7.4.8).
pub(crate) fn parse_page_info(data: &[u8]) -> Result<PageInfo> {
    if data.len() != 19 {
        bail!(MalformedHeader::WrongSegmentSize);
    }
    let mut reader = Reader::new(data);

    let width = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;
    let height = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    // 7.4.8.3, 7.4.8.4: X and Y resolution in pixels per metre; zero means
    // unknown. Nothing in decoding depends on them.
    let _ = reader.read_u32();
    let _ = reader.read_u32();

    // 7.4.8.5: page segment flags. Bit 0 (eventually lossless), bit 1 (may
    // contain refinements) and bit 5 (auxiliary buffers) are decoding hints
    // this implementation does not need.
    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let default_pixel = flags & 0x04 != 0;
    let default_operator = CombinationOperator::from_two_bits(flags >> 3);
    let operator_override = flags & 0x40 != 0;

    // 7.4.8.6: page striping information.
    let striping = reader.read_u16().ok_or(Truncated::UnexpectedEnd)?;
    let striped = striping & 0x8000 != 0;
    let max_stripe_size = striping & 0x7FFF;

    Ok(PageInfo {
        width,
        height,
        default_pixel,
        default_operator,
        operator_override,
        striped,
        max_stripe_size,
    })
}

/// A page's validated identity and final size.
#[derive(Debug, Clone)]
pub(crate) struct PageLayout {
    pub(crate) info: PageInfo,
    /// The height after end-of-stripe accumulation.
    pub(crate) height: u32,
}

/// Validate one page's composition segments and resolve its height (a
/// whole-buffer reduction of the 8.2 striping rules).
pub(crate) fn scan_page(
    segments: &[Segment<'_>],
    page: u32,
    organization: Organization,
) -> Result<PageLayout> {
    let mut info: Option<PageInfo> = None;
    let mut unknown_height = false;
    let mut found_end_of_page = false;
    let mut last_stripe_height: Option<u32> = None;
    let mut last_stripe_index: Option<usize> = None;

    for (index, segment) in segments.iter().enumerate() {
        if segment.header.page != page {
            continue;
        }

        if found_end_of_page && segment.header.segment_type != SegmentType::EndOfFile {
            bail!(InconsistentState::SegmentAfterEndOfPage);
        }

        match segment.header.segment_type {
            SegmentType::PageInformation => {
                // "7.4.8: Each page must have exactly one page information
                // segment."
                if info.is_some() {
                    bail!(InconsistentState::MultiplePageInformation);
                }
                let parsed = parse_page_info(segment.data)?;

                unknown_height = parsed.height == UNKNOWN_HEIGHT;
                // "If the page's bitmap height is unknown then the 'page is
                // striped' bit must be 1." (7.4.8.6)
                if unknown_height && !parsed.striped {
                    bail!(InconsistentState::UnstripedUnknownHeight);
                }

                info = Some(parsed);
            }
            SegmentType::EndOfStripe => {
                let Some(info) = &info else {
                    bail!(InconsistentState::UnexpectedEndOfStripe);
                };
                if !info.striped {
                    bail!(InconsistentState::UnexpectedEndOfStripe);
                }
                // "The segment data of an end of stripe segment consists of
                // one four-byte value, specifying the Y coordinate of the
                // end row." (7.4.10)
                if segment.data.len() != 4 {
                    bail!(MalformedHeader::WrongSegmentSize);
                }
                let end_row = u32::from_be_bytes(segment.data.try_into().unwrap());
                let stripe_bottom = end_row
                    .checked_add(1)
                    .ok_or(DecoderInternal::ValueOverflow)?;

                // Stripe end rows move strictly down the page, and never
                // past a known height.
                if last_stripe_height.is_some_and(|last| stripe_bottom <= last) {
                    bail!(InconsistentState::StripeCoordinate);
                }
                if !unknown_height && stripe_bottom > info.height {
                    bail!(InconsistentState::StripeCoordinate);
                }

                // "The distance between consecutive end rows must be no more
                // than the page's maximum stripe size." (7.4.8.6)
                let stripe_height = stripe_bottom - last_stripe_height.unwrap_or(0);
                if stripe_height > info.max_stripe_size as u32 {
                    bail!(InconsistentState::StripeTooTall);
                }

                last_stripe_height = Some(stripe_bottom);
                last_stripe_index = Some(index);
            }
            SegmentType::EndOfPage => {
                // "The segment data part of an end of page segment is empty."
                // (7.4.9)
                if !segment.data.is_empty() {
                    bail!(MalformedHeader::WrongSegmentSize);
                }
                found_end_of_page = true;

                // On a striped page, the end of page directly follows the
                // final end of stripe.
                let striped = info.as_ref().is_some_and(|info| info.striped);
                if striped && last_stripe_index.is_none_or(|at| at + 1 != index) {
                    bail!(InconsistentState::UnexpectedEndOfStripe);
                }
            }
            _ => {}
        }
    }

    let Some(info) = info else {
        bail!(InconsistentState::MissingPageInformation);
    };

    let mut height = info.height;
    if info.striped {
        let Some(bottom) = last_stripe_height else {
            // "A striped page must have at least one end of stripe segment."
            bail!(InconsistentState::UnexpectedEndOfStripe);
        };
        if unknown_height {
            height = bottom;
        }
        // The last stripe may stop short of a known height, but never pass
        // it; the coordinate checks above already enforced that.
    }

    // "The JBIG2 file header, end-of-page segments, and end-of-file segment
    // are not used in PDF." (PDF 1.7, 3.3.6) - so embedded streams must not
    // carry an end-of-page, while file organizations require one (7.4.9).
    if organization == Organization::Embedded {
        if found_end_of_page {
            bail!(InconsistentState::UnexpectedEndOfPage);
        }
    } else if !found_end_of_page {
        bail!(InconsistentState::MissingEndOfPage);
    }

    Ok(PageLayout { info, height })
}

/// Collect the page numbers of the stream, in order of first appearance.
pub(crate) fn scan_page_numbers(
    segments: &[Segment<'_>],
    declared_count: Option<u32>,
) -> Result<Vec<u32>> {
    let mut pages: Vec<u32> = Vec::new();

    for segment in segments {
        // Zero marks segments that belong to the file, not to a page.
        let page = segment.header.page;
        if page != 0 && !pages.contains(&page) {
            pages.push(page);
        }
    }

    if declared_count.is_some_and(|declared| declared as usize != pages.len()) {
        bail!(InconsistentState::PageCountMismatch);
    }

    Ok(pages)
}
