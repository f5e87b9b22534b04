//! Segment headers and data parts (7.2).

use smallvec::SmallVec;

use crate::error::{MalformedHeader, OutOfRange, Result, Truncated, bail};
use crate::reader::Reader;

/// "The segment type is a number between 0 and 63, inclusive. Not all values
/// are allowed." (7.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentType {
    /// Type 0 (7.4.2).
    SymbolDictionary,
    /// Type 4 (7.4.3).
    IntermediateTextRegion,
    /// Type 6 (7.4.3).
    ImmediateTextRegion,
    /// Type 7 (7.4.3).
    ImmediateLosslessTextRegion,
    /// Type 16 (7.4.4).
    PatternDictionary,
    /// Type 20 (7.4.5).
    IntermediateHalftoneRegion,
    /// Type 22 (7.4.5).
    ImmediateHalftoneRegion,
    /// Type 23 (7.4.5).
    ImmediateLosslessHalftoneRegion,
    /// Type 36 (7.4.6).
    IntermediateGenericRegion,
    /// Type 38 (7.4.6).
    ImmediateGenericRegion,
    /// Type 39 (7.4.6).
    ImmediateLosslessGenericRegion,
    /// Type 40 (7.4.7).
    IntermediateGenericRefinementRegion,
    /// Type 42 (7.4.7).
    ImmediateGenericRefinementRegion,
    /// Type 43 (7.4.7).
    ImmediateLosslessGenericRefinementRegion,
    /// Type 48 (7.4.8).
    PageInformation,
    /// Type 49 (7.4.9).
    EndOfPage,
    /// Type 50 (7.4.10).
    EndOfStripe,
    /// Type 51 (7.4.11).
    EndOfFile,
    /// Type 52 (7.4.12).
    Profiles,
    /// Type 53 (7.4.13): a code table segment.
    Tables,
    /// Type 54 (7.4.15.2 of T.88 Amendment 2): colour palette.
    ColourPalette,
    /// Type 62 (7.4.14).
    Extension,
}

impl SegmentType {
    /// "All other segment types are reserved and must not be used." (7.3)
    fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::SymbolDictionary,
            4 => Self::IntermediateTextRegion,
            6 => Self::ImmediateTextRegion,
            7 => Self::ImmediateLosslessTextRegion,
            16 => Self::PatternDictionary,
            20 => Self::IntermediateHalftoneRegion,
            22 => Self::ImmediateHalftoneRegion,
            23 => Self::ImmediateLosslessHalftoneRegion,
            36 => Self::IntermediateGenericRegion,
            38 => Self::ImmediateGenericRegion,
            39 => Self::ImmediateLosslessGenericRegion,
            40 => Self::IntermediateGenericRefinementRegion,
            42 => Self::ImmediateGenericRefinementRegion,
            43 => Self::ImmediateLosslessGenericRefinementRegion,
            48 => Self::PageInformation,
            49 => Self::EndOfPage,
            50 => Self::EndOfStripe,
            51 => Self::EndOfFile,
            52 => Self::Profiles,
            53 => Self::Tables,
            54 => Self::ColourPalette,
            62 => Self::Extension,
            _ => bail!(MalformedHeader::UnknownSegmentType),
        })
    }
}

/// A parsed segment header (7.2.1).
#[derive(Debug, Clone)]
pub(crate) struct SegmentHeader {
    /// "The valid range of segment numbers is 0 through 0xFFFFFFFF; it is
    /// possible for there to be gaps in the numbering." (7.2.2)
    pub(crate) number: u32,
    pub(crate) segment_type: SegmentType,
    /// Referred-to segment numbers, each smaller than `number` (7.2.5).
    pub(crate) referred_to: SmallVec<[u32; 4]>,
    /// "This field may contain a value of zero; this value indicates that
    /// this segment is not associated with any page." (7.2.6)
    pub(crate) page: u32,
    /// `None` when the length field held 0xFFFFFFFF, which is only legal on
    /// an immediate generic region (7.2.7).
    pub(crate) data_length: Option<u32>,
}

/// A segment header with its data part.
#[derive(Debug, Clone)]
pub(crate) struct Segment<'a> {
    pub(crate) header: SegmentHeader,
    pub(crate) data: &'a [u8],
}

/// Parse one segment header (7.2.2 through 7.2.7).
pub(crate) fn parse_header(reader: &mut Reader<'_>) -> Result<SegmentHeader> {
    let number = reader.read_u32().ok_or(Truncated::UnexpectedEnd)?;

    // 7.2.3: segment type in the low six bits, the page association size in
    // bit 6. Bit 7 (deferred non-retain) only matters to streaming decoders.
    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let segment_type = SegmentType::from_value(flags & 0x3F)?;
    let wide_page_field = flags & 0x40 != 0;

    // 7.2.4: "The three most significant bits of the first byte determine the
    // length of the field. Values of 5 and 6 must not be used."
    let count_byte = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    let referred_count = match count_byte >> 5 {
        count @ 0..=4 => count as u32,
        5 | 6 => bail!(MalformedHeader::InvalidReferredToCount),
        _ => {
            // Long form: a 29-bit count, then one retain bit per referred-to
            // segment plus one for this segment.
            let rest = reader.read_bytes(3).ok_or(Truncated::UnexpectedEnd)?;
            let count =
                u32::from_be_bytes([count_byte & 0x1F, rest[0], rest[1], rest[2]]);
            let retain_bytes = (count as usize + 1).div_ceil(8);
            reader
                .skip_bytes(retain_bytes)
                .ok_or(Truncated::UnexpectedEnd)?;
            count
        }
    };

    // 7.2.5: referred-to numbers are 1, 2 or 4 bytes wide depending on this
    // segment's own number.
    let mut referred_to = SmallVec::with_capacity(referred_count as usize);
    for _ in 0..referred_count {
        let referred = if number <= 256 {
            reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as u32
        } else if number <= 65536 {
            reader.read_u16().ok_or(Truncated::UnexpectedEnd)? as u32
        } else {
            reader.read_u32().ok_or(Truncated::UnexpectedEnd)?
        };

        // "A segment must only refer to segments with lower segment
        // numbers." (7.2.5)
        if referred >= number {
            bail!(OutOfRange::ForwardReference);
        }
        referred_to.push(referred);
    }

    // 7.2.6: page association.
    let page = if wide_page_field {
        reader.read_u32().ok_or(Truncated::UnexpectedEnd)?
    } else {
        reader.read_u8().ok_or(Truncated::UnexpectedEnd)? as u32
    };

    // 7.2.7: data length; 0xFFFFFFFF means unknown.
    let data_length = match reader.read_u32().ok_or(Truncated::UnexpectedEnd)? {
        0xFFFF_FFFF => {
            if segment_type != SegmentType::ImmediateGenericRegion {
                bail!(MalformedHeader::UnknownDataLength);
            }
            None
        }
        length => Some(length),
    };

    Ok(SegmentHeader {
        number,
        segment_type,
        referred_to,
        page,
        data_length,
    })
}

/// Read a segment's data part, resolving an unknown length by scanning for
/// the end sequence (7.2.7).
pub(crate) fn read_data<'a>(reader: &mut Reader<'a>, header: &SegmentHeader) -> Result<&'a [u8]> {
    let length = match header.data_length {
        Some(length) => length as usize,
        None => unknown_region_length(reader.tail().ok_or(Truncated::UnexpectedEnd)?)?,
    };

    reader.read_bytes(length).ok_or(Truncated::SegmentData.into())
}

/// Find the data length of an unknown-length immediate generic region.
///
/// "The end sequences can occur anywhere after the eighteenth byte of the
/// segment's data part: 0x00 0x00 if MMR is 1, 0xFF 0xAC if MMR is 0. The
/// four bytes after the end sequence hold the decoded row count." (7.2.7)
fn unknown_region_length(data: &[u8]) -> Result<usize> {
    // 17 bytes of region segment information field, then the flags byte
    // carrying MMR in its lowest bit.
    if data.len() < 18 {
        bail!(Truncated::UnexpectedEnd);
    }
    let end_sequence: [u8; 2] = if data[17] & 1 != 0 {
        [0x00, 0x00]
    } else {
        [0xFF, 0xAC]
    };

    let mut offset = 18;
    while offset + 6 <= data.len() {
        if data[offset..offset + 2] == end_sequence {
            return Ok(offset + 6);
        }
        offset += 1;
    }

    bail!(Truncated::MissingEndSequence)
}
