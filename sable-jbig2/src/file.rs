//! Standalone file organizations (Annex D) and embedded streams.

use crate::error::{InconsistentState, MalformedHeader, Result, Truncated, bail};
use crate::reader::Reader;
use crate::segment::{Segment, SegmentType, parse_header, read_data};

/// "This is an 8-byte sequence containing 0x97 0x4A 0x42 0x32 0x0D 0x0A 0x1A
/// 0x0A." (D.4.1)
pub(crate) const ID_STRING: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// How segments are laid out in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Organization {
    /// "First the segment header, then the segment data, for each segment in
    /// turn." (D.1)
    Sequential,
    /// "A file header is followed by all the segment headers; the data for
    /// each segment follows, in the same order." (D.2)
    RandomAccess,
    /// No file header and no end-of-page or end-of-file segments; the PDF
    /// `JBIG2Decode` arrangement.
    Embedded,
}

/// Parsed file header (D.4).
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub(crate) organization: Organization,
    /// "This is a 4-byte field, and is not present if the 'unknown number of
    /// pages' bit was 1." (D.4.3)
    pub(crate) page_count: Option<u32>,
}

/// Parse a standalone file: header plus every segment.
pub(crate) fn parse_file(data: &[u8]) -> Result<(FileHeader, Vec<Segment<'_>>)> {
    let mut reader = Reader::new(data);

    let id = reader.read_bytes(8).ok_or(Truncated::UnexpectedEnd)?;
    if id != ID_STRING {
        bail!(MalformedHeader::BadIdString);
    }

    // D.4.2: file header flags. Bit 0 picks the organization, bit 1 marks an
    // unknown page count; bits 2 and 3 declare 12-AT-pixel templates and
    // coloured segments, which are rejected where they actually occur.
    let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
    if flags & 0xF0 != 0 {
        bail!(MalformedHeader::ReservedBits);
    }

    let organization = if flags & 0x01 != 0 {
        Organization::Sequential
    } else {
        Organization::RandomAccess
    };

    let page_count = if flags & 0x02 != 0 {
        None
    } else {
        Some(reader.read_u32().ok_or(Truncated::UnexpectedEnd)?)
    };

    let header = FileHeader {
        organization,
        page_count,
    };

    let segments = match organization {
        Organization::Sequential => read_sequential(&mut reader)?,
        Organization::RandomAccess => read_random_access(&mut reader)?,
        Organization::Embedded => unreachable!("file headers never declare embedded"),
    };

    // "If a file contains an end of file segment, it must be the last
    // segment." (7.4.11)
    if segments
        .iter()
        .position(|segment| segment.header.segment_type == SegmentType::EndOfFile)
        .is_some_and(|at| at + 1 != segments.len())
    {
        bail!(InconsistentState::EndOfFileNotLast);
    }

    Ok((header, segments))
}

/// Parse pre-segmented embedded input. Every chunk holds whole segments in
/// sequential layout.
pub(crate) fn parse_embedded<'a>(chunks: &[&'a [u8]]) -> Result<Vec<Segment<'a>>> {
    let mut segments = Vec::new();
    for chunk in chunks {
        let mut reader = Reader::new(chunk);
        segments.extend(read_sequential(&mut reader)?);
    }
    Ok(segments)
}

/// "The two parts of each segment are stored together: first the segment
/// header then the segment data." (D.1)
fn read_sequential<'a>(reader: &mut Reader<'a>) -> Result<Vec<Segment<'a>>> {
    let mut segments = Vec::new();

    while !reader.at_end() {
        let header = parse_header(reader)?;
        let data = read_data(reader, &header)?;
        segments.push(Segment { header, data });
    }

    Ok(segments)
}

/// "A file header is followed by a sequence of segment headers; the last
/// segment header is followed by the data for the first segment, then the
/// data for the second segment, and so on." (D.2)
fn read_random_access<'a>(reader: &mut Reader<'a>) -> Result<Vec<Segment<'a>>> {
    let mut headers = Vec::new();

    // The end-of-file segment closes the header section; it is what lets a
    // decoder find where the data parts begin.
    loop {
        if reader.at_end() {
            break;
        }

        let header = parse_header(reader)?;
        let done = header.segment_type == SegmentType::EndOfFile;
        headers.push(header);

        if done {
            break;
        }
    }

    let mut segments = Vec::with_capacity(headers.len());
    for header in headers {
        let data = read_data(reader, &header)?;
        segments.push(Segment { header, data });
    }

    Ok(segments)
}
