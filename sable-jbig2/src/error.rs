//! Error types for JBIG2 decoding.
//!
//! Errors are value-returned and grouped into six categories. A decode error
//! is fatal for the affected page: the decoder caches it and keeps returning
//! it, and no partial page bitmap is ever surfaced.

use core::fmt;

/// The main error type for JBIG2 decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Structurally invalid bytes: bad ID string, reserved bits, reserved
    /// field values.
    MalformedHeader(MalformedHeader),
    /// A value points outside its legal domain.
    OutOfRange(OutOfRange),
    /// The input ended before a structure was complete.
    Truncated(Truncated),
    /// A feature the format defines but this decoder deliberately rejects.
    Unsupported(Unsupported),
    /// Segments that individually parse but contradict each other or the
    /// rules of page composition.
    InconsistentState(InconsistentState),
    /// Entropy-coded data that decodes to something impossible.
    DecoderInternal(DecoderInternal),
}

/// Structurally invalid header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedHeader {
    /// The file does not start with the JBIG2 ID string.
    BadIdString,
    /// Reserved bits in a file, segment, region or page flags field are set.
    ReservedBits,
    /// The segment type value is reserved (7.3).
    UnknownSegmentType,
    /// The referred-to segment count subfield holds 5 or 6 (7.2.4).
    InvalidReferredToCount,
    /// An unknown data length on a segment other than an immediate generic
    /// region (7.2.7).
    UnknownDataLength,
    /// A combination operator value outside its field's legal set.
    InvalidCombinationOperator,
    /// A Huffman table selection holds a reserved value.
    InvalidHuffmanSelection,
    /// A segment's data part has the wrong size for its type.
    WrongSegmentSize,
}

/// Values pointing outside their legal domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRange {
    /// A segment refers to a segment number not smaller than its own.
    ForwardReference,
    /// A region segment's bounding box leaves the page.
    RegionOutsidePage,
    /// An adaptive template pixel outside the legal half-plane (Figure 7).
    AdaptivePixel,
    /// A wire-level symbol or pattern index past the end of its pool.
    SymbolIndex,
    /// A frame request past the last page.
    PageIndex,
}

/// Input ended before a structure was complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncated {
    /// The reader ran out of bytes.
    UnexpectedEnd,
    /// A segment's declared data length exceeds the remaining input.
    SegmentData,
    /// No end sequence was found for an unknown-length generic region.
    MissingEndSequence,
}

/// Features deliberately rejected rather than mis-decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// EXTTEMPLATE generic region coding (12 AT pixels).
    ExtendedTemplate,
    /// Standard Huffman tables C, E and O (B.3, B.5, B.15).
    StandardHuffmanTable,
    /// Colour extensions: COLEXTFLAG regions and palette segments.
    Colour,
    /// Typical prediction in generic refinement regions (TPGRON).
    RefinementTypicalPrediction,
    /// MMR-coded grayscale images (Annex C with GSMMR = 1).
    MmrGrayScale,
    /// Refinement/aggregate symbol coding with more than one instance.
    AggregateInstances,
    /// Refinement coding driven by Huffman tables.
    HuffmanRefinement,
    /// Intermediate (non-immediate) region segments.
    IntermediateRegion,
    /// Profiles segments.
    Profiles,
    /// An extension segment the decoder must understand but does not.
    Extension,
}

/// Segments that contradict each other or page composition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistentState {
    /// More than one page information segment for one page.
    MultiplePageInformation,
    /// A page without a page information segment, or a region segment before
    /// it.
    MissingPageInformation,
    /// A file-organization page without an end-of-page segment.
    MissingEndOfPage,
    /// An end-of-page segment in an embedded stream.
    UnexpectedEndOfPage,
    /// A segment other than end-of-file after the end-of-page segment.
    SegmentAfterEndOfPage,
    /// An end-of-file segment that is not the last segment.
    EndOfFileNotLast,
    /// An end-of-stripe segment on a non-striped page, before the page
    /// information segment, or missing on a striped page.
    UnexpectedEndOfStripe,
    /// End-of-stripe Y coordinates that do not increase, or exceed the page.
    StripeCoordinate,
    /// A stripe taller than the page's maximum stripe size.
    StripeTooTall,
    /// A page of unknown height that is not striped.
    UnstripedUnknownHeight,
    /// The file header page count does not match the discovered pages.
    PageCountMismatch,
    /// Two segments share one segment number.
    DuplicateSegmentNumber,
    /// Embedded data with a page count other than one.
    EmbeddedPageCount,
    /// A region's external combination operator contradicts the page's
    /// default operator rules (7.4.8.5 NOTE 1).
    CombinationOperatorConflict,
}

/// Entropy-coded data that decodes to something impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInternal {
    /// OOB decoded where a real integer is required.
    UnexpectedOob,
    /// A bit sequence matching no code in a Huffman table.
    InvalidHuffmanCode,
    /// A decoded symbol or pattern index past the end of its pool.
    SymbolIndex,
    /// The export filter selected a number of symbols other than the
    /// declared count.
    ExportCount,
    /// More symbols or instances decoded than the header declared.
    TooManySymbols,
    /// A decoded value or dimension that overflows its domain.
    ValueOverflow,
    /// A referred-to segment carries no artifact of the required kind.
    MissingArtifact,
    /// The embedded MMR decoder rejected its data.
    MmrData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader(e) => write!(f, "malformed header: {e}"),
            Self::OutOfRange(e) => write!(f, "out of range: {e}"),
            Self::Truncated(e) => write!(f, "truncated input: {e}"),
            Self::Unsupported(e) => write!(f, "unsupported feature: {e}"),
            Self::InconsistentState(e) => write!(f, "inconsistent stream: {e}"),
            Self::DecoderInternal(e) => write!(f, "corrupt coded data: {e}"),
        }
    }
}

impl fmt::Display for MalformedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadIdString => write!(f, "invalid JBIG2 ID string"),
            Self::ReservedBits => write!(f, "reserved flag bits must be zero"),
            Self::UnknownSegmentType => write!(f, "reserved segment type"),
            Self::InvalidReferredToCount => write!(f, "reserved referred-to segment count"),
            Self::UnknownDataLength => {
                write!(f, "unknown data length outside an immediate generic region")
            }
            Self::InvalidCombinationOperator => write!(f, "invalid combination operator"),
            Self::InvalidHuffmanSelection => write!(f, "reserved Huffman table selection"),
            Self::WrongSegmentSize => write!(f, "segment data has the wrong size"),
        }
    }
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForwardReference => write!(f, "segment refers to a larger segment number"),
            Self::RegionOutsidePage => write!(f, "region outside the page"),
            Self::AdaptivePixel => write!(f, "adaptive template pixel outside the legal field"),
            Self::SymbolIndex => write!(f, "symbol index out of range"),
            Self::PageIndex => write!(f, "page index out of range"),
        }
    }
}

impl fmt::Display for Truncated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "unexpected end of data"),
            Self::SegmentData => write!(f, "segment data length exceeds the input"),
            Self::MissingEndSequence => {
                write!(f, "no end sequence in unknown-length region data")
            }
        }
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtendedTemplate => write!(f, "extended reference template"),
            Self::StandardHuffmanTable => write!(f, "standard Huffman table C, E or O"),
            Self::Colour => write!(f, "colour extension"),
            Self::RefinementTypicalPrediction => {
                write!(f, "typical prediction in refinement regions")
            }
            Self::MmrGrayScale => write!(f, "MMR-coded grayscale image"),
            Self::AggregateInstances => write!(f, "more than one aggregate symbol instance"),
            Self::HuffmanRefinement => write!(f, "Huffman-coded refinement"),
            Self::IntermediateRegion => write!(f, "intermediate region segment"),
            Self::Profiles => write!(f, "profiles segment"),
            Self::Extension => write!(f, "unknown necessary extension"),
        }
    }
}

impl fmt::Display for InconsistentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultiplePageInformation => write!(f, "multiple page information segments"),
            Self::MissingPageInformation => write!(f, "missing page information segment"),
            Self::MissingEndOfPage => write!(f, "missing end-of-page segment"),
            Self::UnexpectedEndOfPage => write!(f, "end-of-page segment in embedded stream"),
            Self::SegmentAfterEndOfPage => write!(f, "segment after end-of-page"),
            Self::EndOfFileNotLast => write!(f, "end-of-file segment is not last"),
            Self::UnexpectedEndOfStripe => write!(f, "misplaced end-of-stripe segment"),
            Self::StripeCoordinate => write!(f, "end-of-stripe coordinate not increasing"),
            Self::StripeTooTall => write!(f, "stripe taller than the maximum stripe size"),
            Self::UnstripedUnknownHeight => {
                write!(f, "page of unknown height is not striped")
            }
            Self::PageCountMismatch => write!(f, "page count does not match the file header"),
            Self::DuplicateSegmentNumber => write!(f, "duplicate segment number"),
            Self::EmbeddedPageCount => write!(f, "embedded data must contain exactly one page"),
            Self::CombinationOperatorConflict => {
                write!(f, "combination operator conflicts with the page default")
            }
        }
    }
}

impl fmt::Display for DecoderInternal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedOob => write!(f, "out-of-band value where an integer is required"),
            Self::InvalidHuffmanCode => write!(f, "invalid Huffman code"),
            Self::SymbolIndex => write!(f, "decoded symbol index out of range"),
            Self::ExportCount => write!(f, "exported symbol count mismatch"),
            Self::TooManySymbols => write!(f, "more symbols decoded than declared"),
            Self::ValueOverflow => write!(f, "decoded value overflows its domain"),
            Self::MissingArtifact => write!(f, "referred-to segment has no usable output"),
            Self::MmrData => write!(f, "invalid MMR data"),
        }
    }
}

impl core::error::Error for DecodeError {}
impl core::error::Error for MalformedHeader {}
impl core::error::Error for OutOfRange {}
impl core::error::Error for Truncated {}
impl core::error::Error for Unsupported {}
impl core::error::Error for InconsistentState {}
impl core::error::Error for DecoderInternal {}

impl From<MalformedHeader> for DecodeError {
    fn from(e: MalformedHeader) -> Self {
        Self::MalformedHeader(e)
    }
}

impl From<OutOfRange> for DecodeError {
    fn from(e: OutOfRange) -> Self {
        Self::OutOfRange(e)
    }
}

impl From<Truncated> for DecodeError {
    fn from(e: Truncated) -> Self {
        Self::Truncated(e)
    }
}

impl From<Unsupported> for DecodeError {
    fn from(e: Unsupported) -> Self {
        Self::Unsupported(e)
    }
}

impl From<InconsistentState> for DecodeError {
    fn from(e: InconsistentState) -> Self {
        Self::InconsistentState(e)
    }
}

impl From<DecoderInternal> for DecodeError {
    fn from(e: DecoderInternal) -> Self {
        Self::DecoderInternal(e)
    }
}

/// Result type for JBIG2 decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($err.into())
    };
}

pub(crate) use bail;
pub(crate) use err;
