/*!
A decoder for CCITT Group 4 (MMR) compressed bi-level images.

This crate implements the two-dimensional coding scheme of ITU-T T.6, the
"Modified Modified READ" compression that JBIG2 (ITU-T T.88) embeds for some
of its bitmaps. Group 3, end-of-line codes and byte-aligned rows are not part
of T.6 and are not implemented.

Decoded pixels are handed to a [`RowSink`] as maximal same-colour runs; the
caller owns the pixel storage and the black/white polarity.

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

use core::fmt;

use crate::bits::BitReader;
use crate::tables::{EOFB, EOFB_BITS, Mode};

mod bits;
mod tables;

/// Errors produced while decoding a Group 4 stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The encoded data ended in the middle of a code word.
    UnexpectedEof,
    /// A bit sequence matched no mode or run-length code, or a vertical mode
    /// placed a changing element left of the current position.
    InvalidCode,
    /// The stream terminated before every requested row was decoded.
    IncompleteImage,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of encoded data"),
            Self::InvalidCode => write!(f, "invalid code in encoded data"),
            Self::IncompleteImage => write!(f, "encoded data ended before the last row"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Result type for Group 4 decoding.
pub type Result<T> = core::result::Result<T, DecodeError>;

/// Decoding parameters known from the surrounding file format.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Width of the image in pixels.
    pub columns: u32,
    /// Number of rows to decode.
    pub rows: u32,
    /// Whether an EOFB sequence may terminate the data. T.6 permits the
    /// marker to be absent when the row count is known in advance.
    pub end_of_block: bool,
}

/// Receives decoded pixels row by row.
pub trait RowSink {
    /// A run of `run` same-coloured pixels. Runs within a row arrive
    /// left-to-right and never extend past `columns`.
    fn push_run(&mut self, black: bool, run: u32);
    /// The current row is complete.
    fn end_row(&mut self);
}

/// Decode a Group 4 encoded image.
///
/// On success, returns the number of bytes consumed from `data`, counted to
/// the byte boundary following the last code word (and the EOFB, when one is
/// present and `end_of_block` is set).
pub fn decode(data: &[u8], sink: &mut impl RowSink, settings: &Settings) -> Result<usize> {
    let mut reader = BitReader::new(data);
    // Changing elements of the reference line. The line above the first row
    // is imaginary and all white, so it has none.
    let mut reference: Vec<u32> = Vec::new();
    let mut decoded_rows = 0;

    loop {
        if settings.end_of_block && reader.peek_bits(EOFB_BITS) == Some(EOFB) {
            reader.skip_bits(EOFB_BITS);
            break;
        }

        if decoded_rows == settings.rows {
            break;
        }

        reference = decode_row(&mut reader, sink, &reference, settings.columns)?;
        sink.end_row();
        decoded_rows += 1;
    }

    if decoded_rows != settings.rows {
        return Err(DecodeError::IncompleteImage);
    }

    reader.align();
    Ok(reader.byte_offset())
}

/// Decode one coding line against the reference line's changing elements.
///
/// `reference` holds the pixel positions where the line above changes colour,
/// in coding order; the element at an even index changes to black, at an odd
/// index back to white. Returns the changing elements of the decoded line.
fn decode_row(
    reader: &mut BitReader<'_>,
    sink: &mut impl RowSink,
    reference: &[u32],
    columns: u32,
) -> Result<Vec<u32>> {
    let mut changes: Vec<u32> = Vec::new();
    // Pixels emitted so far; equals the position of a0 once the first mode
    // has been coded.
    let mut row_len: u32 = 0;
    let mut black = false;
    let mut at_start = true;
    // Cache for the b1 search; transitions left of a0 never qualify again.
    let mut search_from: usize = 0;

    // Changing elements at or past the end of the line act as `columns`.
    let position = |index: usize| reference.get(index).copied().unwrap_or(columns);

    let mut push = |sink: &mut dyn RowSink, black: bool, run: u32, row_len: &mut u32| {
        let run = run.min(columns - *row_len);
        if run > 0 {
            sink.push_run(black, run);
            *row_len += run;
        }
    };

    while row_len < columns {
        // "b1: The first changing element on the reference line to the right
        // of a0 and of opposite colour to a0 colour." (T.4, 4.2.1.3.1)
        let a0: i64 = if at_start { -1 } else { row_len as i64 };
        while search_from < reference.len() && (reference[search_from] as i64) <= a0 {
            search_from += 1;
        }
        // Even indices change towards black; step once if the colour is off.
        let mut b_index = search_from;
        if (b_index % 2 == 0) != !black {
            b_index += 1;
        }
        let b1 = position(b_index);
        let b2 = position(b_index + 1);

        match reader.decode_mode()? {
            // "When a vertical mode is identified, the position of a1 is
            // coded relative to the position of b1." (T.6, 2.2.3)
            Mode::Vertical(delta) => {
                let a1 = b1 as i64 + delta as i64;
                let run = a1 - row_len as i64;
                if run < 0 || (at_start && a1 < 0) {
                    return Err(DecodeError::InvalidCode);
                }
                push(sink, black, run as u32, &mut row_len);
                changes.push(row_len.min(columns));
                black = !black;
            }
            // "When a horizontal mode is identified, the run-lengths a0a1 and
            // a1a2 are coded using the code words of T.4." (T.6, 2.2.3)
            Mode::Horizontal => {
                let first = reader.decode_run(black)?;
                let second = reader.decode_run(!black)?;
                push(sink, black, first, &mut row_len);
                changes.push(row_len.min(columns));
                push(sink, !black, second, &mut row_len);
                changes.push(row_len.min(columns));
            }
            // "When a pass mode is identified, the position of b2 is taken as
            // the new position of a0." (T.6, 2.2.2)
            Mode::Pass => {
                let run = b2 - row_len;
                push(sink, black, run, &mut row_len);
            }
        }

        at_start = false;
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rows {
        current: Vec<bool>,
        rows: Vec<Vec<bool>>,
    }

    impl Rows {
        fn new() -> Self {
            Self {
                current: Vec::new(),
                rows: Vec::new(),
            }
        }
    }

    impl RowSink for Rows {
        fn push_run(&mut self, black: bool, run: u32) {
            self.current.extend(std::iter::repeat_n(black, run as usize));
        }

        fn end_row(&mut self) {
            self.rows.push(std::mem::take(&mut self.current));
        }
    }

    fn settings(columns: u32, rows: u32) -> Settings {
        Settings {
            columns,
            rows,
            end_of_block: true,
        }
    }

    #[test]
    fn all_white_rows() {
        // Each all-white 8-pixel row is a single V(0) against the imaginary
        // white line: one "1" bit per row.
        let mut sink = Rows::new();
        let consumed = decode(&[0b1100_0000], &mut sink, &settings(8, 2)).unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(sink.rows, vec![vec![false; 8], vec![false; 8]]);
    }

    #[test]
    fn horizontal_then_vertical() {
        // Row 1: horizontal mode, white 4 + black 4.
        //   001 1011 011
        // Row 2 copies it with two V(0) codes: 11.
        let mut sink = Rows::new();
        let data = [0b0011_0110, 0b1111_0000];
        let consumed = decode(&data, &mut sink, &settings(8, 2)).unwrap();
        assert_eq!(consumed, 2);

        let expected_row = [vec![false; 4], vec![true; 4]].concat();
        assert_eq!(sink.rows, vec![expected_row.clone(), expected_row]);
    }

    #[test]
    fn trailing_eofb_is_consumed() {
        // One all-white row, then EOFB (24 bits), zero-padded.
        let data = [
            0b1_0000000,
            0b00001000,
            0b00000000,
            0b1_0000000,
        ];
        let mut sink = Rows::new();
        let consumed = decode(&data, &mut sink, &settings(8, 1)).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(sink.rows.len(), 1);
    }

    #[test]
    fn missing_rows_are_an_error() {
        let mut sink = Rows::new();
        assert_eq!(
            decode(&[], &mut sink, &settings(8, 1)),
            Err(DecodeError::UnexpectedEof)
        );

        // Zero padding after the first row decodes to no valid mode code.
        let mut sink = Rows::new();
        assert_eq!(
            decode(&[0b1000_0000], &mut sink, &settings(8, 2)),
            Err(DecodeError::InvalidCode)
        );
    }
}
