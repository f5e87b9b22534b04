//! Huffman-coded integers (Annex B).
//!
//! A table is an ordered list of [`Code`] rows plus an out-of-band flag.
//! Decoding walks the bit stream one bit at a time and scans the rows for a
//! prefix match (B.4); the row then supplies a range of values, one of which
//! is picked by `range_length` extra bits. Prefix codes themselves are
//! assigned canonically from the rows' prefix lengths (B.3).

use std::sync::LazyLock;

use crate::error::{DecodeError, DecoderInternal, MalformedHeader, Result, Truncated, bail};
use crate::reader::Reader;

/// Flags a lower-range row in [`Code::prefix_length`]: the range extension
/// counts downwards from the row's value.
const LOWER_RANGE: u8 = 0x80;

/// One row of a Huffman table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Code {
    /// PREFLEN, with the high bit flagging a lower-range row. Zero means the
    /// row is unused. ("Note that the PREFLEN value 0 indicates that the
    /// table line is never used.", B.3)
    prefix_length: u8,
    /// RANGELEN: number of extension bits following the prefix.
    range_length: u8,
    /// RANGELOW; `None` marks the out-of-band row.
    first_value: Option<i32>,
    /// The canonical prefix code, assigned by B.3.
    code: u32,
}

impl Code {
    /// A row covering `first_value .. first_value + 2^range_length - 1`.
    pub(crate) const fn value(first_value: i32, prefix_length: u8, range_length: u8) -> Self {
        Self {
            prefix_length,
            range_length,
            first_value: Some(first_value),
            code: 0,
        }
    }

    /// The 32-bit lower range row, covering `..= first_value`.
    pub(crate) const fn lower(first_value: i32, prefix_length: u8) -> Self {
        Self {
            prefix_length: prefix_length | LOWER_RANGE,
            range_length: 32,
            first_value: Some(first_value),
            code: 0,
        }
    }

    /// The 32-bit upper range row, covering `first_value ..`.
    pub(crate) const fn upper(first_value: i32, prefix_length: u8) -> Self {
        Self::value(first_value, prefix_length, 32)
    }

    /// The out-of-band row (present only when HTOOB is 1).
    pub(crate) const fn oob(prefix_length: u8) -> Self {
        Self {
            prefix_length,
            range_length: 0,
            first_value: None,
            code: 0,
        }
    }

    #[inline(always)]
    fn len(&self) -> u8 {
        self.prefix_length & !LOWER_RANGE
    }

    #[inline(always)]
    fn is_lower_range(&self) -> bool {
        self.prefix_length & LOWER_RANGE != 0
    }
}

/// An assembled Huffman table.
#[derive(Debug, Clone)]
pub(crate) struct HuffmanTable {
    codes: Vec<Code>,
    has_oob: bool,
    longest_prefix: u8,
}

impl HuffmanTable {
    /// Assign prefix codes to the given rows (B.3) and build the table.
    pub(crate) fn new(mut codes: Vec<Code>) -> Self {
        let longest_prefix = codes.iter().map(Code::len).max().unwrap_or(0);

        // "1) Build a histogram in the array LENCOUNT counting the number of
        // times each prefix length value occurs." (B.3)
        let mut count_per_length = vec![0_u32; longest_prefix as usize + 1];
        for code in &codes {
            count_per_length[code.len() as usize] += 1;
        }
        count_per_length[0] = 0;

        // "3) a) Set FIRSTCODE[CURLEN] =
        //        (FIRSTCODE[CURLEN - 1] + LENCOUNT[CURLEN - 1]) * 2" (B.3)
        let mut next_code = 0_u32;
        let mut previous_count = 0_u32;
        for length in 1..=longest_prefix {
            next_code = (next_code + previous_count) << 1;
            previous_count = count_per_length[length as usize];

            // "b) i) If PREFLEN[CURTEMP] = CURLEN, then set
            //        CODES[CURTEMP] = CURCODE, CURCODE = CURCODE + 1" (B.3)
            let mut current = next_code;
            for code in &mut codes {
                if code.len() == length {
                    code.code = current;
                    current += 1;
                }
            }
        }

        let has_oob = codes
            .iter()
            .any(|code| code.first_value.is_none() && code.len() > 0);

        Self {
            codes,
            has_oob,
            longest_prefix,
        }
    }

    pub(crate) fn has_oob(&self) -> bool {
        self.has_oob
    }

    /// Read one symbol (B.4). `None` is the out-of-band value.
    pub(crate) fn decode(&self, reader: &mut Reader<'_>) -> Result<Option<i32>> {
        let mut word = 0_u32;
        let mut length = 0_u8;

        loop {
            if length == self.longest_prefix {
                bail!(DecoderInternal::InvalidHuffmanCode);
            }

            let bit = reader.read_bit().ok_or(Truncated::UnexpectedEnd)?;
            word = (word << 1) | bit as u32;
            length += 1;

            let Some(row) = self
                .codes
                .iter()
                .find(|row| row.len() == length && row.code == word)
            else {
                continue;
            };

            let Some(first_value) = row.first_value else {
                return Ok(None);
            };

            // "2) Decode the HTOFFSET value by reading RANGELEN bits." (B.4)
            let offset = reader
                .read_bits(row.range_length)
                .ok_or(Truncated::UnexpectedEnd)?;

            let value = if row.is_lower_range() {
                first_value as i64 - offset as i64
            } else {
                first_value as i64 + offset as i64
            };

            return i32::try_from(value)
                .map(Some)
                .map_err(|_| DecoderInternal::ValueOverflow.into());
        }
    }

    /// Read one symbol, treating OOB as corrupt data.
    pub(crate) fn decode_required(&self, reader: &mut Reader<'_>) -> Result<i32> {
        self.decode(reader)?
            .ok_or(DecoderInternal::UnexpectedOob.into())
    }

    /// Parse a code table segment's data part (B.2) into a table.
    pub(crate) fn from_stream(reader: &mut Reader<'_>) -> Result<Self> {
        // "Bit 0 is HTOOB. Bits 1-3 specify HTPS - 1. Bits 4-6 specify
        // HTRS - 1. Bit 7 is reserved; it must be 0." (B.2.1)
        let flags = reader.read_u8().ok_or(Truncated::UnexpectedEnd)?;
        if flags & 0x80 != 0 {
            bail!(MalformedHeader::ReservedBits);
        }
        let has_oob = flags & 1 != 0;
        let prefix_bits = ((flags >> 1) & 7) + 1;
        let range_bits = ((flags >> 4) & 7) + 1;

        let low = reader.read_i32().ok_or(Truncated::UnexpectedEnd)?;
        let high = reader.read_i32().ok_or(Truncated::UnexpectedEnd)?;

        // "Each table line covers CURRANGELOW up to but not including the
        // next line's lower bound; stop once CURRANGELOW >= HTHIGH." (B.2)
        let mut codes = Vec::new();
        let mut next_low = low as i64;

        while next_low < high as i64 {
            let prefix_length = reader.read_bits(prefix_bits).ok_or(Truncated::UnexpectedEnd)?;
            let range_length = reader.read_bits(range_bits).ok_or(Truncated::UnexpectedEnd)?;
            if range_length > 32 {
                bail!(DecoderInternal::ValueOverflow);
            }

            let first = i32::try_from(next_low).map_err(|_| DecoderInternal::ValueOverflow)?;
            codes.push(Code::value(first, prefix_length as u8, range_length as u8));

            next_low += 1_i64 << range_length;
        }

        // The two open-ended rows and, with HTOOB, the out-of-band row.
        let lower_prefix = reader.read_bits(prefix_bits).ok_or(Truncated::UnexpectedEnd)?;
        codes.push(Code::lower(
            low.checked_sub(1).ok_or(DecodeError::DecoderInternal(
                DecoderInternal::ValueOverflow,
            ))?,
            lower_prefix as u8,
        ));

        let upper_prefix = reader.read_bits(prefix_bits).ok_or(Truncated::UnexpectedEnd)?;
        let upper_first = i32::try_from(next_low).map_err(|_| DecoderInternal::ValueOverflow)?;
        codes.push(Code::upper(upper_first, upper_prefix as u8));

        if has_oob {
            let oob_prefix = reader.read_bits(prefix_bits).ok_or(Truncated::UnexpectedEnd)?;
            codes.push(Code::oob(oob_prefix as u8));
        }

        Ok(Self::new(codes))
    }
}

/// Table B.1 - Standard Huffman table A (HTOOB = 0).
pub(crate) static TABLE_A: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(0, 1, 4),
        Code::value(16, 2, 8),
        Code::value(272, 3, 16),
        Code::upper(65808, 3),
    ])
});

/// Table B.2 - Standard Huffman table B (HTOOB = 1).
pub(crate) static TABLE_B: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(0, 1, 0),
        Code::value(1, 2, 0),
        Code::value(2, 3, 0),
        Code::value(3, 4, 3),
        Code::value(11, 5, 6),
        Code::upper(75, 6),
        Code::oob(6),
    ])
});

/// Table B.4 - Standard Huffman table D (HTOOB = 0).
pub(crate) static TABLE_D: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(1, 1, 0),
        Code::value(2, 2, 0),
        Code::value(3, 3, 0),
        Code::value(4, 4, 3),
        Code::value(12, 5, 6),
        Code::upper(76, 5),
    ])
});

/// Table B.6 - Standard Huffman table F (HTOOB = 0).
pub(crate) static TABLE_F: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-2048, 5, 10),
        Code::value(-1024, 4, 9),
        Code::value(-512, 4, 8),
        Code::value(-256, 4, 7),
        Code::value(-128, 5, 6),
        Code::value(-64, 5, 5),
        Code::value(-32, 4, 5),
        Code::value(0, 2, 7),
        Code::value(128, 3, 7),
        Code::value(256, 3, 8),
        Code::value(512, 4, 9),
        Code::value(1024, 4, 10),
        Code::lower(-2049, 6),
        Code::upper(2048, 6),
    ])
});

/// Table B.7 - Standard Huffman table G (HTOOB = 0).
pub(crate) static TABLE_G: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-1024, 4, 9),
        Code::value(-512, 3, 8),
        Code::value(-256, 4, 7),
        Code::value(-128, 5, 6),
        Code::value(-64, 5, 5),
        Code::value(-32, 4, 5),
        Code::value(0, 4, 5),
        Code::value(32, 5, 5),
        Code::value(64, 5, 6),
        Code::value(128, 4, 7),
        Code::value(256, 3, 8),
        Code::value(512, 3, 9),
        Code::value(1024, 3, 10),
        Code::lower(-1025, 5),
        Code::upper(2048, 5),
    ])
});

/// Table B.8 - Standard Huffman table H (HTOOB = 1).
pub(crate) static TABLE_H: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-15, 8, 3),
        Code::value(-7, 9, 1),
        Code::value(-5, 8, 1),
        Code::value(-3, 9, 0),
        Code::value(-2, 7, 0),
        Code::value(-1, 4, 0),
        Code::value(0, 2, 1),
        Code::value(2, 5, 0),
        Code::value(3, 6, 0),
        Code::value(4, 3, 4),
        Code::value(20, 6, 1),
        Code::value(22, 4, 4),
        Code::value(38, 4, 5),
        Code::value(70, 5, 6),
        Code::value(134, 5, 7),
        Code::value(262, 6, 7),
        Code::value(390, 7, 8),
        Code::value(646, 6, 10),
        Code::lower(-16, 9),
        Code::upper(1670, 9),
        Code::oob(2),
    ])
});

/// Table B.9 - Standard Huffman table I (HTOOB = 1).
pub(crate) static TABLE_I: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-31, 8, 4),
        Code::value(-15, 9, 2),
        Code::value(-11, 8, 2),
        Code::value(-7, 9, 1),
        Code::value(-5, 7, 1),
        Code::value(-3, 4, 1),
        Code::value(-1, 3, 1),
        Code::value(1, 3, 1),
        Code::value(3, 5, 1),
        Code::value(5, 6, 1),
        Code::value(7, 3, 5),
        Code::value(39, 6, 2),
        Code::value(43, 4, 5),
        Code::value(75, 4, 6),
        Code::value(139, 5, 7),
        Code::value(267, 5, 8),
        Code::value(523, 6, 8),
        Code::value(779, 7, 9),
        Code::value(1291, 6, 11),
        Code::lower(-32, 9),
        Code::upper(3339, 9),
        Code::oob(2),
    ])
});

/// Table B.10 - Standard Huffman table J (HTOOB = 1).
pub(crate) static TABLE_J: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-21, 7, 4),
        Code::value(-5, 8, 0),
        Code::value(-4, 7, 0),
        Code::value(-3, 5, 0),
        Code::value(-2, 2, 2),
        Code::value(2, 5, 0),
        Code::value(3, 6, 0),
        Code::value(4, 7, 0),
        Code::value(5, 8, 0),
        Code::value(6, 2, 6),
        Code::value(70, 5, 5),
        Code::value(102, 6, 5),
        Code::value(134, 6, 6),
        Code::value(198, 6, 7),
        Code::value(326, 6, 8),
        Code::value(582, 6, 9),
        Code::value(1094, 6, 10),
        Code::value(2118, 7, 11),
        Code::lower(-22, 8),
        Code::upper(4166, 8),
        Code::oob(2),
    ])
});

/// Table B.11 - Standard Huffman table K (HTOOB = 0).
pub(crate) static TABLE_K: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(1, 1, 0),
        Code::value(2, 2, 1),
        Code::value(4, 4, 0),
        Code::value(5, 4, 1),
        Code::value(7, 5, 1),
        Code::value(9, 5, 2),
        Code::value(13, 6, 2),
        Code::value(17, 7, 2),
        Code::value(21, 7, 3),
        Code::value(29, 7, 4),
        Code::value(45, 7, 5),
        Code::value(77, 7, 6),
        Code::upper(141, 7),
    ])
});

/// Table B.12 - Standard Huffman table L (HTOOB = 0).
pub(crate) static TABLE_L: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(1, 1, 0),
        Code::value(2, 2, 0),
        Code::value(3, 3, 1),
        Code::value(5, 5, 0),
        Code::value(6, 5, 1),
        Code::value(8, 6, 1),
        Code::value(10, 7, 0),
        Code::value(11, 7, 1),
        Code::value(13, 7, 2),
        Code::value(17, 7, 3),
        Code::value(25, 7, 4),
        Code::value(41, 8, 5),
        Code::upper(73, 8),
    ])
});

/// Table B.13 - Standard Huffman table M (HTOOB = 0).
pub(crate) static TABLE_M: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(1, 1, 0),
        Code::value(2, 3, 0),
        Code::value(3, 4, 0),
        Code::value(4, 5, 0),
        Code::value(5, 4, 1),
        Code::value(7, 3, 3),
        Code::value(15, 6, 1),
        Code::value(17, 6, 2),
        Code::value(21, 6, 3),
        Code::value(29, 6, 4),
        Code::value(45, 6, 5),
        Code::value(77, 7, 6),
        Code::upper(141, 7),
    ])
});

/// Table B.14 - Standard Huffman table N (HTOOB = 0).
pub(crate) static TABLE_N: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::new(vec![
        Code::value(-2, 3, 0),
        Code::value(-1, 3, 0),
        Code::value(0, 1, 0),
        Code::value(1, 3, 0),
        Code::value(2, 3, 0),
    ])
});
