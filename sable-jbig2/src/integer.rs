//! Arithmetic integer and symbol ID decoding (Annex A).
//!
//! "An invocation of an arithmetic integer decoding procedure involves
//! decoding a sequence of bits, where each bit is decoded using a context
//! formed by the bits decoded previously in this invocation." (A.1)

use crate::arith::{ArithContext, ArithDecoder, fresh_contexts};
use crate::error::{DecoderInternal, Result};

/// The value prefix tree of Figure A.1: after the sign bit, each leading
/// 1-bit moves one row down; the first 0-bit (or five 1-bits) selects the
/// magnitude width and offset.
const MAGNITUDES: [(u8, u32); 6] = [
    (2, 0),
    (4, 4),
    (6, 20),
    (8, 84),
    (12, 340),
    (32, 4436),
];

/// One IAx decoding procedure (A.2) with its own 512-entry context memory.
pub(crate) struct IntDecoder {
    contexts: Vec<ArithContext>,
}

impl IntDecoder {
    pub(crate) fn new() -> Self {
        Self {
            contexts: fresh_contexts(512),
        }
    }

    /// Decode one bit; PREV tracks a leading 1 plus the most recent decoded
    /// bits, capped at nine bits (A.2 step 3).
    #[inline(always)]
    fn bit(&mut self, decoder: &mut ArithDecoder<'_>, prev: &mut u32) -> u32 {
        let d = decoder.decode_bit(&mut self.contexts[*prev as usize]);
        *prev = if *prev < 256 {
            (*prev << 1) | d
        } else {
            (((*prev << 1) | d) & 511) | 256
        };
        d
    }

    fn bits(&mut self, decoder: &mut ArithDecoder<'_>, prev: &mut u32, count: u8) -> u32 {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.bit(decoder, prev);
        }
        value
    }

    /// Decode one signed integer. `None` is the OOB sentinel.
    ///
    /// "The result of the integer arithmetic decoding procedure is: V if
    /// S = 0; -V if S = 1 and V > 0; OOB if S = 1 and V = 0." (A.2)
    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_>) -> Result<Option<i32>> {
        let mut prev: u32 = 1;

        let sign = self.bit(decoder, &mut prev);

        let mut row = 0;
        while row + 1 < MAGNITUDES.len() && self.bit(decoder, &mut prev) == 1 {
            row += 1;
        }
        let (width, offset) = MAGNITUDES[row];
        let magnitude = self.bits(decoder, &mut prev, width) as u64 + offset as u64;

        if sign == 0 {
            i32::try_from(magnitude)
                .map(Some)
                .map_err(|_| DecoderInternal::ValueOverflow.into())
        } else if magnitude == 0 {
            Ok(None)
        } else {
            i32::try_from(magnitude as i64)
                .map(|v| Some(-v))
                .map_err(|_| DecoderInternal::ValueOverflow.into())
        }
    }

    /// Decode, treating OOB as corrupt data.
    pub(crate) fn decode_required(&mut self, decoder: &mut ArithDecoder<'_>) -> Result<i32> {
        self.decode(decoder)?
            .ok_or(DecoderInternal::UnexpectedOob.into())
    }
}

/// The IAID procedure (A.3): a fixed-width symbol ID read through a context
/// tree of `2^(code_length + 1)` entries.
pub(crate) struct IdDecoder {
    contexts: Vec<ArithContext>,
    code_length: u32,
}

impl IdDecoder {
    pub(crate) fn new(code_length: u32) -> Self {
        Self {
            contexts: fresh_contexts(1 << (code_length + 1)),
            code_length,
        }
    }

    /// "2) Decode each bit with CX equal to 'IAID + PREV'. ... 4) The result
    /// is: PREV - 2^SBSYMCODELEN." (A.3)
    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_>) -> u32 {
        let mut prev: u32 = 1;
        for _ in 0..self.code_length {
            let d = decoder.decode_bit(&mut self.contexts[prev as usize]);
            prev = (prev << 1) | d;
        }
        prev - (1 << self.code_length)
    }
}
