//! The adaptive binary arithmetic decoder (Annex E).
//!
//! "The arithmetic decoding procedure receives an arithmetically coded bit
//! sequence and an associated sequence of context labels, and reconstructs
//! the original string of binary symbols." (E.1.1)

/// Per-context adaptation state: an index into the Qe table and the current
/// MPS sense (E.2.4). "Resetting statistics to zero" zeroes both fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ArithContext {
    pub(crate) index: u8,
    pub(crate) mps: u8,
}

/// Decoder state per Table E.1: the C register, the interval register A, the
/// renormalization bit counter CT, and the data pointer BP.
pub(crate) struct ArithDecoder<'a> {
    data: &'a [u8],
    c: u32,
    a: u32,
    ct: u32,
    bp: usize,
}

impl<'a> ArithDecoder<'a> {
    /// INITDEC (E.3.5): load the first two bytes into C and prime A.
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            c: 0,
            a: 0,
            ct: 0,
            bp: 0,
        };

        decoder.c = ((decoder.byte(0) as u32) ^ 0xFF) << 16;
        decoder.byte_in();
        decoder.c <<= 7;
        decoder.ct -= 7;
        decoder.a = 0x8000;

        decoder
    }

    /// Reads beyond the data act like marker bytes.
    #[inline(always)]
    fn byte(&self, offset: usize) -> u8 {
        self.data.get(self.bp + offset).copied().unwrap_or(0xFF)
    }

    /// BYTEIN (E.3.4): feed one byte into C, honouring the 0xFF stuffing
    /// convention. A byte above 0x8F after an 0xFF is a marker; the decoder
    /// then feeds 1-bits forever instead of advancing.
    fn byte_in(&mut self) {
        if self.byte(0) == 0xFF {
            if self.byte(1) > 0x8F {
                self.ct = 8;
            } else {
                self.bp += 1;
                self.c = self
                    .c
                    .wrapping_add(0xFE00)
                    .wrapping_sub((self.byte(0) as u32) << 9);
                self.ct = 7;
            }
        } else {
            self.bp += 1;
            self.c = self
                .c
                .wrapping_add(0xFF00)
                .wrapping_sub((self.byte(0) as u32) << 8);
            self.ct = 8;
        }
    }

    /// RENORMD (E.3.3): shift A and C left until bit 15 of A is set again.
    #[inline(always)]
    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;

            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// DECODE (E.3.2): decode one bit under the given context.
    #[inline(always)]
    pub(crate) fn decode_bit(&mut self, cx: &mut ArithContext) -> u32 {
        let (qe, nmps, nlps, switch) = QE[cx.index as usize];
        self.a -= qe;

        if (self.c >> 16) < self.a {
            if self.a & 0x8000 != 0 {
                return cx.mps as u32;
            }

            // MPS_EXCHANGE (Figure E.16).
            let d;
            if self.a < qe {
                d = 1 - cx.mps as u32;
                if switch {
                    cx.mps = 1 - cx.mps;
                }
                cx.index = nlps;
            } else {
                d = cx.mps as u32;
                cx.index = nmps;
            }
            self.renormalize();
            d
        } else {
            self.c -= self.a << 16;

            // LPS_EXCHANGE (Figure E.17).
            let d;
            if self.a < qe {
                d = cx.mps as u32;
                cx.index = nmps;
            } else {
                d = 1 - cx.mps as u32;
                if switch {
                    cx.mps = 1 - cx.mps;
                }
                cx.index = nlps;
            }
            self.a = qe;
            self.renormalize();
            d
        }
    }
}

/// "Table E.1 - Qe values and probability estimation process":
/// `(Qe, NMPS, NLPS, SWITCH)` per state.
#[rustfmt::skip]
const QE: [(u32, u8, u8, bool); 47] = [
    (0x5601,  1,  1, true),
    (0x3401,  2,  6, false),
    (0x1801,  3,  9, false),
    (0x0AC1,  4, 12, false),
    (0x0521,  5, 29, false),
    (0x0221, 38, 33, false),
    (0x5601,  7,  6, true),
    (0x5401,  8, 14, false),
    (0x4801,  9, 14, false),
    (0x3801, 10, 14, false),
    (0x3001, 11, 17, false),
    (0x2401, 12, 18, false),
    (0x1C01, 13, 20, false),
    (0x1601, 29, 21, false),
    (0x5601, 15, 14, true),
    (0x5401, 16, 14, false),
    (0x5101, 17, 15, false),
    (0x4801, 18, 16, false),
    (0x3801, 19, 17, false),
    (0x3401, 20, 18, false),
    (0x3001, 21, 19, false),
    (0x2801, 22, 19, false),
    (0x2401, 23, 20, false),
    (0x2201, 24, 21, false),
    (0x1C01, 25, 22, false),
    (0x1801, 26, 23, false),
    (0x1601, 27, 24, false),
    (0x1401, 28, 25, false),
    (0x1201, 29, 26, false),
    (0x1101, 30, 27, false),
    (0x0AC1, 31, 28, false),
    (0x09C1, 32, 29, false),
    (0x08A1, 33, 30, false),
    (0x0521, 34, 31, false),
    (0x0441, 35, 32, false),
    (0x02A1, 36, 33, false),
    (0x0221, 37, 34, false),
    (0x0141, 38, 35, false),
    (0x0111, 39, 36, false),
    (0x0085, 40, 37, false),
    (0x0049, 41, 38, false),
    (0x0025, 42, 39, false),
    (0x0015, 43, 40, false),
    (0x0009, 44, 41, false),
    (0x0005, 45, 42, false),
    (0x0001, 45, 43, false),
    (0x5601, 46, 46, false),
];

/// A zeroed context vector of the given size.
pub(crate) fn fresh_contexts(count: usize) -> Vec<ArithContext> {
    vec![ArithContext::default(); count]
}
