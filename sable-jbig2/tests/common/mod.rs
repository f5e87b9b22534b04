//! Test-side JBIG2 encoders and stream builders.
//!
//! The arithmetic coder follows the encoder flowcharts of ITU-T T.88 Annex E
//! (CODEMPS, CODELPS, BYTEOUT, FLUSH), so decoder round-trips run against an
//! independently derived implementation rather than a mirror of the decoder.

#![allow(dead_code)]

/// `(Qe, NMPS, NLPS, SWITCH)` - Table E.1.
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

/// Encoder-side context state, mirroring the decoder's `(index, MPS)` pairs.
#[derive(Clone, Copy, Default)]
pub struct Ctx {
    index: u8,
    mps: u8,
}

/// The Annex E arithmetic encoder.
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: i32,
    b: u8,
    bp: isize,
    out: Vec<u8>,
}

impl MqEncoder {
    /// INITENC (E.3.6.1).
    pub fn new() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            b: 0,
            bp: -1,
            out: Vec::new(),
        }
    }

    fn push_pending(&mut self) {
        if self.bp >= 0 {
            self.out.push(self.b);
        }
    }

    /// BYTEOUT (E.3.7, Figure E.9) with 0xFF bit stuffing.
    fn byte_out(&mut self) {
        if self.b == 0xFF {
            self.push_pending();
            self.b = (self.c >> 20) as u8;
            self.bp += 1;
            self.c &= 0x0F_FFFF;
            self.ct = 7;
            return;
        }

        if self.c < 0x800_0000 {
            self.push_pending();
            self.b = (self.c >> 19) as u8;
            self.bp += 1;
            self.c &= 0x07_FFFF;
            self.ct = 8;
            return;
        }

        // Carry into the pending byte.
        self.b = self.b.wrapping_add(1);
        if self.b == 0xFF {
            self.c &= 0x7FF_FFFF;
            self.push_pending();
            self.b = (self.c >> 20) as u8;
            self.bp += 1;
            self.c &= 0x0F_FFFF;
            self.ct = 7;
        } else {
            self.push_pending();
            self.b = (self.c >> 19) as u8;
            self.bp += 1;
            self.c &= 0x07_FFFF;
            self.ct = 8;
        }
    }

    /// ENCODE (E.3.2): CODEMPS / CODELPS with conditional exchange.
    pub fn encode_bit(&mut self, cx: &mut Ctx, bit: bool) {
        let (qe, nmps, nlps, switch) = QE[cx.index as usize];
        let mps = cx.mps == 1;

        if bit == mps {
            self.a -= qe;
            if self.a & 0x8000 != 0 {
                self.c += qe;
                return;
            }
            // Conditional exchange (Figure E.7).
            if self.a < qe {
                self.a = qe;
            } else {
                self.c += qe;
            }
            cx.index = nmps;
        } else {
            self.a -= qe;
            // Conditional exchange (Figure E.6).
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if switch {
                cx.mps = 1 - cx.mps;
            }
            cx.index = nlps;
        }

        // RENORME (E.3.8).
        while self.a & 0x8000 == 0 {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
        }
    }

    /// FLUSH (E.3.9), optionally with the 0xFF 0xAC terminator used by
    /// unknown-length generic regions.
    pub fn finish(mut self, with_marker: bool) -> Vec<u8> {
        let bound = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= bound {
            self.c -= 0x8000;
        }

        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();

        // A trailing 0xFF may be discarded; the decoder resynthesizes it.
        if self.bp >= 0 && (with_marker || self.b != 0xFF) {
            self.out.push(self.b);
        }
        if with_marker {
            self.out.extend_from_slice(&[0xFF, 0xAC]);
        }

        self.out
    }
}

/// Integer contexts for one IAx procedure (A.2).
pub struct IntCtx(pub [Ctx; 512]);

impl IntCtx {
    pub fn new() -> Self {
        Self([Ctx::default(); 512])
    }
}

const MAGNITUDES: [(u8, u32); 6] = [
    (2, 0),
    (4, 4),
    (6, 20),
    (8, 84),
    (12, 340),
    (32, 4436),
];

/// Encode one IAx value; `None` is OOB (S = 1, V = 0).
pub fn encode_int(enc: &mut MqEncoder, ctx: &mut IntCtx, value: Option<i32>) {
    let mut prev: u32 = 1;
    let mut bit = |enc: &mut MqEncoder, d: bool| {
        enc.encode_bit(&mut ctx.0[prev as usize], d);
        prev = if prev < 256 {
            (prev << 1) | d as u32
        } else {
            (((prev << 1) | d as u32) & 511) | 256
        };
    };

    let (sign, magnitude) = match value {
        Some(v) => (v < 0, v.unsigned_abs()),
        None => (true, 0),
    };
    bit(enc, sign);

    let row = MAGNITUDES
        .iter()
        .position(|&(width, offset)| {
            magnitude >= offset && (magnitude - offset) as u64 <= (1_u64 << width) - 1
        })
        .expect("value out of IAx domain");

    for _ in 0..row {
        bit(enc, true);
    }
    if row < MAGNITUDES.len() - 1 {
        bit(enc, false);
    }

    let (width, offset) = MAGNITUDES[row];
    let residue = magnitude - offset;
    for i in (0..width).rev() {
        bit(enc, (residue >> i) & 1 != 0);
    }
}

/// Symbol ID contexts for the IAID procedure (A.3).
pub struct IdCtx {
    contexts: Vec<Ctx>,
    code_length: u32,
}

impl IdCtx {
    pub fn new(code_length: u32) -> Self {
        Self {
            contexts: vec![Ctx::default(); 1 << (code_length + 1)],
            code_length,
        }
    }
}

pub fn encode_id(enc: &mut MqEncoder, ctx: &mut IdCtx, id: u32) {
    let mut prev: u32 = 1;
    for i in (0..ctx.code_length).rev() {
        let bit = (id >> i) & 1 != 0;
        enc.encode_bit(&mut ctx.contexts[prev as usize], bit);
        prev = (prev << 1) | bit as u32;
    }
}

/// A plain pixel image for building encoder inputs.
#[derive(Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<bool>,
}

impl Image {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![false; (width * height) as usize],
        }
    }

    /// Build from rows of '.' (white) and '#' (black).
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len() as u32;
        let width = rows.first().map_or(0, |row| row.len()) as u32;
        let mut image = Self::blank(width, height);
        for (y, row) in rows.iter().enumerate() {
            assert_eq!(row.len() as u32, width, "ragged row {y}");
            for (x, byte) in row.bytes().enumerate() {
                image.set(x as u32, y as u32, byte == b'#');
            }
        }
        image
    }

    pub fn checkerboard(width: u32, height: u32) -> Self {
        let mut image = Self::blank(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set(x, y, (x + y) % 2 == 0);
            }
        }
        image
    }

    pub fn set(&mut self, x: u32, y: u32, black: bool) {
        self.pixels[(y * self.width + x) as usize] = black;
    }

    pub fn get(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.pixels[(y as u32 * self.width + x as u32) as usize] as u32
    }

    fn rows_equal(&self, a: u32, b: u32) -> bool {
        let (w, a, b) = (self.width as usize, a as usize, b as usize);
        self.pixels[a * w..(a + 1) * w] == self.pixels[b * w..(b + 1) * w]
    }
}

/// The generic-template context value, bit-for-bit what the decoder gathers.
pub fn generic_context(image: &Image, x: u32, y: u32, template: u8, at: &[(i32, i32)]) -> u32 {
    let (x, y) = (x as i32, y as i32);
    let p = |dx: i32, dy: i32| image.get(x + dx, y + dy);
    let a = |i: usize| image.get(x + at[i].0, y + at[i].1);

    match template {
        0 => {
            (a(3) << 15)
                | (p(-1, -2) << 14)
                | (p(0, -2) << 13)
                | (p(1, -2) << 12)
                | (a(2) << 11)
                | (a(1) << 10)
                | (p(-2, -1) << 9)
                | (p(-1, -1) << 8)
                | (p(0, -1) << 7)
                | (p(1, -1) << 6)
                | (p(2, -1) << 5)
                | (a(0) << 4)
                | (p(-4, 0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        1 => {
            (p(-1, -2) << 12)
                | (p(0, -2) << 11)
                | (p(1, -2) << 10)
                | (p(2, -2) << 9)
                | (p(-2, -1) << 8)
                | (p(-1, -1) << 7)
                | (p(0, -1) << 6)
                | (p(1, -1) << 5)
                | (p(2, -1) << 4)
                | (a(0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        2 => {
            (p(-1, -2) << 9)
                | (p(0, -2) << 8)
                | (p(1, -2) << 7)
                | (p(-2, -1) << 6)
                | (p(-1, -1) << 5)
                | (p(0, -1) << 4)
                | (p(1, -1) << 3)
                | (a(0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        3 => {
            (p(-3, -1) << 9)
                | (p(-2, -1) << 8)
                | (p(-1, -1) << 7)
                | (p(0, -1) << 6)
                | (p(1, -1) << 5)
                | (a(0) << 4)
                | (p(-4, 0) << 3)
                | (p(-3, 0) << 2)
                | (p(-2, 0) << 1)
                | p(-1, 0)
        }
        _ => unreachable!(),
    }
}

fn sltp_context(template: u8) -> usize {
    match template {
        0 => 0b1001_1011_0010_0101,
        1 => 0b0_0111_1001_0101,
        2 => 0b00_1110_0101,
        3 => 0b01_1001_0101,
        _ => unreachable!(),
    }
}

pub fn context_count(template: u8) -> usize {
    match template {
        0 => 1 << 16,
        1 => 1 << 13,
        _ => 1 << 10,
    }
}

/// Encode one bitmap with the generic procedure (6.2.5), sharing the given
/// contexts across calls the way a symbol dictionary does.
pub fn encode_generic(
    enc: &mut MqEncoder,
    contexts: &mut [Ctx],
    image: &Image,
    template: u8,
    at: &[(i32, i32)],
    typical_prediction: bool,
) {
    let mut ltp = false;

    for y in 0..image.height {
        if typical_prediction {
            let typical = y > 0 && image.rows_equal(y, y - 1);
            let sltp = typical != ltp;
            enc.encode_bit(&mut contexts[sltp_context(template)], sltp);
            ltp = typical;

            if ltp {
                continue;
            }
        }

        for x in 0..image.width {
            let context = generic_context(image, x, y, template, at);
            enc.encode_bit(&mut contexts[context as usize], image.get(x as i32, y as i32) != 0);
        }
    }
}

/// The refinement-template context value, matching the decoder (6.3.5.3).
pub fn refinement_context(
    image: &Image,
    reference: &Image,
    x: u32,
    y: u32,
    template: u8,
    at: &[(i32, i32)],
    dx: i32,
    dy: i32,
) -> u32 {
    let (x, y) = (x as i32, y as i32);
    let (rx, ry) = (x - dx, y - dy);
    let out = |ddx: i32, ddy: i32| image.get(x + ddx, y + ddy);
    let rf = |ddx: i32, ddy: i32| reference.get(rx + ddx, ry + ddy);

    match template {
        0 => {
            (image.get(x + at[0].0, y + at[0].1) << 12)
                | (out(0, -1) << 11)
                | (out(1, -1) << 10)
                | (out(-1, 0) << 9)
                | (reference.get(rx + at[1].0, ry + at[1].1) << 8)
                | (rf(0, -1) << 7)
                | (rf(1, -1) << 6)
                | (rf(-1, 0) << 5)
                | (rf(0, 0) << 4)
                | (rf(1, 0) << 3)
                | (rf(-1, 1) << 2)
                | (rf(0, 1) << 1)
                | rf(1, 1)
        }
        1 => {
            (out(-1, -1) << 9)
                | (out(0, -1) << 8)
                | (out(1, -1) << 7)
                | (out(-1, 0) << 6)
                | (rf(0, -1) << 5)
                | (rf(-1, 0) << 4)
                | (rf(0, 0) << 3)
                | (rf(1, 0) << 2)
                | (rf(0, 1) << 1)
                | rf(1, 1)
        }
        _ => unreachable!(),
    }
}

pub fn refinement_context_count(template: u8) -> usize {
    if template == 0 { 1 << 13 } else { 1 << 10 }
}

/// Encode one refinement bitmap (6.3.5.6 with TPGRON = 0).
pub fn encode_refinement(
    enc: &mut MqEncoder,
    contexts: &mut [Ctx],
    image: &Image,
    reference: &Image,
    template: u8,
    at: &[(i32, i32)],
    dx: i32,
    dy: i32,
) {
    for y in 0..image.height {
        for x in 0..image.width {
            let context = refinement_context(image, reference, x, y, template, at, dx, dy);
            enc.encode_bit(&mut contexts[context as usize], image.get(x as i32, y as i32) != 0);
        }
    }
}

// ---------------------------------------------------------------------------
// Byte-level stream builders.
// ---------------------------------------------------------------------------

/// Append `count` bits of `value` to a byte vector, most significant first.
pub struct BitBuilder {
    pub bytes: Vec<u8>,
    used: u8,
}

impl BitBuilder {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            used: 0,
        }
    }

    pub fn push(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            if self.used == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            *self.bytes.last_mut().unwrap() |= bit << (7 - self.used);
            self.used = (self.used + 1) & 7;
        }
    }

    pub fn align(&mut self) {
        self.used = 0;
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        assert_eq!(self.used, 0, "unaligned byte append");
        self.bytes.extend_from_slice(bytes);
    }
}

pub const TYPE_SYMBOL_DICTIONARY: u8 = 0;
pub const TYPE_IMMEDIATE_TEXT_REGION: u8 = 6;
pub const TYPE_PATTERN_DICTIONARY: u8 = 16;
pub const TYPE_IMMEDIATE_HALFTONE_REGION: u8 = 22;
pub const TYPE_IMMEDIATE_GENERIC_REGION: u8 = 38;
pub const TYPE_IMMEDIATE_REFINEMENT_REGION: u8 = 42;
pub const TYPE_PAGE_INFORMATION: u8 = 48;
pub const TYPE_END_OF_PAGE: u8 = 49;
pub const TYPE_END_OF_STRIPE: u8 = 50;
pub const TYPE_END_OF_FILE: u8 = 51;
pub const TYPE_TABLES: u8 = 53;

/// One segment under construction.
#[derive(Clone)]
pub struct SegmentSpec {
    pub number: u32,
    pub segment_type: u8,
    pub referred_to: Vec<u32>,
    pub page: u32,
    pub data: Vec<u8>,
    /// Write 0xFFFFFFFF instead of the data length.
    pub unknown_length: bool,
}

impl SegmentSpec {
    pub fn new(number: u32, segment_type: u8, page: u32, data: Vec<u8>) -> Self {
        Self {
            number,
            segment_type,
            referred_to: Vec::new(),
            page,
            data,
            unknown_length: false,
        }
    }

    pub fn with_refs(mut self, referred_to: &[u32]) -> Self {
        self.referred_to = referred_to.to_vec();
        self
    }

    pub fn with_unknown_length(mut self) -> Self {
        self.unknown_length = true;
        self
    }

    /// The segment header bytes (7.2); data not included.
    pub fn header(&self) -> Vec<u8> {
        assert!(self.referred_to.len() <= 4, "long form not needed in tests");
        assert!(self.number <= 256, "one-byte referred-to numbers only");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.number.to_be_bytes());
        bytes.push(self.segment_type);
        bytes.push((self.referred_to.len() as u8) << 5);
        for &referred in &self.referred_to {
            bytes.push(referred as u8);
        }
        bytes.push(self.page as u8);
        let length = if self.unknown_length {
            0xFFFF_FFFF
        } else {
            self.data.len() as u32
        };
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes
    }
}

/// Assemble a sequential-organization file.
pub fn sequential_file(segments: &[SegmentSpec]) -> Vec<u8> {
    let mut bytes = file_header(true, Some(count_pages(segments)));
    for spec in segments {
        bytes.extend_from_slice(&spec.header());
        bytes.extend_from_slice(&spec.data);
    }
    bytes
}

/// Assemble a random-access-organization file: all headers, then all data.
pub fn random_access_file(segments: &[SegmentSpec]) -> Vec<u8> {
    let mut bytes = file_header(false, Some(count_pages(segments)));
    for spec in segments {
        bytes.extend_from_slice(&spec.header());
    }
    for spec in segments {
        bytes.extend_from_slice(&spec.data);
    }
    bytes
}

/// Concatenate header + data per segment without any file header, as the PDF
/// filter hands them over.
pub fn embedded_chunk(segments: &[SegmentSpec]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for spec in segments {
        bytes.extend_from_slice(&spec.header());
        bytes.extend_from_slice(&spec.data);
    }
    bytes
}

fn count_pages(segments: &[SegmentSpec]) -> u32 {
    let mut pages: Vec<u32> = Vec::new();
    for spec in segments {
        if spec.page != 0 && !pages.contains(&spec.page) {
            pages.push(spec.page);
        }
    }
    pages.len() as u32
}

fn file_header(sequential: bool, page_count: Option<u32>) -> Vec<u8> {
    let mut bytes = vec![0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];
    let mut flags = 0;
    if sequential {
        flags |= 0x01;
    }
    if page_count.is_none() {
        flags |= 0x02;
    }
    bytes.push(flags);
    if let Some(count) = page_count {
        bytes.extend_from_slice(&count.to_be_bytes());
    }
    bytes
}

/// The 19-byte page information segment body (7.4.8).
pub fn page_info(width: u32, height: u32, flags: u8, striping: u16) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&0_u32.to_be_bytes());
    bytes.extend_from_slice(&0_u32.to_be_bytes());
    bytes.push(flags);
    bytes.extend_from_slice(&striping.to_be_bytes());
    bytes
}

/// The 17-byte region segment information field (7.4.1).
pub fn region_info(width: u32, height: u32, x: u32, y: u32, operator: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&x.to_be_bytes());
    bytes.extend_from_slice(&y.to_be_bytes());
    bytes.push(operator);
    bytes
}

/// A full immediate generic region data part: region information, flags, AT
/// pixels, arithmetically coded pixels.
pub fn generic_region_data(
    image: &Image,
    x: u32,
    y: u32,
    operator: u8,
    template: u8,
    typical_prediction: bool,
) -> Vec<u8> {
    let at = default_at(template);
    let mut data = region_info(image.width, image.height, x, y, operator);
    let mut flags = template << 1;
    if typical_prediction {
        flags |= 0x08;
    }
    data.push(flags);
    for &(ax, ay) in &at {
        data.push(ax as i8 as u8);
        data.push(ay as i8 as u8);
    }

    let mut enc = MqEncoder::new();
    let mut contexts = vec![Ctx::default(); context_count(template)];
    encode_generic(&mut enc, &mut contexts, image, template, &at, typical_prediction);
    data.extend_from_slice(&enc.finish(false));
    data
}

/// The nominal AT pixel positions of 6.2.5.4.
pub fn default_at(template: u8) -> Vec<(i32, i32)> {
    match template {
        0 => vec![(3, -1), (-3, -1), (2, -2), (-2, -2)],
        1 => vec![(3, -1)],
        2 => vec![(2, -1)],
        _ => vec![(-2, -1)],
    }
}

/// Check one decoded BGRx frame against an expected image.
pub fn assert_frame_matches(frame: &sable_jbig2::Frame, expected: &Image) {
    assert_eq!(frame.width, expected.width);
    assert_eq!(frame.height, expected.height);

    for y in 0..frame.height {
        for x in 0..frame.width {
            let offset = (4 * (y * frame.width + x)) as usize;
            let black = frame.data[offset] == 0x00;
            assert_eq!(
                black,
                expected.get(x as i32, y as i32) != 0,
                "pixel ({x}, {y})"
            );
        }
    }
}

/// Check a packed-row bitmap against an expected image.
pub fn assert_bitmap_matches(bitmap: &sable_jbig2::Bitmap, expected: &Image) {
    assert_eq!(bitmap.width(), expected.width);
    assert_eq!(bitmap.height(), expected.height);

    for y in 0..bitmap.height() {
        for x in 0..bitmap.width() {
            assert_eq!(
                bitmap.get(x, y),
                expected.get(x as i32, y as i32) != 0,
                "pixel ({x}, {y})"
            );
        }
    }
}
