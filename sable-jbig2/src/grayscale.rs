//! Gray-scale image decoding (Annex C).
//!
//! Halftone regions carry their pattern indices as a gray-coded stack of
//! bitplanes, most significant plane first.

use crate::arith::{ArithDecoder, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::decode::generic::{GenericParams, decode_into};
use crate::decode::{AdaptivePixel, Template};
use crate::error::{Result, Unsupported, bail};

/// Parameters of the gray-scale image decoding procedure (Table C.1).
pub(crate) struct GrayScaleParams<'a> {
    /// "GSBPP" - bits per gray-scale value.
    pub(crate) bits_per_value: u32,
    /// "GSW" / "GSH"
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "GSTEMPLATE"
    pub(crate) template: Template,
    /// "GSUSESKIP" / "GSKIP"
    pub(crate) skip: Option<&'a Bitmap>,
    /// "GSMMR"
    pub(crate) mmr: bool,
}

/// Decode a gray-scale image (C.5). Returns GSVALS in row-major order.
pub(crate) fn decode_gray_scale(data: &[u8], params: &GrayScaleParams<'_>) -> Result<Vec<u32>> {
    // The MMR variant would need the consumed byte count of every bitplane
    // to find the next plane's data; not wired through, so reject.
    if params.mmr {
        bail!(Unsupported::MmrGrayScale);
    }

    // Table C.4: fixed adaptive pixels; only AT1 depends on the template.
    let adaptive = [
        AdaptivePixel::new(
            if matches!(params.template, Template::Template0 | Template::Template1) {
                3
            } else {
                2
            },
            -1,
        ),
        AdaptivePixel::new(-3, -1),
        AdaptivePixel::new(2, -2),
        AdaptivePixel::new(-2, -2),
    ];
    let adaptive = &adaptive[..params.template.adaptive_pixel_count()];

    // "GSPLANES[GSBPP - 1] first; one decoding statistics vector is shared
    // by all the bitplanes." (C.5)
    let mut decoder = ArithDecoder::new(data);
    let mut contexts = fresh_contexts(1 << params.template.context_bits());
    let generic = GenericParams {
        template: params.template,
        adaptive,
        typical_prediction: false,
        skip: params.skip,
    };

    let mut values = vec![0_u32; params.width as usize * params.height as usize];
    let mut previous: Option<Bitmap> = None;

    // "2) Set J = GSBPP - 2. 3) While J >= 0: decode GSPLANES[J], then set
    // GSPLANES[J][x, y] = GSPLANES[J + 1][x, y] XOR GSPLANES[J][x, y]." (C.5)
    for bit in (0..params.bits_per_value).rev() {
        let mut plane = Bitmap::new(params.width, params.height)?;
        decode_into(&mut plane, &mut decoder, &mut contexts, &generic)?;

        if let Some(previous) = &previous {
            for y in 0..params.height {
                for x in 0..params.width {
                    if previous.get(x, y) {
                        let value = !plane.get(x, y);
                        plane.set(x, y, value);
                    }
                }
            }
        }

        // "4) GSVALS[x, y] = sum over J of GSPLANES[J][x, y] * 2^J" (C.5)
        for y in 0..params.height {
            for x in 0..params.width {
                if plane.get(x, y) {
                    values[(y * params.width + x) as usize] |= 1 << bit;
                }
            }
        }

        previous = Some(plane);
    }

    Ok(values)
}
