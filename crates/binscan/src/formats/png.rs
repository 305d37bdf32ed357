//! PNG: signature plus the IHDR header chunk

use crate::{
    decode::Format,
    input::Endian,
    spec::{NumberAttribute, StructSpec, SymbolAttribute},
};
use once_cell::sync::Lazy;

/// The eight signature bytes `89 50 4E 47 0D 0A 1A 0A`, read big endian.
pub const PNG_SIGNATURE: u64 = 0x8950_4E47_0D0A_1A0A;

static PNG: Lazy<Format> = Lazy::new(build);

/// PNG images. Decodes the signature and the IHDR chunk that immediately
/// follows it; chunk data beyond IHDR is left to the outer scan.
pub fn png() -> &'static Format {
    &PNG
}

fn build() -> Format {
    let root = StructSpec::new("PNG image")
        .append(NumberAttribute::<u64>::new("signature").with_final(PNG_SIGNATURE))
        .append(NumberAttribute::<u32>::new("IHDR length").with_final(13))
        .append(NumberAttribute::<u32>::new("IHDR type").with_final(0x4948_4452))
        .append(
            NumberAttribute::<u32>::new("width")
                .bind()
                .with_renderer(|w| format!("{w} px")),
        )
        .append(
            NumberAttribute::<u32>::new("height")
                .bind()
                .with_renderer(|h| format!("{h} px")),
        )
        .append(NumberAttribute::<u8>::new("bit depth"))
        .append(
            SymbolAttribute::<u8>::new("color type")
                .symbol(0, "grayscale")
                .symbol(2, "truecolor")
                .symbol(3, "indexed")
                .symbol(4, "grayscale with alpha")
                .symbol(6, "truecolor with alpha"),
        )
        .append(NumberAttribute::<u8>::new("compression method").with_final(0))
        .append(NumberAttribute::<u8>::new("filter method"))
        .append(
            SymbolAttribute::<u8>::new("interlace method")
                .symbol(0, "none")
                .symbol(1, "Adam7"),
        )
        .append(NumberAttribute::<u32>::new("IHDR crc"));

    Format::new("PNG image", Endian::Big, root)
}

#[cfg(test)]
mod tests {
    use super::png;
    use crate::{
        codec::DecodeCache,
        decode::{decode_format, probe, CancelToken},
        input::{Endian, Input},
        render::{render_result, TextRenderer},
    };
    use std::sync::Arc;

    fn sample() -> Input {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 13]); // IHDR length
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&[0, 0, 1, 0]); // width 256
        bytes.extend_from_slice(&[0, 0, 0, 200]); // height
        bytes.extend_from_slice(&[8, 2, 0, 0, 0]); // depth, color, comp, filter, interlace
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]); // crc
        bytes.extend(std::iter::repeat(0xAB).take(100));
        Input::from_bytes("image.png", Endian::Big, bytes)
    }

    #[test]
    fn signature_probes_and_decodes() {
        let format = png();
        let input = sample();
        assert!(probe(format, &input, 0).unwrap());

        let result = decode_format(
            format,
            &input,
            0,
            Arc::new(DecodeCache::new()),
            CancelToken::new(),
        )
        .unwrap();

        assert!(!result.has_fatal());
        assert_eq!(result.title(), "PNG image");
        assert!(result.size() >= 8);
        // The signature attribute's section covers exactly the magic bytes
        let first = &result.sections()[0];
        assert_eq!((first.start, first.end), (0, 8));

        // Bound dimensions resolve during render, extra renderer included
        let mut out = TextRenderer::new();
        render_result(&result, &mut out, &CancelToken::new()).unwrap();
        assert!(out.output().contains("width@0x10 = 256 // 256 px"));
        assert!(out.output().contains("color type@0x19 = 2 // truecolor"));
    }

    #[test]
    fn corrupted_signature_does_not_probe() {
        let format = png();
        let input = Input::from_bytes("bad.png", Endian::Big, vec![0x89, 0x50, 0x4E, 0x00]);
        assert!(!probe(format, &input, 0).unwrap());
    }
}
