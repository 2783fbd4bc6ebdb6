//! Image type detection from leading bytes.
//!
//! Upstream `content-type` headers are not trusted for `/_next/image`; the
//! response type is taken from the payload itself.

pub const AVIF: &str = "image/avif";
pub const WEBP: &str = "image/webp";
pub const PNG: &str = "image/png";
pub const JPEG: &str = "image/jpeg";
pub const JXL: &str = "image/jxl";
pub const JP2: &str = "image/jp2";
pub const HEIC: &str = "image/heic";
pub const GIF: &str = "image/gif";
pub const SVG: &str = "image/svg+xml";
pub const ICO: &str = "image/x-icon";
pub const ICNS: &str = "image/x-icns";
pub const TIFF: &str = "image/tiff";
pub const BMP: &str = "image/bmp";
pub const PDF: &str = "application/pdf";

/// `None` in a signature matches any byte.
type Signature = &'static [Option<u8>];

macro_rules! sig {
    (@byte _) => { None };
    (@byte $b:expr) => { Some($b) };
    ($($b:tt),* $(,)?) => {
        &[$(sig!(@byte $b)),*]
    };
}

const SIGNATURES: &[(Signature, &str)] = &[
    (sig![0xff, 0xd8, 0xff], JPEG),
    (sig![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a], PNG),
    (sig![0x47, 0x49, 0x46, 0x38], GIF),
    (
        sig![0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50],
        WEBP,
    ),
    (sig![0x3c, 0x3f, 0x78, 0x6d, 0x6c], SVG),
    (sig![0x3c, 0x73, 0x76, 0x67], SVG),
    (
        sig![_, _, _, _, 0x66, 0x74, 0x79, 0x70, 0x61, 0x76, 0x69, 0x66],
        AVIF,
    ),
    (sig![0x00, 0x00, 0x01, 0x00], ICO),
    (sig![0x69, 0x63, 0x6e, 0x73], ICNS),
    (sig![0x49, 0x49, 0x2a, 0x00], TIFF),
    (sig![0x42, 0x4d], BMP),
    (sig![0xff, 0x0a], JXL),
    (
        sig![0x00, 0x00, 0x00, 0x0c, 0x4a, 0x58, 0x4c, 0x20, 0x0d, 0x0a, 0x87, 0x0a],
        JXL,
    ),
    (
        sig![_, _, _, _, 0x66, 0x74, 0x79, 0x70, 0x68, 0x65, 0x69, 0x63],
        HEIC,
    ),
    (sig![0x25, 0x50, 0x44, 0x46, 0x2d], PDF),
    (
        sig![0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a],
        JP2,
    ),
];

fn matches(signature: Signature, bytes: &[u8]) -> bool {
    bytes.len() >= signature.len()
        && signature
            .iter()
            .zip(bytes)
            .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
}

/// Content type of an image payload, or `None` when it is not a known format.
pub fn detect_image_content_type(bytes: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(signature, _)| matches(signature, bytes))
        .map(|(_, content_type)| *content_type)
}
