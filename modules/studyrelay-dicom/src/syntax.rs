//! Transfer syntax UIDs the gateway advertises and understands.
//!
//! Received objects are stored in their negotiated syntax and never
//! transcoded; the codec only needs to know VR-ness and endianness to
//! walk the dataset.

pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.57";
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const JPEG_LS_LOSSY: &str = "1.2.840.10008.1.2.4.81";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";
pub const MPEG2_MAIN: &str = "1.2.840.10008.1.2.4.100";
pub const MPEG4_AVC_H264: &str = "1.2.840.10008.1.2.4.102";
pub const HEVC_H265_MAIN: &str = "1.2.840.10008.1.2.4.107";
pub const HEVC_H265_MAIN10: &str = "1.2.840.10008.1.2.4.108";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

/// Every syntax a listener advertises: uncompressed + JPEG family +
/// JPEG-2000 + RLE + MPEG/HEVC.
pub const ADVERTISED: &[&str] = &[
    EXPLICIT_VR_LE,
    IMPLICIT_VR_LE,
    JPEG_BASELINE,
    JPEG_EXTENDED,
    JPEG_LOSSLESS,
    JPEG_LOSSLESS_SV1,
    JPEG_LS_LOSSLESS,
    JPEG_LS_LOSSY,
    JPEG_2000_LOSSLESS,
    JPEG_2000,
    RLE_LOSSLESS,
    MPEG2_MAIN,
    MPEG4_AVC_H264,
    HEVC_H265_MAIN,
    HEVC_H265_MAIN10,
];

/// Only the original implicit syntax omits VR bytes; every compressed
/// syntax encodes its dataset as explicit VR little endian.
pub fn is_implicit_vr(uid: &str) -> bool {
    uid == IMPLICIT_VR_LE
}

/// Syntaxes the codec can walk. Big-endian is retired and deflated
/// requires whole-dataset inflation, so both are rejected rather than
/// misread.
pub fn is_readable(uid: &str) -> bool {
    uid != EXPLICIT_VR_BE && uid != DEFLATED_EXPLICIT_VR_LE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_list_covers_required_families() {
        assert!(ADVERTISED.contains(&EXPLICIT_VR_LE));
        assert!(ADVERTISED.contains(&IMPLICIT_VR_LE));
        assert!(ADVERTISED.contains(&JPEG_BASELINE));
        assert!(ADVERTISED.contains(&JPEG_2000));
        assert!(ADVERTISED.contains(&RLE_LOSSLESS));
        assert!(ADVERTISED.contains(&HEVC_H265_MAIN));
    }

    #[test]
    fn vr_ness() {
        assert!(is_implicit_vr(IMPLICIT_VR_LE));
        assert!(!is_implicit_vr(JPEG_BASELINE));
        assert!(!is_readable(EXPLICIT_VR_BE));
        assert!(is_readable(JPEG_2000_LOSSLESS));
    }
}
