pub const ZSTD_MAX_COMPRESSION_LVL: u32 = 22;

/// First four bytes of every zstd frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn unorm8_to_float(x: u8) -> f32 {
    x as f32 / 255.0
}

#[inline]
pub(crate) fn float_to_unorm8(x: f32) -> u8 {
    clamp_u8(x * 255.0)
}

#[inline]
pub(crate) fn unquantize_rot(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

#[inline]
pub(crate) fn quantize_rot(x: f32) -> u8 {
    clamp_u8(x * 128.0 + 128.0)
}

#[inline]
pub(crate) fn is_zstd_frame(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_quantization_is_offset_by_128() {
        assert_eq!(unquantize_rot(128), 0.0);
        assert_eq!(unquantize_rot(0), -1.0);
        assert_eq!(unquantize_rot(255), 127.0 / 128.0);
        assert_eq!(quantize_rot(-1.0), 0);
        assert_eq!(quantize_rot(0.0), 128);
        // 1.0 maps past the representable range and saturates
        assert_eq!(quantize_rot(1.0), 255);
    }

    #[test]
    fn unorm8_saturates() {
        assert_eq!(float_to_unorm8(-0.5), 0);
        assert_eq!(float_to_unorm8(2.0), 255);
        assert_eq!(float_to_unorm8(unorm8_to_float(77)), 77);
    }
}
