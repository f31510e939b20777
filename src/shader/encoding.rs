//! Texel encodings for particle coordinates.
//!
//! Coordinates are stored normalized to the viewport (or the fixed range for
//! higher dimensions). With float textures the value sits in the red channel.
//! Without them it is packed as 24-bit fixed point across RGB over an extended
//! range, so particles inside the escape margin still round-trip. Alpha always
//! carries the age.

use crate::config::{EncodingStrategy, PACKED_BITS};

/// Normalized values representable by the packed strategy: `[-0.5, 1.5]`.
pub const PACKED_OFFSET: f32 = 0.5;
pub const PACKED_SPAN: f32 = 2.0;

const PACKED_MAX: f64 = ((1u64 << PACKED_BITS) - 1) as f64;

/// Texture storage a strategy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba32F,
    Rgba8,
}

/// Texel data as uploaded to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum TexelData {
    Float(Vec<[f32; 4]>),
    Bytes(Vec<[u8; 4]>),
}

impl TexelData {
    pub fn len(&self) -> usize {
        match self {
            TexelData::Float(texels) => texels.len(),
            TexelData::Bytes(texels) => texels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EncodingStrategy {
    pub fn texture_format(self) -> TextureFormat {
        match self {
            EncodingStrategy::Float => TextureFormat::Rgba32F,
            EncodingStrategy::Packed => TextureFormat::Rgba8,
        }
    }

    /// Constants plus `float decode_value(vec4)` and `vec4 encode_value(float)`.
    pub fn glsl(self) -> String {
        match self {
            EncodingStrategy::Float => "const float ENCODING_PACKED = 0.0;\n\n\
                 float decode_value(vec4 texel) {\n    return texel.r;\n}\n\n\
                 vec4 encode_value(float value) {\n    return vec4(value, 0.0, 0.0, 1.0);\n}\n"
                .to_string(),
            EncodingStrategy::Packed => format!(
                "const float ENCODING_PACKED = 1.0;\n\
                 const float PACKED_OFFSET = {PACKED_OFFSET:.1};\n\
                 const float PACKED_SPAN = {PACKED_SPAN:.1};\n\
                 const float PACKED_MAX = {PACKED_MAX:.1};\n\n\
                 float decode_value(vec4 texel) {{\n    \
                 vec3 bytes = floor(texel.rgb * 255.0 + 0.5);\n    \
                 float packed = bytes.r * 65536.0 + bytes.g * 256.0 + bytes.b;\n    \
                 return packed / PACKED_MAX * PACKED_SPAN - PACKED_OFFSET;\n}}\n\n\
                 vec4 encode_value(float value) {{\n    \
                 float unit = clamp((value + PACKED_OFFSET) / PACKED_SPAN, 0.0, 1.0);\n    \
                 float packed = floor(unit * PACKED_MAX + 0.5);\n    \
                 float r = floor(packed / 65536.0);\n    \
                 float g = floor((packed - r * 65536.0) / 256.0);\n    \
                 float b = packed - r * 65536.0 - g * 256.0;\n    \
                 return vec4(r, g, b, 255.0) / 255.0;\n}}\n"
            ),
        }
    }

    /// Encode normalized values with their ages into one texture's data.
    pub fn encode(self, values: &[f32], ages: Option<&[f32]>) -> TexelData {
        let age = |idx: usize| ages.and_then(|a| a.get(idx)).copied().unwrap_or(1.0);
        match self {
            EncodingStrategy::Float => TexelData::Float(
                values
                    .iter()
                    .enumerate()
                    .map(|(idx, v)| [*v, 0.0, 0.0, age(idx)])
                    .collect(),
            ),
            EncodingStrategy::Packed => TexelData::Bytes(
                values
                    .iter()
                    .enumerate()
                    .map(|(idx, v)| {
                        let [r, g, b] = pack(*v);
                        [r, g, b, (age(idx).clamp(0.0, 1.0) * 255.0).round() as u8]
                    })
                    .collect(),
            ),
        }
    }

    /// Normalized values and ages back from texture data.
    pub fn decode(self, data: &TexelData) -> (Vec<f32>, Vec<f32>) {
        match data {
            TexelData::Float(texels) => texels.iter().map(|t| (t[0], t[3])).unzip(),
            TexelData::Bytes(texels) => texels
                .iter()
                .map(|t| (unpack([t[0], t[1], t[2]]), t[3] as f32 / 255.0))
                .unzip(),
        }
    }
}

/// Packed RGB bytes of a normalized value.
pub fn pack(value: f32) -> [u8; 3] {
    let unit = ((value as f64 + PACKED_OFFSET as f64) / PACKED_SPAN as f64).clamp(0.0, 1.0);
    let packed = (unit * PACKED_MAX).round() as u32;
    [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]
}

pub fn unpack(bytes: [u8; 3]) -> f32 {
    let packed = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    (packed as f64 / PACKED_MAX * PACKED_SPAN as f64 - PACKED_OFFSET as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_precision() {
        for value in [-0.2_f32, -0.02, 0.0, 0.123_456, 0.5, 0.999, 1.04, 1.2] {
            let back = unpack(pack(value));
            assert!((back - value).abs() < 2e-7, "{value} -> {back}");
        }
        assert_eq!(unpack(pack(-3.0)), -PACKED_OFFSET);
    }

    #[test]
    fn test_encode_carries_age_in_alpha() {
        let data = EncodingStrategy::Float.encode(&[0.25, 0.75], Some(&[0.0, 1.0]));
        assert_eq!(data, TexelData::Float(vec![[0.25, 0.0, 0.0, 0.0], [0.75, 0.0, 0.0, 1.0]]));
        let packed = EncodingStrategy::Packed.encode(&[0.25], Some(&[0.5]));
        let (values, ages) = EncodingStrategy::Packed.decode(&packed);
        assert!((values[0] - 0.25).abs() < 2e-7);
        assert!((ages[0] - 0.5).abs() < 1.0 / 255.0);
    }

    #[test]
    fn test_glsl_helpers() {
        assert!(EncodingStrategy::Float.glsl().contains("return texel.r;"));
        let packed = EncodingStrategy::Packed.glsl();
        assert!(packed.contains("const float PACKED_MAX = 16777215.0;"));
        assert!(packed.contains("vec4 encode_value(float value)"));
        assert_eq!(EncodingStrategy::Packed.texture_format(), TextureFormat::Rgba8);
    }
}
