//! Uniform data shared between the rendering system and its producers.

mod manager;

pub use manager::{BufferManager, UniformSource};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

use crate::resolution::Resolution;

/// Identifier of the [`GeneralUniformData`] registration
pub const GENERAL_UNIFORM_NAME: &str = "General";
/// Identifier of the [`HammersleyHemisphereSamples`] registration
pub const HAMMERSLEY_UNIFORM_NAME: &str = "HammersleyHemisphereSamples";
/// Number of precomputed hemisphere samples
pub const HAMMERSLEY_SAMPLE_COUNT: usize = 64;

/// 64-bit FNV-1a hash of `name`, used as uniform buffer identifier.
pub const fn hash_name(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let bytes = name.as_bytes();
    let mut hash = OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}

/// Per-frame data every shader can read.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeneralUniformData {
    pub full_resolution: Vec2,
    pub inverse_full_resolution: Vec2,
    pub half_resolution: Vec2,
    pub inverse_half_resolution: Vec2,
    pub frame_index: u32,
    pub delta_time: f32,
    pub _padding: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<GeneralUniformData>(), 48);

impl GeneralUniformData {
    pub fn new(full: Resolution, half: Resolution, frame_index: u32, delta_time: f32) -> Self {
        let full_resolution = full.as_vec2();
        let half_resolution = half.as_vec2();
        Self {
            full_resolution,
            inverse_full_resolution: full_resolution.recip(),
            half_resolution,
            inverse_half_resolution: half_resolution.recip(),
            frame_index,
            delta_time,
            _padding: [0; 2],
        }
    }
}

impl Default for GeneralUniformData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Cosine-weighted hemisphere directions in `xyz`, a radical inverse in `w`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HammersleyHemisphereSamples {
    pub samples: [Vec4; HAMMERSLEY_SAMPLE_COUNT],
}

impl HammersleyHemisphereSamples {
    /// The 8x8 sample set over a 65-point Hammersley sequence.
    pub fn generate() -> Self {
        let mut samples = [Vec4::ZERO; HAMMERSLEY_SAMPLE_COUNT];
        let mut counter = 0;
        for i in 0..8u32 {
            for j in 0..8u32 {
                let direction = hemisphere_cosine(i + j * 8 + 1, 65);
                samples[counter] = direction.extend(radical_inverse(counter as u32 + 1));
                counter += 1;
            }
        }
        Self { samples }
    }
}

/// Van der Corput radical inverse in base 2.
pub fn radical_inverse(index: u32) -> f32 {
    index.reverse_bits() as f32 * (1.0 / 4_294_967_296.0)
}

/// Point `index` of an `count`-point Hammersley set mapped to the cosine-weighted
/// upper hemisphere around +Z.
pub fn hemisphere_cosine(index: u32, count: u32) -> glam::Vec3 {
    let u = index as f32 / count as f32;
    let v = radical_inverse(index);
    let phi = u * std::f32::consts::TAU;
    let cos_theta = (1.0 - v).sqrt();
    let sin_theta = v.sqrt();
    glam::Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_name_fnv1a() {
        assert_eq!(hash_name(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(hash_name("a"), 0xaf63_dc4c_8601_ec8c);
        assert_ne!(hash_name(GENERAL_UNIFORM_NAME), hash_name(HAMMERSLEY_UNIFORM_NAME));
    }

    #[test]
    fn test_radical_inverse() {
        assert_eq!(radical_inverse(1), 0.5);
        assert_eq!(radical_inverse(2), 0.25);
        assert_eq!(radical_inverse(3), 0.75);
    }

    #[test]
    fn test_hammersley_samples_on_upper_hemisphere() {
        let set = HammersleyHemisphereSamples::generate();
        for sample in set.samples {
            let direction = sample.truncate();
            assert!((direction.length() - 1.0).abs() < 1e-4);
            assert!(direction.z >= 0.0);
            assert!(sample.w > 0.0 && sample.w < 1.0);
        }
        assert_eq!(std::mem::size_of::<HammersleyHemisphereSamples>(), 64 * 16);
    }

    #[test]
    fn test_general_uniform_data_inverses() {
        let data = GeneralUniformData::new(Resolution::new(1920, 1080), Resolution::new(960, 540), 7, 0.016);
        assert_eq!(data.inverse_full_resolution, Vec2::new(1.0 / 1920.0, 1.0 / 1080.0));
        assert_eq!(data.frame_index, 7);
    }
}
