//! Render resolutions and the scaled resolution chain.

/// Number of levels in the scaled resolution chain.
pub const SCALED_RESOLUTION_LEVELS: usize = 9;

/// A width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Rounds both dimensions up to the nearest multiple of two.
    pub fn round_up_to_multiple_of_two(self) -> Self {
        Self {
            width: self.width + (self.width & 1),
            height: self.height + (self.height & 1),
        }
    }

    /// Halves both dimensions, never going below one pixel.
    pub fn half(self) -> Self {
        Self {
            width: (self.width / 2).max(1),
            height: (self.height / 2).max(1),
        }
    }

    /// Multiplies both dimensions by `scale`, truncating.
    pub fn scaled(self, scale: f32) -> Self {
        Self {
            width: ((self.width as f32 * scale) as u32).max(1),
            height: ((self.height as f32 * scale) as u32).max(1),
        }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_vec2(self) -> glam::Vec2 {
        glam::Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Builds the scaled resolution chain.
///
/// Level 0 is `full * scale`, every following level halves the previous one.
/// Every level is rounded up to a multiple of two.
pub fn scaled_resolutions(full: Resolution, scale: f32) -> [Resolution; SCALED_RESOLUTION_LEVELS] {
    let mut levels = [Resolution::default(); SCALED_RESOLUTION_LEVELS];
    levels[0] = full.scaled(scale).round_up_to_multiple_of_two();
    for level in 1..SCALED_RESOLUTION_LEVELS {
        levels[level] = levels[level - 1].half().round_up_to_multiple_of_two();
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_multiple_of_two() {
        assert_eq!(
            Resolution::new(1281, 719).round_up_to_multiple_of_two(),
            Resolution::new(1282, 720)
        );
        assert_eq!(
            Resolution::new(8, 8).round_up_to_multiple_of_two(),
            Resolution::new(8, 8)
        );
    }

    #[test]
    fn test_scaled_resolutions_halve_each_level() {
        let levels = scaled_resolutions(Resolution::new(1920, 1080), 1.0);
        assert_eq!(levels[0], Resolution::new(1920, 1080));
        assert_eq!(levels[1], Resolution::new(960, 540));
        assert_eq!(levels[2], Resolution::new(480, 270));
        // 270 / 2 = 135, rounded up
        assert_eq!(levels[3], Resolution::new(240, 136));
        for level in levels {
            assert_eq!(level.width % 2, 0);
            assert_eq!(level.height % 2, 0);
        }
    }

    #[test]
    fn test_scaled_resolutions_apply_scale() {
        let levels = scaled_resolutions(Resolution::new(1000, 500), 0.5);
        assert_eq!(levels[0], Resolution::new(500, 250));
        assert_eq!(levels[1], Resolution::new(250, 126));
    }
}
