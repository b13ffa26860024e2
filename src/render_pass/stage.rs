//! Logical rendering stages.

/// Ordering tag of a render pass. Passes execute in ascending stage order every frame.
///
/// The order carries no dependency information. A pass reading another pass's output
/// must be tagged with a later stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPassStage {
    Shadows,
    AmbientOcclusion,
    Lighting,
    PathTracing,
    Denoising,
    TemporalAccumulation,
    Bloom,
    DepthOfField,
    AntiAliasing,
    ToneMapping,
    UserInterface,
    Screen,
}

impl RenderPassStage {
    pub const ALL: [RenderPassStage; 12] = [
        RenderPassStage::Shadows,
        RenderPassStage::AmbientOcclusion,
        RenderPassStage::Lighting,
        RenderPassStage::PathTracing,
        RenderPassStage::Denoising,
        RenderPassStage::TemporalAccumulation,
        RenderPassStage::Bloom,
        RenderPassStage::DepthOfField,
        RenderPassStage::AntiAliasing,
        RenderPassStage::ToneMapping,
        RenderPassStage::UserInterface,
        RenderPassStage::Screen,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RenderPassStage::Shadows => "Shadows",
            RenderPassStage::AmbientOcclusion => "AmbientOcclusion",
            RenderPassStage::Lighting => "Lighting",
            RenderPassStage::PathTracing => "PathTracing",
            RenderPassStage::Denoising => "Denoising",
            RenderPassStage::TemporalAccumulation => "TemporalAccumulation",
            RenderPassStage::Bloom => "Bloom",
            RenderPassStage::DepthOfField => "DepthOfField",
            RenderPassStage::AntiAliasing => "AntiAliasing",
            RenderPassStage::ToneMapping => "ToneMapping",
            RenderPassStage::UserInterface => "UserInterface",
            RenderPassStage::Screen => "Screen",
        }
    }
}

impl std::fmt::Display for RenderPassStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut sorted = RenderPassStage::ALL;
        sorted.sort();
        assert_eq!(sorted, RenderPassStage::ALL);
        assert!(RenderPassStage::Shadows < RenderPassStage::Lighting);
        assert!(RenderPassStage::ToneMapping < RenderPassStage::Screen);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(RenderPassStage::Denoising.to_string(), "Denoising");
    }
}
