//! Resource states and subresource selection.

/// Which shader stages a [`ResourceState::ShaderRead`] resource is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadScope {
    /// Fragment shaders only.
    Pixel,
    /// Vertex and compute shaders.
    NonPixel,
    /// Every shader stage.
    All,
}

/// The hardware-visible mode a resource is prepared for.
///
/// Every resource carries exactly one current state. It changes only through
/// `Device::ensure_state`, which records a barrier when the state differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// No particular usage; the state of fresh upload-heap buffers.
    #[default]
    Common,
    /// Bound as a color attachment.
    RenderTarget,
    /// Handed to the presentation engine.
    Present,
    /// Read and written from shaders.
    UnorderedAccess,
    /// Sampled or read from shaders.
    ShaderRead(ReadScope),
    /// Source of a copy.
    CopySrc,
    /// Destination of a copy.
    CopyDst,
    /// Bound as a read-only depth attachment.
    DepthRead,
    /// Bound as a writable depth attachment.
    DepthWrite,
}

impl ResourceState {
    /// Steady state of sampled textures and render pass outputs.
    pub const SHADER_READ: Self = Self::ShaderRead(ReadScope::All);

    /// Whether the GPU may write the resource in this state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::RenderTarget | Self::UnorderedAccess | Self::CopyDst | Self::DepthWrite
        )
    }

    /// Whether this state is only meaningful for depth attachments.
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::DepthRead | Self::DepthWrite)
    }
}

/// Part of a resource a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Subresource {
    /// Every mip level.
    #[default]
    All,
    /// A single mip level.
    Mip(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_states() {
        assert!(ResourceState::RenderTarget.is_write());
        assert!(ResourceState::UnorderedAccess.is_write());
        assert!(!ResourceState::SHADER_READ.is_write());
        assert!(!ResourceState::Present.is_write());
    }

    #[test]
    fn test_read_scopes_are_distinct_states() {
        assert_ne!(
            ResourceState::ShaderRead(ReadScope::Pixel),
            ResourceState::ShaderRead(ReadScope::NonPixel)
        );
        assert_eq!(ResourceState::SHADER_READ, ResourceState::ShaderRead(ReadScope::All));
    }
}
