//! Texture formats and descriptors.

use bitflags::bitflags;

/// Texture format enumeration.
///
/// Besides the usual color and depth formats this carries the typeless storage
/// formats and sampled-view formats that back depth attachments, see
/// [`TextureFormat::depth_split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,

    // Storage and view formats behind depth attachments
    /// Typeless 16-bit storage of a [`TextureFormat::Depth16Unorm`] attachment.
    R16Typeless,
    /// Typeless 24+8-bit storage of a [`TextureFormat::Depth24PlusStencil8`] attachment.
    R24G8Typeless,
    /// Typeless 32-bit storage of a [`TextureFormat::Depth32Float`] attachment.
    R32Typeless,
    /// Depth plane of a 24+8-bit attachment viewed as a normalized color.
    R24UnormX8,
}

/// How a declared depth format is stored and sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthFormatSplit {
    /// Format used when the texture is bound as a depth target.
    pub depth: TextureFormat,
    /// Typeless format of the underlying allocation.
    pub storage: TextureFormat,
    /// Format of the shader-readable view.
    pub sampled: TextureFormat,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::R24G8Typeless)
    }

    /// Returns true for the storage formats that back depth attachments.
    pub fn is_typeless(&self) -> bool {
        matches!(
            self,
            Self::R16Typeless | Self::R24G8Typeless | Self::R32Typeless
        )
    }

    /// Returns true for sRGB-encoded formats.
    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Unorm
            | Self::R16Float
            | Self::Rg8Unorm
            | Self::Depth16Unorm
            | Self::R16Typeless => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24PlusStencil8
            | Self::Depth32Float
            | Self::R24G8Typeless
            | Self::R32Typeless
            | Self::R24UnormX8 => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Split a declared depth format into its storage and sampled-view formats.
    ///
    /// Returns `None` for color formats.
    pub fn depth_split(&self) -> Option<DepthFormatSplit> {
        let (storage, sampled) = match self {
            Self::Depth16Unorm => (Self::R16Typeless, Self::R16Unorm),
            Self::Depth24PlusStencil8 => (Self::R24G8Typeless, Self::R24UnormX8),
            Self::Depth32Float => (Self::R32Typeless, Self::R32Float),
            _ => return None,
        };
        Some(DepthFormatSplit {
            depth: *self,
            storage,
            sampled,
        })
    }

    /// Maps a typeless storage format back to the depth format it was split from.
    pub fn typeless_depth(&self) -> Option<TextureFormat> {
        match self {
            Self::R16Typeless => Some(Self::Depth16Unorm),
            Self::R24G8Typeless => Some(Self::Depth24PlusStencil8),
            Self::R32Typeless => Some(Self::Depth32Float),
            _ => None,
        }
    }

    /// WGSL texel format name for storage-texture access, or `None` when the
    /// format cannot be written from a compute shader.
    pub fn storage_texel_name(&self) -> Option<&'static str> {
        match self {
            Self::Rgba8Unorm => Some("rgba8unorm"),
            Self::Rgba16Float => Some("rgba16float"),
            Self::Rgba32Float => Some("rgba32float"),
            Self::R32Float => Some("r32float"),
            Self::Rg32Float => Some("rg32float"),
            _ => None,
        }
    }

    /// The format without sRGB encoding.
    pub fn linear(&self) -> Self {
        match self {
            Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            Self::Bgra8UnormSrgb => Self::Bgra8Unorm,
            other => *other,
        }
    }

    /// Format the mip generator writes through. sRGB formats are written through
    /// a linear view with the encoding applied in the shader.
    pub fn mip_storage_format(&self) -> Option<Self> {
        if self.storage_texel_name().is_some() {
            return Some(*self);
        }
        let linear = self.linear();
        (self.is_srgb() && linear.storage_texel_name().is_some()).then_some(linear)
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be sampled in a shader.
        const SAMPLED = 1 << 0;
        /// Texture can be written from a shader as a storage texture.
        const STORAGE = 1 << 1;
        /// Texture can be a color attachment.
        const RENDER_TARGET = 1 << 2;
        /// Texture can be a depth attachment.
        const DEPTH_STENCIL = 1 << 3;
        /// Texture can be copied from.
        const COPY_SRC = 1 << 4;
        /// Texture can be copied to.
        const COPY_DST = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::SAMPLED
    }
}

/// Number of mip levels in a full chain for a `width` x `height` texture:
/// `floor(log2(min(width, height))) + 1`.
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    let min = width.min(height);
    if min == 0 {
        return 1;
    }
    u32::BITS - min.leading_zeros()
}

/// Size of mip level `level` along one axis.
pub fn mip_extent(extent: u32, level: u32) -> u32 {
    (extent >> level).max(1)
}

/// Descriptor for creating a 2D texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
    /// Generate a full mip chain at creation time.
    pub generate_mips: bool,
}

impl TextureDesc {
    /// Create a sampled 2D texture descriptor without mips.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            usage: TextureUsage::SAMPLED,
            generate_mips: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Replace the usage flags.
    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Make the texture writable from compute shaders.
    pub fn with_storage(mut self) -> Self {
        self.usage |= TextureUsage::STORAGE;
        self
    }

    /// Request a full mip chain.
    pub fn with_mips(mut self) -> Self {
        self.generate_mips = true;
        self
    }

    /// Number of mip levels the texture is created with.
    pub fn mip_count(&self) -> u32 {
        if self.generate_mips {
            full_mip_count(self.width, self.height)
        } else {
            1
        }
    }

    /// Whether the texture is storage-writable.
    pub fn is_storage(&self) -> bool {
        self.usage.contains(TextureUsage::STORAGE)
    }

    /// Label used in logs and debug names.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or("texture")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_count() {
        assert_eq!(full_mip_count(256, 256), 9);
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(1600, 900), 10);
        assert_eq!(full_mip_count(300, 17), 5);
        assert_eq!(full_mip_count(0, 64), 1);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        assert_eq!(mip_extent(256, 0), 256);
        assert_eq!(mip_extent(256, 3), 32);
        assert_eq!(mip_extent(5, 4), 1);
    }

    #[test]
    fn test_desc_mip_count() {
        let plain = TextureDesc::new_2d(256, 256, TextureFormat::Rgba8Unorm);
        assert_eq!(plain.mip_count(), 1);
        assert_eq!(plain.with_mips().mip_count(), 9);
    }

    #[test]
    fn test_depth_split() {
        let split = TextureFormat::Depth32Float.depth_split().unwrap();
        assert_eq!(split.storage, TextureFormat::R32Typeless);
        assert_eq!(split.sampled, TextureFormat::R32Float);
        assert_eq!(split.storage.typeless_depth(), Some(TextureFormat::Depth32Float));

        let split = TextureFormat::Depth24PlusStencil8.depth_split().unwrap();
        assert_eq!(split.storage, TextureFormat::R24G8Typeless);
        assert!(split.storage.has_stencil());

        assert!(TextureFormat::Rgba8Unorm.depth_split().is_none());
    }

    #[test]
    fn test_block_size_matches_split() {
        for format in [
            TextureFormat::Depth16Unorm,
            TextureFormat::Depth24PlusStencil8,
            TextureFormat::Depth32Float,
        ] {
            let split = format.depth_split().unwrap();
            assert_eq!(format.block_size(), split.storage.block_size());
            assert_eq!(format.block_size(), split.sampled.block_size());
        }
    }

    #[test]
    fn test_storage_texel_names() {
        assert_eq!(TextureFormat::Rgba8Unorm.storage_texel_name(), Some("rgba8unorm"));
        assert_eq!(TextureFormat::Rgba8UnormSrgb.storage_texel_name(), None);
    }

    #[test]
    fn test_mip_storage_formats() {
        assert_eq!(
            TextureFormat::Rgba8UnormSrgb.mip_storage_format(),
            Some(TextureFormat::Rgba8Unorm)
        );
        assert_eq!(
            TextureFormat::Rgba16Float.mip_storage_format(),
            Some(TextureFormat::Rgba16Float)
        );
        assert_eq!(TextureFormat::Bgra8UnormSrgb.mip_storage_format(), None);
        assert_eq!(TextureFormat::Depth32Float.mip_storage_format(), None);
    }
}
