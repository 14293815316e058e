//! Pipeline Settings
//!
//! [`PipelineSettings`] configures the frame driver, the render target pool
//! and the program cache. It is consumed once by [`Pipeline::new`]; runtime
//! toggles (stable noise, viewport size) go through the pipeline itself.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lustre::settings::PipelineSettings;
//!
//! let settings = PipelineSettings::default()
//!     .with_size(1920, 1080)
//!     .with_stable_noise(false);
//!
//! let pipeline = Pipeline::new(Box::new(HeadlessBackend::new()), settings);
//! ```
//!
//! [`Pipeline::new`]: crate::host::Pipeline::new

/// Configuration for a [`Pipeline`](crate::host::Pipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Format of the two ping-pong composer buffers.
    ///
    /// Default: `Rgba16Float`
    pub color_format: wgpu::TextureFormat,

    /// Initial viewport size in physical pixels.
    ///
    /// Default: `(1280, 720)`
    pub initial_size: (u32, u32),

    /// When `true` the noise frame counter is never reset on `set_dirty`,
    /// so dithering decorrelates across the whole session instead of per
    /// accumulation.
    ///
    /// Default: `true`
    pub stable_noise: bool,

    /// Free pooled targets idle for more than this many frames are disposed.
    ///
    /// Default: `4`
    pub pool_max_idle_frames: u32,

    /// Re-compose shaders on every program cache hit and compare source
    /// hashes. Catches extensions whose cache key misses text-affecting state.
    ///
    /// Default: on in debug builds
    pub validate_program_cache: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            color_format: wgpu::TextureFormat::Rgba16Float,
            initial_size: (1280, 720),
            stable_noise: true,
            pool_max_idle_frames: 4,
            validate_program_cache: cfg!(debug_assertions),
        }
    }
}

impl PipelineSettings {
    #[inline]
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.initial_size = (width.max(1), height.max(1));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_stable_noise(mut self, stable_noise: bool) -> Self {
        self.stable_noise = stable_noise;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_color_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_program_validation(mut self, validate: bool) -> Self {
        self.validate_program_cache = validate;
        self
    }
}
