use strata_graphics::BuildFlags;

fn default_fence_timeout_ms() -> u32 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_instance_mask() -> u8 {
    0xFF
}

/// Parameters of acceleration structure builds.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct BuildConfig {
    /// Bound on every fence wait of the build gate.
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u32,
    #[serde(default = "default_true")]
    pub prefer_fast_trace: bool,
    /// Mark all geometry opaque, skipping any-hit invocations.
    #[serde(default = "default_true")]
    pub opaque_geometry: bool,
    /// Visibility mask of every instance. All rays see `0xFF`.
    #[serde(default = "default_instance_mask")]
    pub instance_mask: u8,
    /// Shader binding table record of the shared hit group.
    #[serde(default)]
    pub hit_group_offset: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: default_fence_timeout_ms(),
            prefer_fast_trace: default_true(),
            opaque_geometry: default_true(),
            instance_mask: default_instance_mask(),
            hit_group_offset: 0,
        }
    }
}

impl BuildConfig {
    pub fn bottom_level_flags(&self) -> BuildFlags {
        if self.prefer_fast_trace {
            BuildFlags::PREFER_FAST_TRACE
        } else {
            BuildFlags::PREFER_FAST_BUILD
        }
    }

    /// Top-level structures are always refittable.
    pub fn top_level_flags(&self) -> BuildFlags {
        self.bottom_level_flags() | BuildFlags::ALLOW_UPDATE
    }
}
