// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Driver configuration knobs.

use crate::layout::MemoryLayout;
use crate::sys::time::Duration;

/// Per-context driver configuration.
///
/// Fixed for the lifetime of a context.  Build one with [`DriverConfigBuilder`] or take the
/// [`Default`].
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Use the hardware transfer engine at all.
    pub hwtq_enabled: bool,
    /// Let depth and stencil contents be discarded at the end of a scene rather than stored.
    pub discard_depth_stencil: bool,
    /// Whether a packed depth-stencil attachment can fill the depth and stencil slots.
    pub packed_depth_stencil: bool,
    /// Whether completeness requires attachments to agree on sample count.
    pub track_multisample: bool,
    /// Layout given to renderbuffer storage.
    pub renderbuffer_layout: MemoryLayout,
    /// How long a failed submission polls its sync objects before handing off to software.
    pub sync_wait_budget: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            hwtq_enabled: true,
            discard_depth_stencil: false,
            packed_depth_stencil: true,
            track_multisample: true,
            renderbuffer_layout: MemoryLayout::Twiddled,
            sync_wait_budget: Duration::from_millis(50),
        }
    }
}

impl DriverConfig {
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::new()
    }
}

/// Builder for [`DriverConfig`] so callers name only the knobs they change.
#[derive(Debug, Clone)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverConfigBuilder {
    pub fn new() -> Self {
        DriverConfigBuilder {
            config: DriverConfig::default(),
        }
    }

    pub fn with_hwtq(mut self, enabled: bool) -> Self {
        self.config.hwtq_enabled = enabled;
        self
    }

    pub fn with_discard_depth_stencil(mut self, discard: bool) -> Self {
        self.config.discard_depth_stencil = discard;
        self
    }

    pub fn with_packed_depth_stencil(mut self, supported: bool) -> Self {
        self.config.packed_depth_stencil = supported;
        self
    }

    pub fn with_multisample_tracking(mut self, track: bool) -> Self {
        self.config.track_multisample = track;
        self
    }

    pub fn with_renderbuffer_layout(mut self, layout: MemoryLayout) -> Self {
        self.config.renderbuffer_layout = layout;
        self
    }

    pub fn with_sync_wait_budget(mut self, budget: Duration) -> Self {
        self.config.sync_wait_budget = budget;
        self
    }

    pub fn build(self) -> DriverConfig {
        self.config
    }
}
