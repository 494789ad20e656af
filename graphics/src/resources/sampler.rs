//! Sampler objects.

use std::sync::Arc;

use crate::backend::GpuSampler;
use crate::types::SamplerDesc;

/// A texture sampler.
pub struct Sampler {
    id: u64,
    handle: Arc<GpuSampler>,
    desc: SamplerDesc,
}

impl Sampler {
    pub(crate) fn new(id: u64, handle: Arc<GpuSampler>, desc: SamplerDesc) -> Self {
        Self { id, handle, desc }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub(crate) fn handle(&self) -> &Arc<GpuSampler> {
        &self.handle
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("id", &self.id)
            .field("debug_name", &self.desc.debug_name)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
