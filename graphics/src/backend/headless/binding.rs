//! Samplers, root signatures, pipelines and descriptor tables.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::DescriptorWrite;
use crate::binding::RootSignatureLayout;
use crate::descriptors::{DescriptorAllocation, DescriptorAllocator};
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, PipelineDesc};

/// Samplers carry no state on the headless backend; nothing samples.
#[derive(Debug)]
pub struct HeadlessSampler;

/// Summary of the layout a root signature was created from.
#[derive(Debug)]
pub struct HeadlessRootSignature {
    pub(crate) num_spaces: usize,
    pub(crate) root_constant_bytes: u32,
}

impl HeadlessRootSignature {
    pub(crate) fn new(layout: &RootSignatureLayout) -> Self {
        Self {
            num_spaces: layout.spaces().len(),
            root_constant_bytes: layout.root_constant_bytes(),
        }
    }
}

/// Pipelines are never run; only the stage list is kept for diagnostics.
#[derive(Debug)]
pub struct HeadlessPipeline {
    pub(crate) bind_point: BindPoint,
    pub(crate) num_stages: usize,
}

impl HeadlessPipeline {
    pub(crate) fn new(desc: &PipelineDesc) -> Self {
        Self {
            bind_point: desc.bind_point,
            num_stages: desc.shaders.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Allocations {
    resources: Option<DescriptorAllocation>,
    samplers: Option<DescriptorAllocation>,
}

/// Descriptor table of one register space, carved out of the emulated heaps.
#[derive(Debug)]
pub struct HeadlessBindGroup {
    resource_heap: Arc<DescriptorAllocator>,
    sampler_heap: Arc<DescriptorAllocator>,
    num_resources: u32,
    num_samplers: u32,
    allocations: Mutex<Allocations>,
}

impl HeadlessBindGroup {
    pub(crate) fn new(
        layout: &RootSignatureLayout,
        register_space: u32,
        resource_heap: Arc<DescriptorAllocator>,
        sampler_heap: Arc<DescriptorAllocator>,
    ) -> Result<Self, GraphicsError> {
        let space = layout.space(register_space).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "register space {register_space} is not part of the root signature"
            ))
        })?;
        Ok(Self {
            resource_heap,
            sampler_heap,
            num_resources: space.num_resources,
            num_samplers: space.num_samplers,
            allocations: Mutex::new(Allocations::default()),
        })
    }

    /// Release the current table and allocate a fresh one holding `writes`.
    pub(crate) fn write(&self, writes: &[DescriptorWrite]) -> Result<(), GraphicsError> {
        let mut allocations = self.allocations.lock();
        self.release(&mut allocations);
        if self.num_resources > 0 {
            allocations.resources = Some(self.resource_heap.allocate(self.num_resources)?);
        }
        if self.num_samplers > 0 {
            allocations.samplers = Some(self.sampler_heap.allocate(self.num_samplers)?);
        }
        log::trace!(
            "Headless: bind group table rewritten with {} descriptors",
            writes.len()
        );
        Ok(())
    }

    fn release(&self, allocations: &mut Allocations) {
        if let Some(allocation) = allocations.resources.take() {
            self.resource_heap.free(allocation);
        }
        if let Some(allocation) = allocations.samplers.take() {
            self.sampler_heap.free(allocation);
        }
    }
}

impl Drop for HeadlessBindGroup {
    fn drop(&mut self) {
        let mut allocations = std::mem::take(self.allocations.get_mut());
        self.release(&mut allocations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{ResourceBindingDesc, RootSignatureDesc};
    use crate::config::GraphicsConfiguration;
    use crate::descriptors::DescriptorHeapType;

    #[test]
    fn test_rewrite_recycles_table() {
        let desc = RootSignatureDesc::new()
            .with_binding(ResourceBindingDesc::cbv("globals", 0, 0))
            .with_binding(ResourceBindingDesc::srv("albedo", 1, 0))
            .with_binding(ResourceBindingDesc::sampler("linear", 0, 0));
        let layout = RootSignatureLayout::from_desc(&desc, &GraphicsConfiguration::default()).unwrap();
        let resources = Arc::new(DescriptorAllocator::new(DescriptorHeapType::CbvSrvUav, 8, Some(1)));
        let samplers = Arc::new(DescriptorAllocator::new(DescriptorHeapType::Sampler, 4, Some(1)));

        let group =
            HeadlessBindGroup::new(&layout, 0, Arc::clone(&resources), Arc::clone(&samplers)).unwrap();
        for _ in 0..10 {
            group.write(&[]).unwrap();
        }
        assert_eq!(resources.allocated(), 2);
        assert_eq!(samplers.allocated(), 1);

        drop(group);
        assert_eq!(resources.allocated(), 0);
        assert_eq!(samplers.allocated(), 0);
    }

    #[test]
    fn test_unknown_space_rejected() {
        let layout = RootSignatureLayout::from_desc(
            &RootSignatureDesc::new().with_binding(ResourceBindingDesc::cbv("globals", 0, 0)),
            &GraphicsConfiguration::default(),
        )
        .unwrap();
        let heap = Arc::new(DescriptorAllocator::new(DescriptorHeapType::CbvSrvUav, 8, None));
        assert!(HeadlessBindGroup::new(&layout, 3, Arc::clone(&heap), heap).is_err());
    }
}
