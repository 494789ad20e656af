//! Shader resource binding.
//!
//! A [`RootSignature`] is the validated binding layout of a shader program,
//! grouped by register space. Each space is bound through a
//! [`ResourceBindGroup`] whose descriptors are written from a per-heap
//! [`DescriptorAllocator`](crate::DescriptorAllocator).

mod bind_group;
mod local;
mod root_signature;

pub use bind_group::{
    BindGroupEntry, BindGroupResource, BindGroupUpdateDesc, ResourceBindGroup,
    ResourceBindGroupDesc,
};
pub use local::{
    LOCAL_DESCRIPTOR_SIZE, SHADER_RECORD_ALIGNMENT, ShaderLocalDataDesc, ShaderLocalDataLayout,
};
pub use root_signature::{
    LayoutBinding, MAX_ROOT_CONSTANT_BYTES, RegisterSpaceLayout, ResourceBindingDesc,
    RootConstantDesc, RootConstantLayout, RootSignature, RootSignatureDesc, RootSignatureLayout,
    StaticSamplerDesc,
};
