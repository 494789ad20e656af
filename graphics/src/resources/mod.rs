//! GPU resources.
//!
//! - [`BufferResource`]: GPU memory with explicit heap placement
//! - [`TextureResource`]: images with mips and array layers
//! - [`Sampler`]: texture sampling state
//! - [`StagingBuffer`]: bump-allocated upload memory
//!
//! Buffers and textures are move-only. Their native handles are
//! reference-counted internally so that command lists recorded against them
//! keep the memory alive until the list is reset after its fence.

mod buffer;
mod sampler;
mod staging;
mod texture;

pub use buffer::{BufferDesc, BufferResource, MappedMemory};
pub use sampler::Sampler;
pub use staging::{StagingAllocation, StagingBuffer};
pub use texture::{TextureDesc, TextureResource};
