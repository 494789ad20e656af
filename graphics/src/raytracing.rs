//! Ray-tracing acceleration structures.
//!
//! A [`BottomLevelAs`] holds triangle or AABB geometry and a [`TopLevelAs`]
//! places instances of bottom level structures in a scene. Both are created
//! on a [`LogicalDevice`](crate::LogicalDevice) and built on the GPU timeline
//! with [`CommandList::build_bottom_level_as`](crate::CommandList::build_bottom_level_as)
//! and [`CommandList::build_top_level_as`](crate::CommandList::build_top_level_as).
//!
//! Every structure is backed by a device-local result buffer. The headless
//! backend writes an [`AsBuildSummary`] there: the primitive or instance
//! count and the world-space bounds of the structure.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::backend::GpuBuffer;
use crate::error::GraphicsError;
use crate::resources::{BufferDesc, BufferResource};
use crate::types::{Format, IndexType, ResourceDescriptor, ResourceUsage, range_fits};

/// Bytes of one procedural AABB: min then max corner, three `f32` each.
pub const AABB_BYTES: u32 = 24;

/// Row-major 3x4 identity transform.
pub const IDENTITY_TRANSFORM: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

bitflags! {
    /// Build preferences of an acceleration structure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AsBuildFlags: u32 {
        /// The structure can be refit after creation.
        const ALLOW_UPDATE = 1 << 0;
        const ALLOW_COMPACTION = 1 << 1;
        const PREFER_FAST_TRACE = 1 << 2;
        const PREFER_FAST_BUILD = 1 << 3;
        const MINIMIZE_MEMORY = 1 << 4;
    }
}

bitflags! {
    /// Per-geometry traversal flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeometryFlags: u32 {
        /// Any-hit shaders are skipped for this geometry.
        const OPAQUE = 1 << 0;
        const NO_DUPLICATE_ANY_HIT_INVOCATION = 1 << 1;
    }
}

/// Index data of triangle geometry.
#[derive(Debug, Clone, Copy)]
pub struct AsIndices<'a> {
    pub buffer: &'a BufferResource,
    pub offset: u64,
    /// A multiple of three.
    pub num_indices: u32,
    pub index_type: IndexType,
}

/// Where the primitives of one geometry come from.
#[derive(Debug, Clone, Copy)]
pub enum AsGeometrySource<'a> {
    Triangles {
        vertex_buffer: &'a BufferResource,
        vertex_offset: u64,
        vertex_stride: u32,
        num_vertices: u32,
        /// `Rgb32Float`, or `Rg32Float` for positions in the z = 0 plane.
        vertex_format: Format,
        indices: Option<AsIndices<'a>>,
    },
    /// Boxes of [`AABB_BYTES`] each, `stride` bytes apart.
    Aabbs {
        buffer: &'a BufferResource,
        offset: u64,
        stride: u32,
        num_aabbs: u32,
    },
}

/// One geometry of a bottom level structure.
#[derive(Debug, Clone, Copy)]
pub struct AsGeometryDesc<'a> {
    pub source: AsGeometrySource<'a>,
    pub flags: GeometryFlags,
}

impl<'a> AsGeometryDesc<'a> {
    /// Opaque, non-indexed triangles with packed `Rgb32Float` positions.
    pub fn triangles(vertex_buffer: &'a BufferResource, num_vertices: u32) -> Self {
        Self {
            source: AsGeometrySource::Triangles {
                vertex_buffer,
                vertex_offset: 0,
                vertex_stride: Format::Rgb32Float.block_size(),
                num_vertices,
                vertex_format: Format::Rgb32Float,
                indices: None,
            },
            flags: GeometryFlags::OPAQUE,
        }
    }

    /// Opaque procedural boxes packed back to back.
    pub fn aabbs(buffer: &'a BufferResource, num_aabbs: u32) -> Self {
        Self {
            source: AsGeometrySource::Aabbs {
                buffer,
                offset: 0,
                stride: AABB_BYTES,
                num_aabbs,
            },
            flags: GeometryFlags::OPAQUE,
        }
    }

    /// Vertex placement of triangle geometry. Ignored for AABBs.
    pub fn with_vertex_layout(mut self, offset: u64, stride: u32, format: Format) -> Self {
        if let AsGeometrySource::Triangles {
            vertex_offset,
            vertex_stride,
            vertex_format,
            ..
        } = &mut self.source
        {
            *vertex_offset = offset;
            *vertex_stride = stride;
            *vertex_format = format;
        }
        self
    }

    /// Index triangle geometry. Ignored for AABBs.
    pub fn with_indices(mut self, index_data: AsIndices<'a>) -> Self {
        if let AsGeometrySource::Triangles { indices, .. } = &mut self.source {
            *indices = Some(index_data);
        }
        self
    }

    pub fn with_flags(mut self, flags: GeometryFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Descriptor for creating a bottom level structure.
#[derive(Debug, Clone, Default)]
pub struct BottomLevelAsDesc<'a> {
    pub geometries: Vec<AsGeometryDesc<'a>>,
    pub build_flags: AsBuildFlags,
    pub debug_name: Option<String>,
}

impl<'a> BottomLevelAsDesc<'a> {
    pub fn new(geometries: Vec<AsGeometryDesc<'a>>) -> Self {
        Self {
            geometries,
            ..Default::default()
        }
    }

    pub fn with_build_flags(mut self, flags: AsBuildFlags) -> Self {
        self.build_flags = flags;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }
}

/// One instance of a bottom level structure in a top level one.
#[derive(Debug, Clone, Copy)]
pub struct AsInstanceDesc<'a> {
    pub blas: &'a BottomLevelAs,
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    /// Value of `InstanceID()` in shaders.
    pub id: u32,
    /// Visibility mask tested against the ray's mask.
    pub mask: u8,
    /// Offset into the hit group records of the shader binding table.
    pub hit_group_offset: u32,
}

impl<'a> AsInstanceDesc<'a> {
    pub fn new(blas: &'a BottomLevelAs) -> Self {
        Self {
            blas,
            transform: IDENTITY_TRANSFORM,
            id: 0,
            mask: 0xFF,
            hit_group_offset: 0,
        }
    }

    pub fn with_transform(mut self, transform: [f32; 12]) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_hit_group_offset(mut self, offset: u32) -> Self {
        self.hit_group_offset = offset;
        self
    }
}

/// Descriptor for creating a top level structure.
#[derive(Debug, Clone, Default)]
pub struct TopLevelAsDesc<'a> {
    pub instances: Vec<AsInstanceDesc<'a>>,
    pub build_flags: AsBuildFlags,
    pub debug_name: Option<String>,
}

impl<'a> TopLevelAsDesc<'a> {
    pub fn new(instances: Vec<AsInstanceDesc<'a>>) -> Self {
        Self {
            instances,
            ..Default::default()
        }
    }

    pub fn with_build_flags(mut self, flags: AsBuildFlags) -> Self {
        self.build_flags = flags;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }
}

/// New transforms for the first instances of a top level structure.
#[derive(Debug, Clone, Copy)]
pub struct UpdateTopLevelAsDesc<'a> {
    pub top_level_as: &'a TopLevelAs,
    pub transforms: &'a [[f32; 12]],
}

/// What a headless build leaves in a structure's result buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct AsBuildSummary {
    /// 1 for bottom level, 2 for top level, 0 until the first build.
    pub level: u32,
    /// Primitives of a bottom level structure, instances of a top level one.
    pub count: u32,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl AsBuildSummary {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
    pub(crate) const BOTTOM_LEVEL: u32 = 1;
    pub(crate) const TOP_LEVEL: u32 = 2;

    /// Decode the leading bytes of a result buffer.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..Self::SIZE as usize)
            .and_then(|bytes| bytemuck::try_pod_read_unaligned(bytes).ok())
    }

    pub fn is_built(&self) -> bool {
        self.level != 0
    }

    pub(crate) fn new(level: u32, count: u32, bounds: &Bounds) -> Self {
        let (min, max) = bounds.0.unwrap_or_default();
        Self {
            level,
            count,
            min,
            max,
        }
    }

    /// The eight corners of the bounds.
    pub(crate) fn corners(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        (0..8).map(|i| {
            let pick = |axis: usize| {
                if i & (1 << axis) == 0 { self.min[axis] } else { self.max[axis] }
            };
            [pick(0), pick(1), pick(2)]
        })
    }
}

/// Running axis-aligned bounds of a set of points.
#[derive(Debug, Default)]
pub(crate) struct Bounds(Option<([f32; 3], [f32; 3])>);

impl Bounds {
    pub(crate) fn extend(&mut self, point: [f32; 3]) {
        let (min, max) = self.0.get_or_insert((point, point));
        for axis in 0..3 {
            min[axis] = min[axis].min(point[axis]);
            max[axis] = max[axis].max(point[axis]);
        }
    }
}

/// An instance as laid out in a top level structure's instance buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct InstanceRecord {
    pub transform: [f32; 12],
    pub id: u32,
    pub mask: u32,
    pub hit_group_offset: u32,
    pub reserved: u32,
}

impl InstanceRecord {
    pub(crate) const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub(crate) fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let t = &self.transform;
        [
            t[0] * p[0] + t[1] * p[1] + t[2] * p[2] + t[3],
            t[4] * p[0] + t[5] * p[1] + t[6] * p[2] + t[7],
            t[8] * p[0] + t[9] * p[1] + t[10] * p[2] + t[11],
        ]
    }
}

/// Index data captured for a build.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub buffer: Arc<GpuBuffer>,
    pub offset: u64,
    pub num_indices: u32,
    pub index_type: IndexType,
}

/// Geometry captured for a build; keeps its source buffers alive.
#[derive(Debug, Clone)]
pub(crate) enum AsGeometry {
    Triangles {
        vertices: Arc<GpuBuffer>,
        vertex_offset: u64,
        vertex_stride: u32,
        num_vertices: u32,
        vertex_format: Format,
        indices: Option<IndexData>,
    },
    Aabbs {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        stride: u32,
        num_aabbs: u32,
    },
}

impl AsGeometry {
    fn from_desc(desc: &AsGeometryDesc<'_>) -> Result<Self, GraphicsError> {
        let invalid = |msg: String| Err(GraphicsError::InvalidParameter(msg));
        match desc.source {
            AsGeometrySource::Triangles {
                vertex_buffer,
                vertex_offset,
                vertex_stride,
                num_vertices,
                vertex_format,
                indices,
            } => {
                if !matches!(vertex_format, Format::Rgb32Float | Format::Rg32Float) {
                    return invalid(format!("{vertex_format:?} is not a vertex position format"));
                }
                if num_vertices == 0 || vertex_stride < vertex_format.block_size() {
                    return invalid(format!(
                        "{num_vertices} vertices with a {vertex_stride}-byte stride"
                    ));
                }
                let span = u64::from(num_vertices - 1)
                    .checked_mul(u64::from(vertex_stride))
                    .and_then(|span| span.checked_add(u64::from(vertex_format.block_size())));
                if !span.is_some_and(|span| range_fits(vertex_offset, span, vertex_buffer.num_bytes())) {
                    return invalid(format!(
                        "{num_vertices} vertices at offset {vertex_offset} exceed the vertex buffer"
                    ));
                }
                let indices = match indices {
                    Some(i) => {
                        let bytes = u64::from(i.num_indices) * i.index_type.num_bytes();
                        if i.num_indices == 0 || i.num_indices % 3 != 0 {
                            return invalid(format!("{} indices do not form triangles", i.num_indices));
                        }
                        if !range_fits(i.offset, bytes, i.buffer.num_bytes()) {
                            return invalid(format!(
                                "{} indices at offset {} exceed the index buffer",
                                i.num_indices, i.offset
                            ));
                        }
                        Some(IndexData {
                            buffer: Arc::clone(i.buffer.handle()),
                            offset: i.offset,
                            num_indices: i.num_indices,
                            index_type: i.index_type,
                        })
                    }
                    None if num_vertices % 3 != 0 => {
                        return invalid(format!("{num_vertices} vertices do not form triangles"));
                    }
                    None => None,
                };
                Ok(Self::Triangles {
                    vertices: Arc::clone(vertex_buffer.handle()),
                    vertex_offset,
                    vertex_stride,
                    num_vertices,
                    vertex_format,
                    indices,
                })
            }
            AsGeometrySource::Aabbs {
                buffer,
                offset,
                stride,
                num_aabbs,
            } => {
                if num_aabbs == 0 || stride < AABB_BYTES || stride % 8 != 0 {
                    return invalid(format!("{num_aabbs} AABBs with a {stride}-byte stride"));
                }
                let span = u64::from(num_aabbs - 1) * u64::from(stride) + u64::from(AABB_BYTES);
                if !range_fits(offset, span, buffer.num_bytes()) {
                    return invalid(format!(
                        "{num_aabbs} AABBs at offset {offset} exceed the buffer"
                    ));
                }
                Ok(Self::Aabbs {
                    buffer: Arc::clone(buffer.handle()),
                    offset,
                    stride,
                    num_aabbs,
                })
            }
        }
    }

    pub(crate) fn num_primitives(&self) -> u32 {
        match self {
            Self::Triangles {
                indices: Some(indices),
                ..
            } => indices.num_indices / 3,
            Self::Triangles { num_vertices, .. } => num_vertices / 3,
            Self::Aabbs { num_aabbs, .. } => *num_aabbs,
        }
    }
}

fn result_buffer_desc(kind: &str, debug_name: &Option<String>) -> BufferDesc {
    BufferDesc::new(AsBuildSummary::SIZE)
        .with_descriptor(ResourceDescriptor::ACCELERATION_STRUCTURE | ResourceDescriptor::RW_BUFFER)
        .with_initial_usage(ResourceUsage::ACCELERATION_STRUCTURE_WRITE)
        .with_usages(ResourceUsage::ACCELERATION_STRUCTURE_READ)
        .with_debug_name(match debug_name {
            Some(name) => format!("{name} ({kind})"),
            None => kind.to_string(),
        })
}

/// A bottom level acceleration structure.
pub struct BottomLevelAs {
    id: u64,
    buffer: BufferResource,
    geometries: Arc<[AsGeometry]>,
    build_flags: AsBuildFlags,
}

impl BottomLevelAs {
    pub(crate) fn result_buffer_desc(desc: &BottomLevelAsDesc<'_>) -> BufferDesc {
        result_buffer_desc("bottom level acceleration structure", &desc.debug_name)
    }

    /// Capture and validate the geometry of `desc`.
    pub(crate) fn geometry(desc: &BottomLevelAsDesc<'_>) -> Result<Vec<AsGeometry>, GraphicsError> {
        if desc.geometries.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "bottom level structure {:?} has no geometry",
                desc.debug_name
            )));
        }
        desc.geometries
            .iter()
            .enumerate()
            .map(|(i, geometry)| {
                AsGeometry::from_desc(geometry).map_err(|e| {
                    GraphicsError::InvalidParameter(format!(
                        "bottom level structure {:?}, geometry {i}: {e}",
                        desc.debug_name
                    ))
                })
            })
            .collect()
    }

    pub(crate) fn new(
        id: u64,
        buffer: BufferResource,
        geometries: Vec<AsGeometry>,
        build_flags: AsBuildFlags,
    ) -> Self {
        Self {
            id,
            buffer,
            geometries: geometries.into(),
            build_flags,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The device-local result buffer.
    pub fn buffer(&self) -> &BufferResource {
        &self.buffer
    }

    pub fn build_flags(&self) -> AsBuildFlags {
        self.build_flags
    }

    pub fn num_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn num_primitives(&self) -> u32 {
        self.geometries.iter().map(AsGeometry::num_primitives).sum()
    }

    pub(crate) fn geometries(&self) -> &Arc<[AsGeometry]> {
        &self.geometries
    }
}

impl std::fmt::Debug for BottomLevelAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BottomLevelAs")
            .field("id", &self.id)
            .field("num_geometries", &self.num_geometries())
            .field("num_primitives", &self.num_primitives())
            .field("build_flags", &self.build_flags)
            .finish()
    }
}

/// A top level acceleration structure.
pub struct TopLevelAs {
    id: u64,
    buffer: BufferResource,
    /// Host-visible array of [`InstanceRecord`]s.
    instances: BufferResource,
    blas_buffers: Arc<[Arc<GpuBuffer>]>,
    build_flags: AsBuildFlags,
}

impl TopLevelAs {
    pub(crate) fn result_buffer_desc(desc: &TopLevelAsDesc<'_>) -> BufferDesc {
        result_buffer_desc("top level acceleration structure", &desc.debug_name)
    }

    pub(crate) fn instance_buffer_desc(desc: &TopLevelAsDesc<'_>) -> Result<BufferDesc, GraphicsError> {
        if desc.instances.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "top level structure {:?} has no instances",
                desc.debug_name
            )));
        }
        Ok(BufferDesc::upload(InstanceRecord::SIZE * desc.instances.len() as u64)
            .with_usages(ResourceUsage::ACCELERATION_STRUCTURE_READ)
            .with_debug_name("acceleration structure instances"))
    }

    pub(crate) fn new(
        id: u64,
        buffer: BufferResource,
        instances: BufferResource,
        desc: &TopLevelAsDesc<'_>,
    ) -> Result<Self, GraphicsError> {
        let records: Vec<InstanceRecord> = desc
            .instances
            .iter()
            .map(|instance| InstanceRecord {
                transform: instance.transform,
                id: instance.id,
                mask: u32::from(instance.mask),
                hit_group_offset: instance.hit_group_offset,
                reserved: 0,
            })
            .collect();
        instances.handle().write(0, bytemuck::cast_slice(&records))?;
        Ok(Self {
            id,
            buffer,
            instances,
            blas_buffers: desc
                .instances
                .iter()
                .map(|instance| Arc::clone(instance.blas.buffer().handle()))
                .collect(),
            build_flags: desc.build_flags,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The device-local result buffer.
    pub fn buffer(&self) -> &BufferResource {
        &self.buffer
    }

    pub fn build_flags(&self) -> AsBuildFlags {
        self.build_flags
    }

    pub fn num_instances(&self) -> usize {
        self.blas_buffers.len()
    }

    pub(crate) fn instance_buffer(&self) -> &Arc<GpuBuffer> {
        self.instances.handle()
    }

    pub(crate) fn blas_buffers(&self) -> &Arc<[Arc<GpuBuffer>]> {
        &self.blas_buffers
    }

    /// Overwrite the transforms of the first `transforms.len()` instances.
    pub(crate) fn write_transforms(&self, transforms: &[[f32; 12]]) -> Result<(), GraphicsError> {
        for (i, transform) in transforms.iter().enumerate() {
            self.instances
                .handle()
                .write(i as u64 * InstanceRecord::SIZE, bytemuck::cast_slice(transform))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TopLevelAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopLevelAs")
            .field("id", &self.id)
            .field("num_instances", &self.num_instances())
            .field("build_flags", &self.build_flags)
            .finish()
    }
}

static_assertions::const_assert_eq!(AsBuildSummary::SIZE, 32);
static_assertions::const_assert_eq!(InstanceRecord::SIZE, 64);
static_assertions::assert_impl_all!(BottomLevelAs: Send, Sync);
static_assertions::assert_impl_all!(TopLevelAs: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::command::ExecuteDesc;
    use crate::device::LogicalDevice;
    use crate::test_utils::headless_device;
    use crate::types::QueueType;

    fn translation(x: f32, y: f32, z: f32) -> [f32; 12] {
        let mut transform = IDENTITY_TRANSFORM;
        transform[3] = x;
        transform[7] = y;
        transform[11] = z;
        transform
    }

    fn upload(device: &LogicalDevice, data: &[u8]) -> BufferResource {
        let mut buffer = device
            .create_buffer_resource(&BufferDesc::upload(data.len() as u64))
            .unwrap();
        buffer.write_data(0, data).unwrap();
        buffer
    }

    fn summary(device: &LogicalDevice, buffer: &BufferResource) -> AsBuildSummary {
        AsBuildSummary::from_bytes(&device.debug_read_buffer(buffer).unwrap()).unwrap()
    }

    fn run(device: &LogicalDevice, record: impl FnOnce(&mut crate::CommandList)) {
        let fence = device.create_fence().unwrap();
        let mut list = device.create_command_list(QueueType::Compute).unwrap();
        list.begin();
        record(&mut list);
        list.end();
        list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
        fence.wait();
        assert!(!device.is_device_lost());
    }

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, -1.0];

    #[test]
    fn test_bottom_level_bounds_cover_vertices() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]))
            .unwrap();
        assert_eq!(blas.num_primitives(), 1);
        assert!(!summary(&device, blas.buffer()).is_built());

        run(&device, |list| list.build_bottom_level_as(&blas));

        let built = summary(&device, blas.buffer());
        assert_eq!(built.level, AsBuildSummary::BOTTOM_LEVEL);
        assert_eq!(built.count, 1);
        assert_eq!(built.min, [0.0, 0.0, -1.0]);
        assert_eq!(built.max, [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_indexed_geometry_only_bounds_referenced_vertices() {
        let device = headless_device();
        // The fourth vertex is never indexed.
        let mut positions = TRIANGLE.to_vec();
        positions.extend_from_slice(&[100.0, 100.0, 100.0]);
        let vertices = upload(&device, bytemuck::cast_slice(&positions));
        let indices = upload(&device, bytemuck::cast_slice(&[2u16, 1, 0]));
        let geometry = AsGeometryDesc::triangles(&vertices, 4).with_indices(AsIndices {
            buffer: &indices,
            offset: 0,
            num_indices: 3,
            index_type: IndexType::Uint16,
        });
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![geometry]))
            .unwrap();

        run(&device, |list| list.build_bottom_level_as(&blas));

        assert_eq!(summary(&device, blas.buffer()).max, [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_aabb_geometry_with_padded_stride() {
        let device = headless_device();
        let boxes: [f32; 16] = [
            -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 0.0, 0.0, //
            4.0, 4.0, 4.0, 5.0, 6.0, 7.0, 0.0, 0.0,
        ];
        let buffer = upload(&device, bytemuck::cast_slice(&boxes));
        let geometry = AsGeometryDesc {
            source: AsGeometrySource::Aabbs {
                buffer: &buffer,
                offset: 0,
                stride: 32,
                num_aabbs: 2,
            },
            flags: GeometryFlags::empty(),
        };
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![geometry]))
            .unwrap();

        run(&device, |list| list.build_bottom_level_as(&blas));

        let built = summary(&device, blas.buffer());
        assert_eq!(built.count, 2);
        assert_eq!(built.min, [-1.0, -1.0, -1.0]);
        assert_eq!(built.max, [5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_top_level_bounds_follow_instances_and_updates() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]))
            .unwrap();
        let tlas = device
            .create_top_level_as(
                &TopLevelAsDesc::new(vec![
                    AsInstanceDesc::new(&blas).with_id(0),
                    AsInstanceDesc::new(&blas)
                        .with_id(1)
                        .with_transform(translation(10.0, 0.0, 0.0)),
                ])
                .with_build_flags(AsBuildFlags::ALLOW_UPDATE),
            )
            .unwrap();
        assert_eq!(tlas.num_instances(), 2);

        run(&device, |list| {
            list.build_bottom_level_as(&blas);
            list.build_top_level_as(&tlas);
        });
        let built = summary(&device, tlas.buffer());
        assert_eq!(built.level, AsBuildSummary::TOP_LEVEL);
        assert_eq!(built.count, 2);
        assert_eq!(built.min, [0.0, 0.0, -1.0]);
        assert_eq!(built.max, [11.0, 2.0, 0.0]);

        run(&device, |list| {
            list.update_top_level_as(&UpdateTopLevelAsDesc {
                top_level_as: &tlas,
                transforms: &[translation(0.0, -5.0, 0.0)],
            })
        });
        let updated = summary(&device, tlas.buffer());
        assert_eq!(updated.min, [0.0, -5.0, -1.0]);
        assert_eq!(updated.max, [11.0, 2.0, 0.0]);
    }

    #[test]
    fn test_instances_of_unbuilt_structures_add_no_bounds() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]))
            .unwrap();
        let tlas = device
            .create_top_level_as(&TopLevelAsDesc::new(vec![AsInstanceDesc::new(&blas)]))
            .unwrap();

        run(&device, |list| list.build_top_level_as(&tlas));

        let built = summary(&device, tlas.buffer());
        assert_eq!(built.count, 1);
        assert_eq!(built.min, [0.0; 3]);
        assert_eq!(built.max, [0.0; 3]);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let create = |geometry| device.create_bottom_level_as(&BottomLevelAsDesc::new(vec![geometry]));

        // Six vertices do not fit in a three-vertex buffer.
        assert!(matches!(
            create(AsGeometryDesc::triangles(&vertices, 6)),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(create(AsGeometryDesc::triangles(&vertices, 2)).is_err());
        assert!(
            create(AsGeometryDesc::triangles(&vertices, 3).with_vertex_layout(0, 4, Format::R32Float))
                .is_err()
        );
        assert!(create(AsGeometryDesc::aabbs(&vertices, 2)).is_err());
        assert!(device.create_bottom_level_as(&BottomLevelAsDesc::default()).is_err());
        assert!(device.create_top_level_as(&TopLevelAsDesc::default()).is_err());
    }

    #[test]
    #[should_panic(expected = "ALLOW_UPDATE")]
    fn test_update_requires_allow_update() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]))
            .unwrap();
        let tlas = device
            .create_top_level_as(&TopLevelAsDesc::new(vec![AsInstanceDesc::new(&blas)]))
            .unwrap();
        let mut list = device.create_command_list(QueueType::Compute).unwrap();
        list.begin();
        list.update_top_level_as(&UpdateTopLevelAsDesc {
            top_level_as: &tlas,
            transforms: &[IDENTITY_TRANSFORM],
        });
    }

    #[test]
    #[should_panic(expected = "not supported on the copy queue")]
    fn test_builds_rejected_on_copy_queue() {
        let device = headless_device();
        let vertices = upload(&device, bytemuck::cast_slice(&TRIANGLE));
        let blas = device
            .create_bottom_level_as(&BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]))
            .unwrap();
        let mut list = device.create_command_list(QueueType::Copy).unwrap();
        list.begin();
        list.build_bottom_level_as(&blas);
    }
}
