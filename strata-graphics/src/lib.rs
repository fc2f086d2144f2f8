#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Matches are good and extendable, no need to make an exception here.
    clippy::single_match,
    // Push commands are more regular than macros.
    clippy::vec_init_then_push,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod traits;
pub mod vulkan;

pub use vulkan::{AccelerationStructure, Buffer, CommandEncoder, Context, SyncPoint};

pub type BufferPiece = GenericBufferPiece<Buffer>;

pub mod limits {
    /// Alignment Vulkan guarantees to be sufficient for any
    /// acceleration structure offset inside its backing buffer.
    pub const ACCELERATION_STRUCTURE_OFFSET_ALIGNMENT: u64 = 256;
}

/// GPU virtual address of a buffer or an acceleration structure.
pub type DeviceAddress = u64;

/// Row-major 3x4 affine transform, as consumed by the instance records.
pub type Transform = mint::RowMatrix3x4<f32>;

#[derive(Debug)]
pub struct ContextDesc {
    /// Enable validation layers and debug object names.
    pub validation: bool,
}

#[derive(Debug)]
pub struct NotSupportedError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("operation is not supported by the device")]
    NotSupported,
    #[error("unexpected device result {0}")]
    Unknown(i32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Memory {
    /// Device-local, not visible to the host.
    Device,
    /// Visible to both the host and the device.
    Shared,
    /// Host-visible memory meant for streaming data to the device.
    Upload,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const STORAGE = 1 << 2;
        const INDEX = 1 << 3;
        const VERTEX = 1 << 4;
        /// Read-only input of an acceleration structure build.
        const ACCELERATION_STRUCTURE_INPUT = 1 << 5;
        /// Backing storage of an acceleration structure.
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 6;
        const DEVICE_ADDRESS = 1 << 7;
    }
}

#[derive(Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub memory: Memory,
    pub usage: BufferUsage,
    /// Extra alignment requirement on top of the driver's, zero if none.
    pub alignment: u64,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct GenericBufferPiece<B> {
    pub buffer: B,
    pub offset: u64,
}

impl<B> From<B> for GenericBufferPiece<B> {
    fn from(buffer: B) -> Self {
        Self { buffer, offset: 0 }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Limits {
    /// Minimum alignment of a scratch buffer address used by builds.
    pub min_scratch_alignment: u64,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccelerationStructureType {
    TopLevel,
    BottomLevel,
}

#[derive(Debug)]
pub struct AccelerationStructureDesc<'a, B> {
    pub name: &'a str,
    pub ty: AccelerationStructureType,
    /// Backing storage, created with `ACCELERATION_STRUCTURE_STORAGE` usage.
    pub buffer: GenericBufferPiece<B>,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AccelerationStructureSizes {
    /// Size of the backing storage.
    pub data: u64,
    /// Scratch needed by a build.
    pub scratch: u64,
    /// Scratch needed by an update of an existing structure.
    pub update_scratch: u64,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        /// Required on the initial build for any later update.
        const ALLOW_UPDATE = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BuildMode {
    /// Build from scratch into the destination.
    Build,
    /// Refit the destination in place, using it as the source as well.
    Update,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VertexFormat {
    F32Vec3,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// One triangle geometry of a bottom-level structure.
#[derive(Clone, Debug)]
pub struct AccelerationStructureMesh<B> {
    pub vertex_data: GenericBufferPiece<B>,
    pub vertex_format: VertexFormat,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    /// The offset is the byte offset of the first index of this geometry.
    pub index_data: GenericBufferPiece<B>,
    pub index_type: IndexType,
    pub triangle_count: u32,
    pub is_opaque: bool,
}

/// Instance record in the exact layout the device consumes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AccelerationStructureInstance {
    transform: [[f32; 4]; 3],
    custom_index_and_mask: u32,
    shader_record_offset_and_flags: u32,
    acceleration_structure_reference: u64,
}

impl AccelerationStructureInstance {
    /// Largest custom index (and record offset) that fits into 24 bits.
    pub const MAX_CUSTOM_INDEX: u32 = (1 << 24) - 1;

    pub fn new(
        transform: Transform,
        custom_index: u32,
        mask: u8,
        shader_record_offset: u32,
        acceleration_structure_reference: DeviceAddress,
    ) -> Self {
        debug_assert!(custom_index <= Self::MAX_CUSTOM_INDEX);
        debug_assert!(shader_record_offset <= Self::MAX_CUSTOM_INDEX);
        Self {
            transform: transform.into(),
            custom_index_and_mask: (custom_index & Self::MAX_CUSTOM_INDEX) | (mask as u32) << 24,
            shader_record_offset_and_flags: shader_record_offset & Self::MAX_CUSTOM_INDEX,
            acceleration_structure_reference,
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform.into()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform.into();
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & Self::MAX_CUSTOM_INDEX
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub fn shader_record_offset(&self) -> u32 {
        self.shader_record_offset_and_flags & Self::MAX_CUSTOM_INDEX
    }

    pub fn acceleration_structure_reference(&self) -> DeviceAddress {
        self.acceleration_structure_reference
    }
}

#[derive(Debug)]
pub struct CommandEncoderDesc<'a> {
    pub name: &'a str,
}
