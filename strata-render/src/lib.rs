#![allow(irrefutable_let_patterns, clippy::new_without_default)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

mod accelerator;
mod blas;
mod cache;
pub mod config;
mod error;
mod gate;
pub mod instance;
pub mod scene;
mod tlas;
pub mod transform;

pub use accelerator::Accelerator;
pub use blas::AccelerationStructure;
pub use cache::{BlasCache, BlasHandle};
pub use config::BuildConfig;
pub use error::{Error, ErrorKind, GeometryError};
pub use gate::SyncGate;
pub use scene::{GeometryBuffer, Mesh, MeshNode, Node, Scene, Surface};
pub use tlas::{TlasBuilder, TlasStage};

/// Interleaved vertex, as produced by the mesh loader.
/// Only the position is read by acceleration structure builds.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv_x: f32,
    pub normal: [f32; 3],
    pub uv_y: f32,
    pub color: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}
