#![allow(
    irrefutable_let_patterns,
    clippy::new_without_default,
    // Conflicts with `pattern_type_mismatch`
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

use std::sync::Arc;
use strata_graphics::{self as gpu, traits::ResourceDevice as _};
use strata_render as render;

pub mod config;
mod controls;

pub use controls::{Axis, TransformControls};
pub use strata_graphics as graphics;
pub use strata_render::{transform, Mesh, Node, Scene, Surface, Vertex};

pub type AccelerationStructure =
    render::AccelerationStructure<gpu::Buffer, gpu::AccelerationStructure>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no adapter supports ray tracing acceleration structures")]
    NotSupported,
    #[error("unable to create mesh buffers")]
    Device(#[from] gpu::DeviceError),
    #[error(transparent)]
    Render(#[from] render::Error),
}

/// Vulkan context with the acceleration structures of one scene.
pub struct Engine {
    accelerator: render::Accelerator<gpu::Context>,
    meshes: Vec<Arc<Mesh<gpu::Buffer>>>,
    context: gpu::Context,
}

impl Engine {
    pub fn new(config: &config::Engine) -> Result<Self, Error> {
        let context = unsafe {
            gpu::Context::init(gpu::ContextDesc {
                validation: config.validation,
            })
        }
        .map_err(|gpu::NotSupportedError| Error::NotSupported)?;
        let accelerator = render::Accelerator::new(&context, config.acceleration.clone())?;
        Ok(Self {
            accelerator,
            meshes: Vec::new(),
            context,
        })
    }

    pub fn context(&self) -> &gpu::Context {
        &self.context
    }

    pub fn accelerator(&self) -> &render::Accelerator<gpu::Context> {
        &self.accelerator
    }

    fn create_mesh_buffer(
        &self,
        name: &str,
        data: &[u8],
        usage: gpu::BufferUsage,
    ) -> Result<gpu::Buffer, Error> {
        let buffer = self.context.create_buffer(gpu::BufferDesc {
            name,
            size: data.len() as u64,
            memory: gpu::Memory::Shared,
            usage: usage
                | gpu::BufferUsage::STORAGE
                | gpu::BufferUsage::ACCELERATION_STRUCTURE_INPUT
                | gpu::BufferUsage::DEVICE_ADDRESS,
            alignment: 0,
        })?;
        self.context.write_buffer(buffer.into(), data);
        Ok(buffer)
    }

    /// Place mesh data into host-visible buffers. The engine owns them
    /// until it is dropped.
    pub fn create_mesh(
        &mut self,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
        surfaces: Vec<Surface>,
    ) -> Result<Arc<Mesh<gpu::Buffer>>, Error> {
        if vertices.is_empty() {
            return Err(render::Error::from(render::GeometryError::MissingVertexData {
                mesh: name.to_string(),
            })
            .into());
        }
        if indices.is_empty() {
            return Err(render::Error::from(render::GeometryError::MissingIndexData {
                mesh: name.to_string(),
            })
            .into());
        }

        let vertex_buffer = self.create_mesh_buffer(
            &format!("{name}/vertices"),
            bytemuck::cast_slice(vertices),
            gpu::BufferUsage::VERTEX,
        )?;
        let index_buffer = match self.create_mesh_buffer(
            &format!("{name}/indices"),
            bytemuck::cast_slice(indices),
            gpu::BufferUsage::INDEX,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                self.context.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };

        let mesh = Arc::new(Mesh {
            name: name.to_string(),
            geometry: render::GeometryBuffer {
                vertex_buffer,
                vertex_address: self.context.buffer_device_address(vertex_buffer),
                vertex_count: vertices.len() as u32,
                index_buffer,
                index_address: self.context.buffer_device_address(index_buffer),
                index_count: indices.len() as u32,
            },
            surfaces,
        });
        self.meshes.push(Arc::clone(&mesh));
        Ok(mesh)
    }

    /// Build all acceleration structures of `scene`.
    pub fn load_scene(&mut self, scene: &Scene<gpu::Buffer>) -> Result<(), Error> {
        let nodes = scene.mesh_nodes();
        self.accelerator.load_scene(&self.context, &nodes)?;
        Ok(())
    }

    #[profiling::function]
    pub fn refit(&mut self, delta: glam::Mat4) -> Result<(), Error> {
        self.accelerator.refit(&self.context, delta)?;
        Ok(())
    }

    pub fn refit_instances(&mut self, deltas: &[glam::Mat4]) -> Result<(), Error> {
        self.accelerator.refit_instances(&self.context, deltas)?;
        Ok(())
    }

    /// The top-level structure, safe to bind once this returns.
    pub fn top_level(&mut self) -> Result<Option<AccelerationStructure>, Error> {
        self.accelerator.wait_idle(&self.context)?;
        Ok(self.accelerator.top_level().copied())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.accelerator.wait_idle(&self.context) {
            log::error!("Device is unresponsive, leaking the scene: {}", err);
            return;
        }
        self.accelerator.destroy(&self.context);
        for mesh in self.meshes.drain(..) {
            self.context.destroy_buffer(mesh.geometry.vertex_buffer);
            self.context.destroy_buffer(mesh.geometry.index_buffer);
        }
    }
}
