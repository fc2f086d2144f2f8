use std::sync::Arc;
use strata_graphics::DeviceAddress;

use crate::GeometryError;

/// GPU-resident vertex and index data of one mesh, as left by the loader.
///
/// Vertices are [`crate::Vertex`] records, indices are 32-bit. Both
/// buffers need a device address for acceleration structure builds.
#[derive(Clone, Copy, Debug)]
pub struct GeometryBuffer<B> {
    pub vertex_buffer: B,
    pub vertex_address: DeviceAddress,
    pub vertex_count: u32,
    pub index_buffer: B,
    pub index_address: DeviceAddress,
    pub index_count: u32,
}

impl<B> GeometryBuffer<B> {
    /// Identity of the geometry for deduplication purposes.
    pub fn key(&self) -> DeviceAddress {
        self.index_address
    }
}

/// Index range `[start_index, start_index + count)` drawn with one material.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Surface {
    pub start_index: u32,
    pub count: u32,
}

#[derive(Debug)]
pub struct Mesh<B> {
    pub name: String,
    pub geometry: GeometryBuffer<B>,
    pub surfaces: Vec<Surface>,
}

impl<B> Mesh<B> {
    /// Check that the mesh can be turned into triangle geometry.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let geo = &self.geometry;
        if geo.vertex_address == 0 || geo.vertex_count == 0 {
            return Err(GeometryError::MissingVertexData {
                mesh: self.name.clone(),
            });
        }
        if geo.index_address == 0 || geo.index_count == 0 {
            return Err(GeometryError::MissingIndexData {
                mesh: self.name.clone(),
            });
        }
        if self.surfaces.is_empty() {
            return Err(GeometryError::NoSurfaces {
                mesh: self.name.clone(),
            });
        }
        for (index, surface) in self.surfaces.iter().enumerate() {
            if surface.count == 0 || surface.count % 3 != 0 {
                return Err(GeometryError::TriangleCount {
                    mesh: self.name.clone(),
                    surface: index,
                    count: surface.count,
                });
            }
            let end = surface.start_index as u64 + surface.count as u64;
            if end > geo.index_count as u64 {
                return Err(GeometryError::SurfaceOutOfRange {
                    mesh: self.name.clone(),
                    surface: index,
                    end,
                    index_count: geo.index_count,
                });
            }
        }
        Ok(())
    }

    pub fn triangle_count(&self) -> u32 {
        self.surfaces.iter().map(|s| s.count / 3).sum()
    }
}

/// A placement of a mesh in the world.
#[derive(Debug)]
pub struct MeshNode<B> {
    pub mesh: Arc<Mesh<B>>,
    pub world_transform: glam::Mat4,
}

impl<B> Clone for MeshNode<B> {
    fn clone(&self) -> Self {
        Self {
            mesh: Arc::clone(&self.mesh),
            world_transform: self.world_transform,
        }
    }
}

#[derive(Debug)]
pub struct Node<B> {
    pub name: String,
    pub local_transform: glam::Mat4,
    pub mesh: Option<Arc<Mesh<B>>>,
    pub children: Vec<Node<B>>,
}

impl<B> Node<B> {
    pub fn new(name: &str, local_transform: glam::Mat4) -> Self {
        Self {
            name: name.to_string(),
            local_transform,
            mesh: None,
            children: Vec::new(),
        }
    }

    pub fn with_mesh(mut self, mesh: &Arc<Mesh<B>>) -> Self {
        self.mesh = Some(Arc::clone(mesh));
        self
    }

    pub fn with_child(mut self, child: Node<B>) -> Self {
        self.children.push(child);
        self
    }

    fn populate(&self, parent_transform: glam::Mat4, nodes: &mut Vec<MeshNode<B>>) {
        let world_transform = parent_transform * self.local_transform;
        if let Some(ref mesh) = self.mesh {
            nodes.push(MeshNode {
                mesh: Arc::clone(mesh),
                world_transform,
            });
        }
        for child in self.children.iter() {
            child.populate(world_transform, nodes);
        }
    }
}

#[derive(Debug)]
pub struct Scene<B> {
    pub roots: Vec<Node<B>>,
}

impl<B> Default for Scene<B> {
    fn default() -> Self {
        Self { roots: Vec::new() }
    }
}

impl<B> Scene<B> {
    /// Flatten the node tree depth-first into world-space mesh placements.
    /// The order defines the instance indices.
    pub fn mesh_nodes(&self) -> Vec<MeshNode<B>> {
        let mut nodes = Vec::new();
        for root in self.roots.iter() {
            root.populate(glam::Mat4::IDENTITY, &mut nodes);
        }
        nodes
    }
}
