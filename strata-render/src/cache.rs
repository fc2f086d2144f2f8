use std::{collections::HashMap, ops};
use strata_graphics::{
    traits::{CommandDevice, ResourceDevice},
    DeviceAddress,
};

use crate::{blas, AccelerationStructure, BuildConfig, Error, Mesh, MeshNode, SyncGate};

/// Index of a bottom-level structure in its [`BlasCache`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlasHandle(u32);

impl BlasHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bottom-level structures, one per distinct geometry.
///
/// Geometry is identified by the device address of its index buffer.
/// Structures live in an arena until [`BlasCache::destroy`].
pub struct BlasCache<B, A> {
    arena: Vec<AccelerationStructure<B, A>>,
    lookup: HashMap<DeviceAddress, BlasHandle>,
}

impl<B, A> Default for BlasCache<B, A> {
    fn default() -> Self {
        Self {
            arena: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<B, A> ops::Index<BlasHandle> for BlasCache<B, A> {
    type Output = AccelerationStructure<B, A>;
    fn index(&self, handle: BlasHandle) -> &Self::Output {
        &self.arena[handle.index()]
    }
}

impl<B: Copy, A: Copy> BlasCache<B, A> {
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn find(&self, key: DeviceAddress) -> Option<BlasHandle> {
        self.lookup.get(&key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlasHandle, &AccelerationStructure<B, A>)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(index, blas)| (BlasHandle(index as u32), blas))
    }

    /// Return the structure of `mesh`, building it on the first request.
    pub fn get_or_build<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        mesh: &Mesh<B>,
        config: &BuildConfig,
    ) -> Result<BlasHandle, Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        let key = mesh.geometry.key();
        if let Some(handle) = self.find(key) {
            return Ok(handle);
        }
        let blas = blas::build_bottom_level(device, gate, mesh, config)?;
        let handle = BlasHandle(self.arena.len() as u32);
        self.arena.push(blas);
        self.lookup.insert(key, handle);
        Ok(handle)
    }

    /// Resolve every node to a structure, in node order.
    ///
    /// All meshes are validated before anything is built.
    #[profiling::function]
    pub fn build_scene<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        nodes: &[MeshNode<B>],
        config: &BuildConfig,
    ) -> Result<Vec<BlasHandle>, Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        for node in nodes.iter() {
            node.mesh.validate()?;
        }
        let handles = nodes
            .iter()
            .map(|node| self.get_or_build(device, gate, &node.mesh, config))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "Resolved {} mesh nodes to {} bottom-level structures",
            nodes.len(),
            self.arena.len()
        );
        Ok(handles)
    }

    /// Free all structures. The device must be done with them.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        for blas in self.arena.drain(..) {
            blas.free(device);
        }
        self.lookup.clear();
    }
}
