use strata_graphics::{
    limits,
    traits::{
        AccelerationStructureEncoder as _, CommandDevice, CommandEncoder as _, ResourceDevice,
    },
    AccelerationStructureDesc, AccelerationStructureMesh, AccelerationStructureSizes,
    AccelerationStructureType, BufferDesc, BufferUsage, DeviceAddress, GenericBufferPiece,
    IndexType, Memory, VertexFormat,
};

use crate::{BuildConfig, Error, Mesh, SyncGate, Vertex};

/// A built acceleration structure with its backing storage.
#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct AccelerationStructure<B, A> {
    pub raw: A,
    pub buffer: B,
    pub address: DeviceAddress,
}

impl<B: Copy, A: Copy> AccelerationStructure<B, A> {
    pub(crate) fn free<D>(&self, device: &D)
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        device.destroy_acceleration_structure(self.raw);
        device.destroy_buffer(self.buffer);
    }
}

/// Resources created by a build that has not been handed out yet.
/// Released as a whole if the build fails before submission.
pub(crate) struct Pending<B, A> {
    buffers: Vec<B>,
    acceleration_structure: Option<A>,
}

impl<B: Copy, A: Copy> Pending<B, A> {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Vec::new(),
            acceleration_structure: None,
        }
    }

    pub(crate) fn create_buffer<D>(
        &mut self,
        device: &D,
        what: &'static str,
        desc: BufferDesc,
    ) -> Result<B, Error>
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        let buffer = device
            .create_buffer(desc)
            .map_err(|source| Error::Allocation { what, source })?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    pub(crate) fn create_acceleration_structure<D>(
        &mut self,
        device: &D,
        desc: AccelerationStructureDesc<B>,
    ) -> Result<A, Error>
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        let raw = device
            .create_acceleration_structure(desc)
            .map_err(|source| Error::Device {
                what: "acceleration structure creation",
                source,
            })?;
        self.acceleration_structure = Some(raw);
        Ok(raw)
    }

    pub(crate) fn release<D>(self, device: &D)
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        if let Some(raw) = self.acceleration_structure {
            device.destroy_acceleration_structure(raw);
        }
        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
    }
}

/// Describe a scratch buffer satisfying the device's scratch alignment.
pub(crate) fn scratch_desc<'a>(name: &'a str, size: u64, alignment: u64) -> BufferDesc<'a> {
    BufferDesc {
        name,
        size,
        memory: Memory::Device,
        usage: BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
        alignment,
    }
}

/// One triangle geometry per surface, all sharing the mesh buffers.
pub(crate) fn describe_surfaces<B: Copy>(
    mesh: &Mesh<B>,
    config: &BuildConfig,
) -> Vec<AccelerationStructureMesh<B>> {
    let geo = &mesh.geometry;
    mesh.surfaces
        .iter()
        .map(|surface| AccelerationStructureMesh {
            vertex_data: geo.vertex_buffer.into(),
            vertex_format: VertexFormat::F32Vec3,
            vertex_stride: Vertex::STRIDE,
            vertex_count: geo.vertex_count,
            index_data: GenericBufferPiece {
                buffer: geo.index_buffer,
                offset: surface.start_index as u64 * IndexType::U32.size(),
            },
            index_type: IndexType::U32,
            triangle_count: surface.count / 3,
            is_opaque: config.opaque_geometry,
        })
        .collect()
}

/// Build one bottom-level structure over all surfaces of `mesh`.
///
/// The build is submitted without waiting. The scratch buffer is retired
/// to the gate, and the following submission orders after this one.
#[profiling::function]
pub(crate) fn build_bottom_level<D: CommandDevice>(
    device: &D,
    gate: &mut SyncGate<D>,
    mesh: &Mesh<D::Buffer>,
    config: &BuildConfig,
) -> Result<AccelerationStructure<D::Buffer, D::AccelerationStructure>, Error> {
    mesh.validate()?;
    let meshes = describe_surfaces(mesh, config);
    let flags = config.bottom_level_flags();
    let sizes = device
        .get_bottom_level_acceleration_structure_sizes(&meshes, flags)
        .map_err(|source| Error::SizeQuery {
            what: "bottom-level structure",
            source,
        })?;
    log::debug!(
        "BLAS '{}' with {} surfaces: {} bytes, {} scratch",
        mesh.name,
        meshes.len(),
        sizes.data,
        sizes.scratch
    );

    let mut pending = Pending::new();
    let resources = allocate_bottom_level(device, &mesh.name, sizes, &mut pending);
    let (raw, buffer, scratch) = match resources {
        Ok(resources) => resources,
        Err(err) => {
            pending.release(device);
            return Err(err);
        }
    };

    let submitted = gate.submit(device, |encoder| {
        let mut pass = encoder.acceleration_structure("BLAS");
        pass.build_bottom_level(raw, &meshes, flags, scratch.into());
        pass.barrier();
    });
    if let Err(err) = submitted {
        // The device never saw the new structure.
        device.destroy_acceleration_structure(raw);
        device.destroy_buffer(buffer);
        device.destroy_buffer(scratch);
        return Err(err);
    }
    gate.retire(scratch);

    Ok(AccelerationStructure {
        raw,
        buffer,
        address: device.acceleration_structure_device_address(raw),
    })
}

fn allocate_bottom_level<D: ResourceDevice>(
    device: &D,
    name: &str,
    sizes: AccelerationStructureSizes,
    pending: &mut Pending<D::Buffer, D::AccelerationStructure>,
) -> Result<(D::AccelerationStructure, D::Buffer, D::Buffer), Error> {
    let buffer = pending.create_buffer(
        device,
        "bottom-level storage",
        BufferDesc {
            name,
            size: sizes.data,
            memory: Memory::Device,
            usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::DEVICE_ADDRESS,
            alignment: limits::ACCELERATION_STRUCTURE_OFFSET_ALIGNMENT,
        },
    )?;
    let scratch_name = format!("{name}/scratch");
    let scratch = pending.create_buffer(
        device,
        "bottom-level scratch",
        scratch_desc(
            &scratch_name,
            sizes.scratch,
            device.limits().min_scratch_alignment,
        ),
    )?;
    let raw = pending.create_acceleration_structure(
        device,
        AccelerationStructureDesc {
            name,
            ty: AccelerationStructureType::BottomLevel,
            buffer: buffer.into(),
            size: sizes.data,
        },
    )?;
    Ok((raw, buffer, scratch))
}
