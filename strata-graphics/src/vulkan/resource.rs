use ash::vk;
use gpu_alloc_ash::AshMemoryDevice;
use std::ptr;

struct Allocation {
    memory: vk::DeviceMemory,
    offset: u64,
    data: *mut u8,
    handle: usize,
}

fn map_allocation_error(error: gpu_alloc::AllocationError) -> crate::DeviceError {
    match error {
        gpu_alloc::AllocationError::OutOfDeviceMemory => crate::DeviceError::OutOfDeviceMemory,
        gpu_alloc::AllocationError::OutOfHostMemory => crate::DeviceError::OutOfHostMemory,
        gpu_alloc::AllocationError::NoCompatibleMemoryTypes => crate::DeviceError::NotSupported,
        _ => crate::DeviceError::OutOfDeviceMemory,
    }
}

fn map_map_error(error: gpu_alloc::MapError) -> crate::DeviceError {
    match error {
        gpu_alloc::MapError::OutOfDeviceMemory => crate::DeviceError::OutOfDeviceMemory,
        gpu_alloc::MapError::OutOfHostMemory => crate::DeviceError::OutOfHostMemory,
        _ => crate::DeviceError::Unknown(vk::Result::ERROR_MEMORY_MAP_FAILED.as_raw()),
    }
}

fn map_buffer_usage(usage: crate::BufferUsage) -> vk::BufferUsageFlags {
    use crate::BufferUsage as Bu;
    use vk::BufferUsageFlags as Buf;
    let mut flags = Buf::empty();
    if usage.contains(Bu::TRANSFER_SRC) {
        flags |= Buf::TRANSFER_SRC;
    }
    if usage.contains(Bu::TRANSFER_DST) {
        flags |= Buf::TRANSFER_DST;
    }
    if usage.contains(Bu::STORAGE) {
        flags |= Buf::STORAGE_BUFFER;
    }
    if usage.contains(Bu::INDEX) {
        flags |= Buf::INDEX_BUFFER;
    }
    if usage.contains(Bu::VERTEX) {
        flags |= Buf::VERTEX_BUFFER;
    }
    if usage.contains(Bu::ACCELERATION_STRUCTURE_INPUT) {
        flags |= Buf::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(Bu::ACCELERATION_STRUCTURE_STORAGE) {
        flags |= Buf::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    if usage.contains(Bu::DEVICE_ADDRESS) {
        flags |= Buf::SHADER_DEVICE_ADDRESS;
    }
    flags
}

fn piece_address(piece: crate::BufferPiece) -> vk::DeviceOrHostAddressConstKHR {
    vk::DeviceOrHostAddressConstKHR {
        device_address: piece.buffer.address + piece.offset,
    }
}

/// Triangle geometries plus their primitive ranges, shared by the size
/// query and the build command.
pub(super) fn make_bottom_level_geometries(
    meshes: &[crate::AccelerationStructureMesh<super::Buffer>],
) -> (
    Vec<vk::AccelerationStructureGeometryKHR>,
    Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
) {
    let mut geometries = Vec::with_capacity(meshes.len());
    let mut ranges = Vec::with_capacity(meshes.len());
    for mesh in meshes {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(super::map_vertex_format(mesh.vertex_format))
            .vertex_data(piece_address(mesh.vertex_data))
            .vertex_stride(mesh.vertex_stride as u64)
            .max_vertex(mesh.vertex_count.saturating_sub(1))
            .index_type(super::map_index_type(mesh.index_type))
            // The index offset is carried by the build range.
            .index_data(piece_address(mesh.index_data.buffer.into()))
            .build();
        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(if mesh.is_opaque {
                vk::GeometryFlagsKHR::OPAQUE
            } else {
                vk::GeometryFlagsKHR::empty()
            })
            .build();
        geometries.push(geometry);
        ranges.push(vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: mesh.triangle_count,
            primitive_offset: mesh.index_data.offset as u32,
            first_vertex: 0,
            transform_offset: 0,
        });
    }
    (geometries, ranges)
}

pub(super) fn make_top_level_geometry(
    instance_data: crate::BufferPiece,
) -> vk::AccelerationStructureGeometryKHR {
    let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
        .array_of_pointers(false)
        .data(piece_address(instance_data))
        .build();
    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        .build()
}

impl super::Context {
    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        memory: crate::Memory,
        alignment: u64,
        device_address: bool,
    ) -> Result<Allocation, crate::DeviceError> {
        let mut manager = self.memory.lock().unwrap();
        let mut alloc_usage = match memory {
            crate::Memory::Device => gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
            crate::Memory::Shared => {
                gpu_alloc::UsageFlags::HOST_ACCESS
                    | gpu_alloc::UsageFlags::DOWNLOAD
                    | gpu_alloc::UsageFlags::UPLOAD
                    | gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS
            }
            crate::Memory::Upload => {
                gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::UPLOAD
            }
        };
        if device_address {
            alloc_usage |= gpu_alloc::UsageFlags::DEVICE_ADDRESS;
        }
        let memory_types = requirements.memory_type_bits & manager.valid_ash_memory_types;
        let mut block = unsafe {
            manager
                .allocator
                .alloc(
                    AshMemoryDevice::wrap(&self.device.core),
                    gpu_alloc::Request {
                        size: requirements.size,
                        align_mask: requirements.alignment.max(alignment).max(1) - 1,
                        usage: alloc_usage,
                        memory_types,
                    },
                )
                .map_err(map_allocation_error)?
        };

        let data = match memory {
            crate::Memory::Device => ptr::null_mut(),
            crate::Memory::Shared | crate::Memory::Upload => {
                let size = block.size() as usize;
                match unsafe { block.map(AshMemoryDevice::wrap(&self.device.core), 0, size) } {
                    Ok(pointer) => pointer.as_ptr(),
                    Err(err) => {
                        unsafe {
                            manager
                                .allocator
                                .dealloc(AshMemoryDevice::wrap(&self.device.core), block)
                        };
                        return Err(map_map_error(err));
                    }
                }
            }
        };

        Ok(Allocation {
            memory: *block.memory(),
            offset: block.offset(),
            data,
            handle: manager.slab.insert(block),
        })
    }

    fn free_memory(&self, handle: usize) {
        let mut manager = self.memory.lock().unwrap();
        let block = manager.slab.remove(handle);
        unsafe {
            manager
                .allocator
                .dealloc(AshMemoryDevice::wrap(&self.device.core), block);
        }
    }
}

impl crate::traits::ResourceDevice for super::Context {
    type Buffer = super::Buffer;
    type AccelerationStructure = super::AccelerationStructure;

    fn create_buffer(&self, desc: crate::BufferDesc) -> Result<super::Buffer, crate::DeviceError> {
        let vk_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(map_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe {
            self.device
                .core
                .create_buffer(&vk_info, None)
                .map_err(super::map_device_error)?
        };
        let requirements = unsafe { self.device.core.get_buffer_memory_requirements(raw) };
        let device_address = desc.usage.contains(crate::BufferUsage::DEVICE_ADDRESS);
        let allocation =
            match self.allocate_memory(requirements, desc.memory, desc.alignment, device_address) {
                Ok(allocation) => allocation,
                Err(err) => {
                    log::error!("Unable to allocate {} bytes for '{}'", desc.size, desc.name);
                    unsafe { self.device.core.destroy_buffer(raw, None) };
                    return Err(err);
                }
            };

        unsafe {
            if let Err(err) =
                self.device
                    .core
                    .bind_buffer_memory(raw, allocation.memory, allocation.offset)
            {
                self.device.core.destroy_buffer(raw, None);
                self.free_memory(allocation.handle);
                return Err(super::map_device_error(err));
            }
            if !desc.name.is_empty() {
                self.set_object_name(vk::ObjectType::BUFFER, raw, desc.name);
            }
        }

        let address = if device_address {
            let address_info = vk::BufferDeviceAddressInfo::builder().buffer(raw);
            unsafe { self.device.core.get_buffer_device_address(&address_info) }
        } else {
            0
        };
        log::trace!(
            "Created buffer '{}' of {} bytes at {:#x}",
            desc.name,
            desc.size,
            address
        );

        Ok(super::Buffer {
            raw,
            memory_handle: allocation.handle,
            mapped_data: allocation.data,
            size: desc.size,
            address,
        })
    }

    fn destroy_buffer(&self, buffer: super::Buffer) {
        unsafe { self.device.core.destroy_buffer(buffer.raw, None) };
        self.free_memory(buffer.memory_handle);
    }

    fn buffer_device_address(&self, buffer: super::Buffer) -> crate::DeviceAddress {
        buffer.address
    }

    fn write_buffer(&self, piece: crate::BufferPiece, data: &[u8]) {
        assert!(
            !piece.buffer.mapped_data.is_null(),
            "Buffer is not host visible"
        );
        assert!(piece.offset + data.len() as u64 <= piece.buffer.size);
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                piece.buffer.mapped_data.add(piece.offset as usize),
                data.len(),
            );
        }
    }

    fn create_acceleration_structure(
        &self,
        desc: crate::AccelerationStructureDesc<super::Buffer>,
    ) -> Result<super::AccelerationStructure, crate::DeviceError> {
        let vk_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .ty(super::map_acceleration_structure_type(desc.ty))
            .buffer(desc.buffer.buffer.raw)
            .offset(desc.buffer.offset)
            .size(desc.size);
        let raw = unsafe {
            self.device
                .acceleration_structure
                .create_acceleration_structure(&vk_info, None)
                .map_err(super::map_device_error)?
        };
        if !desc.name.is_empty() {
            self.set_object_name(vk::ObjectType::ACCELERATION_STRUCTURE_KHR, raw, desc.name);
        }
        Ok(super::AccelerationStructure { raw })
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: super::AccelerationStructure) {
        unsafe {
            self.device
                .acceleration_structure
                .destroy_acceleration_structure(acceleration_structure.raw, None);
        }
    }

    fn acceleration_structure_device_address(
        &self,
        acceleration_structure: super::AccelerationStructure,
    ) -> crate::DeviceAddress {
        let vk_info = vk::AccelerationStructureDeviceAddressInfoKHR::builder()
            .acceleration_structure(acceleration_structure.raw);
        unsafe {
            self.device
                .acceleration_structure
                .get_acceleration_structure_device_address(&vk_info)
        }
    }

    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        meshes: &[crate::AccelerationStructureMesh<super::Buffer>],
        flags: crate::BuildFlags,
    ) -> Result<crate::AccelerationStructureSizes, crate::DeviceError> {
        let (geometries, ranges) = make_bottom_level_geometries(meshes);
        let max_primitive_counts = ranges
            .iter()
            .map(|range| range.primitive_count)
            .collect::<Vec<_>>();
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(super::map_build_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);
        let sizes = unsafe {
            self.device
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &max_primitive_counts,
                )
        };
        Ok(crate::AccelerationStructureSizes {
            data: sizes.acceleration_structure_size,
            scratch: sizes.build_scratch_size,
            update_scratch: sizes.update_scratch_size,
        })
    }

    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        flags: crate::BuildFlags,
    ) -> Result<crate::AccelerationStructureSizes, crate::DeviceError> {
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .build();
        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
            .build();
        let geometries = [geometry];
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(super::map_build_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);
        let sizes = unsafe {
            self.device
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[instance_count],
                )
        };
        Ok(crate::AccelerationStructureSizes {
            data: sizes.acceleration_structure_size,
            scratch: sizes.build_scratch_size,
            update_scratch: sizes.update_scratch_size,
        })
    }

    fn limits(&self) -> crate::Limits {
        self.limits
    }
}
