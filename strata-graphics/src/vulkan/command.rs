use ash::vk;

/// Uploads and previous builds must land before the builds read them.
/// Builds fetch their instance and geometry inputs as shader reads.
fn build_input_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(
            vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        )
        .dst_access_mask(
            vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        )
        .build()
}

impl crate::traits::CommandEncoder for super::CommandEncoder {
    type Buffer = super::Buffer;
    type AccelerationStructure = super::AccelerationStructure;
    type TransferPass<'a> = super::TransferCommandEncoder<'a>;
    type AccelerationStructurePass<'a> = super::AccelerationStructureCommandEncoder<'a>;

    fn start(&mut self) -> Result<(), crate::DeviceError> {
        let vk_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .core
                .reset_fences(&[self.fence])
                .map_err(super::map_device_error)?;
            self.device
                .core
                .reset_command_buffer(self.raw, vk::CommandBufferResetFlags::empty())
                .map_err(super::map_device_error)?;
            self.device
                .core
                .begin_command_buffer(self.raw, &vk_info)
                .map_err(super::map_device_error)?;
        }
        Ok(())
    }

    fn transfer(&mut self, _label: &str) -> super::TransferCommandEncoder {
        super::TransferCommandEncoder {
            raw: self.raw,
            device: &self.device,
        }
    }

    fn acceleration_structure(
        &mut self,
        _label: &str,
    ) -> super::AccelerationStructureCommandEncoder {
        let barrier = build_input_barrier();
        unsafe {
            self.device.core.cmd_pipeline_barrier(
                self.raw,
                vk::PipelineStageFlags::TRANSFER
                    | vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        super::AccelerationStructureCommandEncoder {
            raw: self.raw,
            device: &self.device,
        }
    }
}

impl crate::traits::TransferEncoder for super::TransferCommandEncoder<'_> {
    type Buffer = super::Buffer;

    fn copy_buffer_to_buffer(
        &mut self,
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    ) {
        let copy = vk::BufferCopy {
            src_offset: src.offset,
            dst_offset: dst.offset,
            size,
        };
        unsafe {
            self.device
                .core
                .cmd_copy_buffer(self.raw, src.buffer.raw, dst.buffer.raw, &[copy])
        };
    }
}

impl crate::traits::AccelerationStructureEncoder
    for super::AccelerationStructureCommandEncoder<'_>
{
    type Buffer = super::Buffer;
    type AccelerationStructure = super::AccelerationStructure;

    fn build_bottom_level(
        &mut self,
        acceleration_structure: super::AccelerationStructure,
        meshes: &[crate::AccelerationStructureMesh<super::Buffer>],
        flags: crate::BuildFlags,
        scratch_data: crate::BufferPiece,
    ) {
        let (geometries, ranges) = super::resource::make_bottom_level_geometries(meshes);
        let vk_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(super::map_build_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(acceleration_structure.raw)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_data.buffer.address + scratch_data.offset,
            })
            .geometries(&geometries)
            .build();

        unsafe {
            self.device
                .acceleration_structure
                .cmd_build_acceleration_structures(self.raw, &[vk_info], &[&ranges]);
        }
    }

    fn build_top_level(
        &mut self,
        acceleration_structure: super::AccelerationStructure,
        mode: crate::BuildMode,
        flags: crate::BuildFlags,
        instance_count: u32,
        instance_data: crate::BufferPiece,
        scratch_data: crate::BufferPiece,
    ) {
        let geometries = [super::resource::make_top_level_geometry(instance_data)];
        let mut builder = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(super::map_build_flags(flags))
            .dst_acceleration_structure(acceleration_structure.raw)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_data.buffer.address + scratch_data.offset,
            })
            .geometries(&geometries);
        builder = match mode {
            crate::BuildMode::Build => builder.mode(vk::BuildAccelerationStructureModeKHR::BUILD),
            crate::BuildMode::Update => builder
                .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
                .src_acceleration_structure(acceleration_structure.raw),
        };
        let vk_info = builder.build();
        let ranges = [vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: instance_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        }];

        unsafe {
            self.device
                .acceleration_structure
                .cmd_build_acceleration_structures(self.raw, &[vk_info], &[&ranges]);
        }
    }

    fn barrier(&mut self) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR)
            .build();
        unsafe {
            self.device.core.cmd_pipeline_barrier(
                self.raw,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }
}
