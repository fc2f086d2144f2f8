use ash::{
    extensions::{ext, khr},
    vk,
};
use std::sync::Mutex;

mod command;
mod init;
mod resource;

struct Instance {
    core: ash::Instance,
    debug_utils: Option<ext::DebugUtils>,
}

#[derive(Clone)]
struct Device {
    core: ash::Device,
    acceleration_structure: khr::AccelerationStructure,
}

struct MemoryManager {
    allocator: gpu_alloc::GpuAllocator<vk::DeviceMemory>,
    slab: slab::Slab<gpu_alloc::MemoryBlock<vk::DeviceMemory>>,
    valid_ash_memory_types: u32,
}

pub struct Context {
    memory: Mutex<MemoryManager>,
    device: Device,
    queue_family_index: u32,
    queue: Mutex<vk::Queue>,
    limits: crate::Limits,
    instance: Instance,
    _entry: ash::Entry,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct Buffer {
    raw: vk::Buffer,
    memory_handle: usize,
    mapped_data: *mut u8,
    size: u64,
    address: crate::DeviceAddress,
}

// The mapped pointer is only written through `Context::write_buffer`.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct AccelerationStructure {
    raw: vk::AccelerationStructureKHR,
}

/// A single command buffer with a fence, reused for every submission.
pub struct CommandEncoder {
    pool: vk::CommandPool,
    raw: vk::CommandBuffer,
    fence: vk::Fence,
    device: Device,
    name: String,
}

pub struct TransferCommandEncoder<'a> {
    raw: vk::CommandBuffer,
    device: &'a Device,
}

pub struct AccelerationStructureCommandEncoder<'a> {
    raw: vk::CommandBuffer,
    device: &'a Device,
}

#[derive(Clone, Debug)]
pub struct SyncPoint {
    fence: vk::Fence,
}

fn map_device_error(result: vk::Result) -> crate::DeviceError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => crate::DeviceError::OutOfDeviceMemory,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => crate::DeviceError::OutOfHostMemory,
        vk::Result::ERROR_DEVICE_LOST => crate::DeviceError::DeviceLost,
        vk::Result::ERROR_FEATURE_NOT_PRESENT | vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
            crate::DeviceError::NotSupported
        }
        other => crate::DeviceError::Unknown(other.as_raw()),
    }
}

fn map_build_flags(flags: crate::BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(crate::BuildFlags::PREFER_FAST_TRACE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(crate::BuildFlags::PREFER_FAST_BUILD) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(crate::BuildFlags::ALLOW_UPDATE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    vk_flags
}

fn map_acceleration_structure_type(
    ty: crate::AccelerationStructureType,
) -> vk::AccelerationStructureTypeKHR {
    match ty {
        crate::AccelerationStructureType::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        crate::AccelerationStructureType::BottomLevel => {
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
        }
    }
}

fn map_vertex_format(format: crate::VertexFormat) -> vk::Format {
    match format {
        crate::VertexFormat::F32Vec3 => vk::Format::R32G32B32_SFLOAT,
    }
}

fn map_index_type(index_type: crate::IndexType) -> vk::IndexType {
    match index_type {
        crate::IndexType::U16 => vk::IndexType::UINT16,
        crate::IndexType::U32 => vk::IndexType::UINT32,
    }
}

impl crate::traits::CommandDevice for Context {
    type CommandEncoder = CommandEncoder;
    type SyncPoint = SyncPoint;

    fn create_command_encoder(
        &self,
        desc: crate::CommandEncoderDesc,
    ) -> Result<CommandEncoder, crate::DeviceError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            )
            .queue_family_index(self.queue_family_index);
        let pool = unsafe {
            self.device
                .core
                .create_command_pool(&pool_info, None)
                .map_err(map_device_error)?
        };
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let raw = match unsafe { self.device.core.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { self.device.core.destroy_command_pool(pool, None) };
                return Err(map_device_error(err));
            }
        };
        // Signaled, so that the very first wait passes through.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = match unsafe { self.device.core.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { self.device.core.destroy_command_pool(pool, None) };
                return Err(map_device_error(err));
            }
        };

        if !desc.name.is_empty() {
            self.set_object_name(vk::ObjectType::COMMAND_BUFFER, raw, desc.name);
            self.set_object_name(vk::ObjectType::FENCE, fence, desc.name);
        }

        Ok(CommandEncoder {
            pool,
            raw,
            fence,
            device: self.device.clone(),
            name: desc.name.to_string(),
        })
    }

    fn destroy_command_encoder(&self, encoder: &mut CommandEncoder) {
        unsafe {
            self.device
                .core
                .free_command_buffers(encoder.pool, &[encoder.raw]);
            self.device.core.destroy_fence(encoder.fence, None);
            self.device.core.destroy_command_pool(encoder.pool, None);
        }
    }

    fn submit(&self, encoder: &mut CommandEncoder) -> Result<SyncPoint, crate::DeviceError> {
        let command_buffers = [encoder.raw];
        let vk_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        let queue = self.queue.lock().unwrap();
        unsafe {
            self.device
                .core
                .end_command_buffer(encoder.raw)
                .map_err(map_device_error)?;
            self.device
                .core
                .queue_submit(*queue, &[vk_info.build()], encoder.fence)
                .map_err(map_device_error)?;
        }
        log::trace!("Submitted '{}'", encoder.name);
        Ok(SyncPoint {
            fence: encoder.fence,
        })
    }

    fn wait_for(&self, sp: &SyncPoint, timeout_ms: u32) -> bool {
        let timeout_ns = timeout_ms as u64 * 1_000_000;
        match unsafe {
            self.device
                .core
                .wait_for_fences(&[sp.fence], true, timeout_ns)
        } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(other) => {
                log::error!("Wait for fence failed: {:?}", other);
                false
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.core.device_wait_idle() {
                log::error!("Device wait on teardown failed: {:?}", err);
            }
            let mut memory = self.memory.lock().unwrap();
            if !memory.slab.is_empty() {
                log::warn!("{} memory blocks are still alive", memory.slab.len());
            }
            memory
                .allocator
                .cleanup(gpu_alloc_ash::AshMemoryDevice::wrap(&self.device.core));
            self.device.core.destroy_device(None);
            self.instance.core.destroy_instance(None);
        }
    }
}
