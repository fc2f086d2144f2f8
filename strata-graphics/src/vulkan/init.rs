use ash::{
    extensions::{ext, khr},
    vk,
};
use std::{ffi, sync::Mutex};

mod layer {
    use std::ffi::CStr;
    pub const KHRONOS_VALIDATION: &CStr =
        unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };
}

const REQUIRED_DEVICE_EXTENSIONS: &[&ffi::CStr] = &[
    vk::KhrDeferredHostOperationsFn::name(),
    vk::KhrAccelerationStructureFn::name(),
];

#[derive(Debug)]
struct AdapterCapabilities {
    api_version: u32,
    properties: vk::PhysicalDeviceProperties,
    queue_family_index: u32,
    min_scratch_alignment: u64,
}

unsafe fn inspect_adapter(
    phd: vk::PhysicalDevice,
    instance: &ash::Instance,
    driver_api_version: u32,
) -> Option<AdapterCapabilities> {
    let supported_extension_properties = match instance.enumerate_device_extension_properties(phd)
    {
        Ok(properties) => properties,
        Err(err) => {
            log::warn!("\tRejected for failing to list extensions: {:?}", err);
            return None;
        }
    };
    let supported_extensions = supported_extension_properties
        .iter()
        .map(|ext_prop| ffi::CStr::from_ptr(ext_prop.extension_name.as_ptr()))
        .collect::<Vec<_>>();
    for extension in REQUIRED_DEVICE_EXTENSIONS {
        if !supported_extensions.contains(extension) {
            log::warn!(
                "\tRejected for device extension {:?} not supported",
                extension
            );
            return None;
        }
    }

    let mut acceleration_structure_properties =
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let mut properties2 = vk::PhysicalDeviceProperties2::builder()
        .push_next(&mut acceleration_structure_properties);
    instance.get_physical_device_properties2(phd, &mut properties2);

    let properties = properties2.properties;
    let name = ffi::CStr::from_ptr(properties.device_name.as_ptr());
    log::info!("Adapter {:?}", name);

    let api_version = properties.api_version.min(driver_api_version);
    if api_version < vk::API_VERSION_1_2 {
        log::warn!("\tRejected for API version {}", api_version);
        return None;
    }

    let mut buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::builder()
        .push_next(&mut buffer_device_address_features)
        .push_next(&mut acceleration_structure_features);
    instance.get_physical_device_features2(phd, &mut features2);

    if buffer_device_address_features.buffer_device_address == vk::FALSE {
        log::warn!(
            "\tRejected for the buffer device address. Features = {:?}",
            buffer_device_address_features
        );
        return None;
    }
    if acceleration_structure_properties.max_geometry_count == 0
        || acceleration_structure_features.acceleration_structure == vk::FALSE
    {
        log::warn!(
            "\tRejected for the acceleration structure. Properties = {:?}. Features = {:?}",
            acceleration_structure_properties,
            acceleration_structure_features
        );
        return None;
    }

    let queue_family_index = match instance
        .get_physical_device_queue_family_properties(phd)
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
    {
        Some(index) => index as u32,
        None => {
            log::warn!("\tRejected for not having a compute queue");
            return None;
        }
    };

    log::debug!("Acceleration structure properties: {acceleration_structure_properties:#?}");
    Some(AdapterCapabilities {
        api_version,
        properties,
        queue_family_index,
        min_scratch_alignment: acceleration_structure_properties
            .min_acceleration_structure_scratch_offset_alignment
            .max(1) as u64,
    })
}

impl super::Context {
    pub unsafe fn init(desc: crate::ContextDesc) -> Result<Self, crate::NotSupportedError> {
        let entry = match ash::Entry::load() {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("Missing Vulkan entry points: {:?}", err);
                return Err(crate::NotSupportedError);
            }
        };
        let driver_api_version = match entry.try_enumerate_instance_version() {
            // Vulkan 1.1+
            Ok(Some(version)) => version,
            Ok(None) => return Err(crate::NotSupportedError),
            Err(err) => {
                log::error!("try_enumerate_instance_version: {:?}", err);
                return Err(crate::NotSupportedError);
            }
        };

        let supported_layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(err) => {
                log::error!("enumerate_instance_layer_properties: {:?}", err);
                return Err(crate::NotSupportedError);
            }
        };
        let supported_layer_names = supported_layers
            .iter()
            .map(|properties| ffi::CStr::from_ptr(properties.layer_name.as_ptr()))
            .collect::<Vec<_>>();

        let mut layers: Vec<&'static ffi::CStr> = Vec::new();
        let mut instance_extensions: Vec<&'static ffi::CStr> = Vec::new();
        if desc.validation {
            if supported_layer_names.contains(&layer::KHRONOS_VALIDATION) {
                layers.push(layer::KHRONOS_VALIDATION);
            } else {
                log::warn!("Validation layer is not available");
            }
            instance_extensions.push(ext::DebugUtils::name());
        }

        let core_instance = {
            let app_info = vk::ApplicationInfo::builder()
                .engine_name(ffi::CStr::from_bytes_with_nul(b"strata\0").unwrap())
                .engine_version(1)
                .api_version(vk::API_VERSION_1_2);
            let str_pointers = layers
                .iter()
                .chain(instance_extensions.iter())
                .map(|&s| s.as_ptr())
                .collect::<Vec<_>>();
            let (layer_strings, extension_strings) = str_pointers.split_at(layers.len());
            let create_info = vk::InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_layer_names(layer_strings)
                .enabled_extension_names(extension_strings);
            match entry.create_instance(&create_info, None) {
                Ok(instance) => instance,
                Err(err) => {
                    log::error!("create_instance: {:?}", err);
                    return Err(crate::NotSupportedError);
                }
            }
        };
        let instance = super::Instance {
            debug_utils: if desc.validation {
                Some(ext::DebugUtils::new(&entry, &core_instance))
            } else {
                None
            },
            core: core_instance,
        };

        let physical_devices = match instance.core.enumerate_physical_devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::error!("enumerate_physical_devices: {:?}", err);
                instance.core.destroy_instance(None);
                return Err(crate::NotSupportedError);
            }
        };
        let (physical_device, capabilities) = match physical_devices
            .into_iter()
            .find_map(|phd| {
                inspect_adapter(phd, &instance.core, driver_api_version).map(|caps| (phd, caps))
            }) {
            Some(found) => found,
            None => {
                log::error!("No adapter supports acceleration structures");
                instance.core.destroy_instance(None);
                return Err(crate::NotSupportedError);
            }
        };
        log::debug!("Adapter {:#?}", capabilities);

        let device_core = {
            let family_info = vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(capabilities.queue_family_index)
                .queue_priorities(&[1.0])
                .build();
            let family_infos = [family_info];

            let str_pointers = REQUIRED_DEVICE_EXTENSIONS
                .iter()
                .map(|&s| s.as_ptr())
                .collect::<Vec<_>>();

            let mut khr_buffer_device_address =
                vk::PhysicalDeviceBufferDeviceAddressFeatures::builder()
                    .buffer_device_address(true);
            let mut khr_acceleration_structure =
                vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                    .acceleration_structure(true);
            let device_create_info = vk::DeviceCreateInfo::builder()
                .queue_create_infos(&family_infos)
                .enabled_extension_names(&str_pointers)
                .push_next(&mut khr_buffer_device_address)
                .push_next(&mut khr_acceleration_structure);

            match instance
                .core
                .create_device(physical_device, &device_create_info, None)
            {
                Ok(device) => device,
                Err(err) => {
                    log::error!("create_device: {:?}", err);
                    instance.core.destroy_instance(None);
                    return Err(crate::NotSupportedError);
                }
            }
        };

        let device = super::Device {
            acceleration_structure: khr::AccelerationStructure::new(&instance.core, &device_core),
            core: device_core,
        };

        let memory_manager = {
            let mem_properties = instance
                .core
                .get_physical_device_memory_properties(physical_device);
            let memory_types =
                &mem_properties.memory_types[..mem_properties.memory_type_count as usize];
            let limits = &capabilities.properties.limits;
            let config = gpu_alloc::Config::i_am_prototyping();

            let properties = gpu_alloc::DeviceProperties {
                max_memory_allocation_count: limits.max_memory_allocation_count,
                max_memory_allocation_size: u64::MAX,
                non_coherent_atom_size: limits.non_coherent_atom_size,
                memory_types: memory_types
                    .iter()
                    .map(|memory_type| gpu_alloc::MemoryType {
                        props: gpu_alloc::MemoryPropertyFlags::from_bits_truncate(
                            memory_type.property_flags.as_raw() as u8,
                        ),
                        heap: memory_type.heap_index,
                    })
                    .collect(),
                memory_heaps: mem_properties.memory_heaps
                    [..mem_properties.memory_heap_count as usize]
                    .iter()
                    .map(|&memory_heap| gpu_alloc::MemoryHeap {
                        size: memory_heap.size,
                    })
                    .collect(),
                buffer_device_address: true,
            };

            let known_memory_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED
                | vk::MemoryPropertyFlags::LAZILY_ALLOCATED;
            let valid_ash_memory_types = memory_types.iter().enumerate().fold(0, |u, (i, mem)| {
                if known_memory_flags.contains(mem.property_flags) {
                    u | (1 << i)
                } else {
                    u
                }
            });
            super::MemoryManager {
                allocator: gpu_alloc::GpuAllocator::new(config, properties),
                slab: slab::Slab::new(),
                valid_ash_memory_types,
            }
        };

        let queue = device
            .core
            .get_device_queue(capabilities.queue_family_index, 0);

        log::info!(
            "Initialized Vulkan {}.{} with scratch alignment {}",
            vk::api_version_major(capabilities.api_version),
            vk::api_version_minor(capabilities.api_version),
            capabilities.min_scratch_alignment,
        );

        Ok(super::Context {
            memory: Mutex::new(memory_manager),
            device,
            queue_family_index: capabilities.queue_family_index,
            queue: Mutex::new(queue),
            limits: crate::Limits {
                min_scratch_alignment: capabilities.min_scratch_alignment,
            },
            instance,
            _entry: entry,
        })
    }

    pub(super) fn set_object_name(
        &self,
        object_type: vk::ObjectType,
        object: impl vk::Handle,
        name: &str,
    ) {
        let debug_utils = match self.instance.debug_utils {
            Some(ref debug_utils) => debug_utils,
            None => return,
        };
        let name_cstr = match ffi::CString::new(name) {
            Ok(name) => name,
            Err(_) => return,
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(object_type)
            .object_handle(object.as_raw())
            .object_name(&name_cstr);
        let _ = unsafe {
            debug_utils.set_debug_utils_object_name(self.device.core.handle(), &name_info)
        };
    }
}
