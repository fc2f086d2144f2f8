//! Packing of mesh placements into device instance records.

use strata_graphics::{
    traits::{ResourceDevice, TransferEncoder},
    AccelerationStructureInstance as Instance, BufferDesc, BufferUsage, Memory,
};

use crate::{transform, BlasCache, BlasHandle, BuildConfig, Error, MeshNode};

/// Size in bytes of `count` instance records.
pub fn byte_size(count: usize) -> u64 {
    (count * std::mem::size_of::<Instance>()) as u64
}

/// Every instance position must be expressible as a custom index.
pub fn check_count(count: usize) -> Result<(), Error> {
    if count > Instance::MAX_CUSTOM_INDEX as usize + 1 {
        Err(Error::TooManyInstances { count })
    } else {
        Ok(())
    }
}

/// Build one instance per node, in node order.
///
/// The custom index is the node position. `handles` comes from
/// [`BlasCache::build_scene`] over the same nodes.
pub fn assemble<B: Copy, A: Copy>(
    cache: &BlasCache<B, A>,
    handles: &[BlasHandle],
    nodes: &[MeshNode<B>],
    config: &BuildConfig,
) -> Result<Vec<Instance>, Error> {
    if handles.len() != nodes.len() {
        return Err(Error::HandleCount {
            expected: nodes.len(),
            actual: handles.len(),
        });
    }
    check_count(nodes.len())?;
    if config.hit_group_offset > Instance::MAX_CUSTOM_INDEX {
        return Err(Error::HitGroupOffset {
            offset: config.hit_group_offset,
        });
    }
    Ok(nodes
        .iter()
        .zip(handles.iter())
        .enumerate()
        .map(|(index, (node, &handle))| {
            Instance::new(
                transform::encode(&node.world_transform),
                index as u32,
                config.instance_mask,
                config.hit_group_offset,
                cache[handle].address,
            )
        })
        .collect())
}

/// Host-visible copy of the instance records, sized exactly to them.
/// Returns `None` when there is nothing to upload.
pub(crate) fn stage<D: ResourceDevice>(
    device: &D,
    instances: &[Instance],
) -> Result<Option<D::Buffer>, Error> {
    if instances.is_empty() {
        return Ok(None);
    }
    let data: &[u8] = bytemuck::cast_slice(instances);
    let buffer = device
        .create_buffer(BufferDesc {
            name: "instances/staging",
            size: data.len() as u64,
            memory: Memory::Upload,
            usage: BufferUsage::TRANSFER_SRC,
            alignment: 0,
        })
        .map_err(|source| Error::Allocation {
            what: "instance staging buffer",
            source,
        })?;
    device.write_buffer(buffer.into(), data);
    Ok(Some(buffer))
}

/// Record the copy of staged records into the device instance buffer.
pub(crate) fn record_upload<T: TransferEncoder>(
    pass: &mut T,
    staging: T::Buffer,
    target: T::Buffer,
    count: usize,
) {
    pass.copy_buffer_to_buffer(staging.into(), target.into(), byte_size(count));
}
