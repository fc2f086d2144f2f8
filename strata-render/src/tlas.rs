use std::mem;
use strata_graphics::{
    limits,
    traits::{
        AccelerationStructureEncoder as _, CommandDevice, CommandEncoder as _, ResourceDevice,
    },
    AccelerationStructureDesc, AccelerationStructureInstance as Instance,
    AccelerationStructureSizes, AccelerationStructureType, BufferDesc, BufferUsage, BuildFlags,
    BuildMode, Memory,
};

use crate::{
    blas::{scratch_desc, Pending},
    instance, transform, AccelerationStructure, BuildConfig, Error, SyncGate,
};

/// Observable stage of a [`TlasBuilder`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TlasStage {
    Unbuilt,
    Built,
    Refitting,
}

#[derive(Clone, Copy, Debug)]
struct TopLevel<B, A> {
    structure: AccelerationStructure<B, A>,
    instance_buffer: B,
}

enum TlasState<B, A> {
    Unbuilt,
    Built(TopLevel<B, A>),
    Refitting,
}

impl<B, A> TlasState<B, A> {
    fn stage(&self) -> TlasStage {
        match *self {
            Self::Unbuilt => TlasStage::Unbuilt,
            Self::Built(_) => TlasStage::Built,
            Self::Refitting => TlasStage::Refitting,
        }
    }
}

/// Owner of the top-level structure over all instances.
///
/// The structure is built once, then refit in place: its handle, backing
/// buffer and instance buffer stay the same across refits, and so do the
/// instance count and order.
pub struct TlasBuilder<B, A> {
    state: TlasState<B, A>,
    instances: Vec<Instance>,
    flags: BuildFlags,
}

impl<B, A> Default for TlasBuilder<B, A> {
    fn default() -> Self {
        Self {
            state: TlasState::Unbuilt,
            instances: Vec::new(),
            flags: BuildFlags::empty(),
        }
    }
}

impl<B: Copy, A: Copy> TlasBuilder<B, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> TlasStage {
        self.state.stage()
    }

    pub fn top_level(&self) -> Option<&AccelerationStructure<B, A>> {
        match self.state {
            TlasState::Built(ref top_level) => Some(&top_level.structure),
            _ => None,
        }
    }

    /// Device buffer the structure reads its instances from.
    pub fn instance_buffer(&self) -> Option<B> {
        match self.state {
            TlasState::Built(ref top_level) => Some(top_level.instance_buffer),
            _ => None,
        }
    }

    /// Host mirror of the instance buffer contents.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    fn expect_stage(&self, expected: TlasStage) -> Result<(), Error> {
        let actual = self.stage();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { expected, actual })
        }
    }

    /// Upload `instances` and build the structure over them, blocking
    /// until the device is done.
    #[profiling::function]
    pub fn build<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        instances: Vec<Instance>,
        config: &BuildConfig,
    ) -> Result<(), Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        self.expect_stage(TlasStage::Unbuilt)?;
        instance::check_count(instances.len())?;
        let count = instances.len() as u32;
        let flags = config.top_level_flags();
        let sizes = device
            .get_top_level_acceleration_structure_sizes(count, flags)
            .map_err(|source| Error::SizeQuery {
                what: "top-level structure",
                source,
            })?;
        log::debug!(
            "TLAS over {} instances: {} bytes, {} scratch, {} update scratch",
            count,
            sizes.data,
            sizes.scratch,
            sizes.update_scratch
        );

        let mut pending = Pending::new();
        let resources = allocate_top_level(device, instances.len(), sizes, &mut pending);
        let (raw, buffer, instance_buffer, scratch) = match resources {
            Ok(resources) => resources,
            Err(err) => {
                pending.release(device);
                return Err(err);
            }
        };
        let staging = match instance::stage(device, &instances) {
            Ok(staging) => staging,
            Err(err) => {
                pending.release(device);
                return Err(err);
            }
        };

        let submitted = gate.submit(device, |encoder| {
            if let Some(staging) = staging {
                let mut pass = encoder.transfer("TLAS instances");
                instance::record_upload(&mut pass, staging, instance_buffer, instances.len());
            }
            let mut pass = encoder.acceleration_structure("TLAS build");
            pass.build_top_level(
                raw,
                BuildMode::Build,
                flags,
                count,
                instance_buffer.into(),
                scratch.into(),
            );
        });
        if let Err(err) = submitted {
            pending.release(device);
            if let Some(staging) = staging {
                device.destroy_buffer(staging);
            }
            return Err(err);
        }
        gate.retire(scratch);
        if let Some(staging) = staging {
            gate.retire(staging);
        }
        if let Err(err) = gate.wait(device) {
            log::error!("Leaking the top-level structure that never finished building");
            return Err(err);
        }

        self.state = TlasState::Built(TopLevel {
            structure: AccelerationStructure {
                raw,
                buffer,
                address: device.acceleration_structure_device_address(raw),
            },
            instance_buffer,
        });
        self.instances = instances;
        self.flags = flags;
        log::info!("Built the top-level structure over {} instances", count);
        Ok(())
    }

    /// Left-multiply every instance transform by `delta` and update in place.
    pub fn refit<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        delta: glam::Mat4,
    ) -> Result<(), Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        self.refit_with(device, gate, |_| delta)
    }

    /// Like [`TlasBuilder::refit`], with one delta per instance.
    pub fn refit_instances<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        deltas: &[glam::Mat4],
    ) -> Result<(), Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        self.expect_stage(TlasStage::Built)?;
        if deltas.len() != self.instances.len() {
            return Err(Error::TransformCount {
                expected: self.instances.len(),
                actual: deltas.len(),
            });
        }
        self.refit_with(device, gate, |index| deltas[index])
    }

    /// If nothing was submitted, the last good structure and instances are
    /// kept. Once the update is submitted, the new instances are kept even
    /// if waiting for it fails.
    #[profiling::function]
    fn refit_with<D>(
        &mut self,
        device: &D,
        gate: &mut SyncGate<D>,
        delta: impl Fn(usize) -> glam::Mat4,
    ) -> Result<(), Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        let top_level = match mem::replace(&mut self.state, TlasState::Refitting) {
            TlasState::Built(top_level) => top_level,
            other => {
                let actual = other.stage();
                self.state = other;
                return Err(Error::InvalidState {
                    expected: TlasStage::Built,
                    actual,
                });
            }
        };
        if self.instances.is_empty() {
            self.state = TlasState::Built(top_level);
            log::trace!("Skipping the refit of an empty top-level structure");
            return Ok(());
        }

        let instances = self
            .instances
            .iter()
            .enumerate()
            .map(|(index, instance)| {
                let mut instance = *instance;
                instance.set_transform(transform::compose(&delta(index), &instance.transform()));
                instance
            })
            .collect::<Vec<_>>();

        let submitted = self.submit_update(device, gate, top_level, &instances);
        self.state = TlasState::Built(top_level);
        if let Err(err) = submitted {
            let kind: &'static str = err.kind().into();
            log::warn!(
                "Refit failed ({}), keeping the last good structure: {}",
                kind,
                err
            );
            return Err(err);
        }
        // The device now consumes these transforms, whether or not the wait succeeds.
        self.instances = instances;
        gate.wait(device)
    }

    /// Upload `instances` and submit an in-place update, without waiting.
    /// On error nothing was handed to the device.
    fn submit_update<D>(
        &self,
        device: &D,
        gate: &mut SyncGate<D>,
        top_level: TopLevel<B, A>,
        instances: &[Instance],
    ) -> Result<(), Error>
    where
        D: CommandDevice<Buffer = B, AccelerationStructure = A>,
    {
        let count = instances.len() as u32;
        // Updates may need a different amount of scratch than the build.
        let sizes = device
            .get_top_level_acceleration_structure_sizes(count, self.flags)
            .map_err(|source| Error::SizeQuery {
                what: "top-level update",
                source,
            })?;
        let scratch = device
            .create_buffer(scratch_desc(
                "TLAS/update-scratch",
                sizes.update_scratch,
                device.limits().min_scratch_alignment,
            ))
            .map_err(|source| Error::Allocation {
                what: "top-level update scratch",
                source,
            })?;
        let staging = match instance::stage(device, instances) {
            Ok(staging) => staging,
            Err(err) => {
                device.destroy_buffer(scratch);
                return Err(err);
            }
        };

        let raw = top_level.structure.raw;
        let instance_buffer = top_level.instance_buffer;
        let flags = self.flags;
        let submitted = gate.submit(device, |encoder| {
            if let Some(staging) = staging {
                let mut pass = encoder.transfer("TLAS instances");
                instance::record_upload(&mut pass, staging, instance_buffer, instances.len());
            }
            let mut pass = encoder.acceleration_structure("TLAS update");
            pass.build_top_level(
                raw,
                BuildMode::Update,
                flags,
                count,
                instance_buffer.into(),
                scratch.into(),
            );
        });
        if let Err(err) = submitted {
            device.destroy_buffer(scratch);
            if let Some(staging) = staging {
                device.destroy_buffer(staging);
            }
            return Err(err);
        }
        gate.retire(scratch);
        if let Some(staging) = staging {
            gate.retire(staging);
        }
        Ok(())
    }

    /// Free the structure and its buffers. The device must be done with them.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: ResourceDevice<Buffer = B, AccelerationStructure = A>,
    {
        if let TlasState::Built(top_level) = mem::replace(&mut self.state, TlasState::Unbuilt) {
            top_level.structure.free(device);
            device.destroy_buffer(top_level.instance_buffer);
        }
        self.instances.clear();
    }
}

fn allocate_top_level<D: ResourceDevice>(
    device: &D,
    instance_count: usize,
    sizes: AccelerationStructureSizes,
    pending: &mut Pending<D::Buffer, D::AccelerationStructure>,
) -> Result<(D::AccelerationStructure, D::Buffer, D::Buffer, D::Buffer), Error> {
    let buffer = pending.create_buffer(
        device,
        "top-level storage",
        BufferDesc {
            name: "TLAS",
            size: sizes.data,
            memory: Memory::Device,
            usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::DEVICE_ADDRESS,
            alignment: limits::ACCELERATION_STRUCTURE_OFFSET_ALIGNMENT,
        },
    )?;
    // An empty scene still gets a valid instance address.
    let instance_buffer = pending.create_buffer(
        device,
        "instance buffer",
        BufferDesc {
            name: "TLAS/instances",
            size: instance::byte_size(instance_count.max(1)),
            memory: Memory::Device,
            usage: BufferUsage::TRANSFER_DST
                | BufferUsage::ACCELERATION_STRUCTURE_INPUT
                | BufferUsage::DEVICE_ADDRESS,
            alignment: 16,
        },
    )?;
    let scratch = pending.create_buffer(
        device,
        "top-level scratch",
        scratch_desc(
            "TLAS/scratch",
            sizes.scratch,
            device.limits().min_scratch_alignment,
        ),
    )?;
    let raw = pending.create_acceleration_structure(
        device,
        AccelerationStructureDesc {
            name: "TLAS",
            ty: AccelerationStructureType::TopLevel,
            buffer: buffer.into(),
            size: sizes.data,
        },
    )?;
    Ok((raw, buffer, instance_buffer, scratch))
}
