use strata_graphics::{traits::CommandDevice, AccelerationStructureInstance};

use crate::{
    instance, AccelerationStructure, BlasCache, BlasHandle, BuildConfig, Error, MeshNode,
    SyncGate, TlasBuilder, TlasStage,
};

/// Acceleration structures of one scene.
///
/// Owns the build gate, the bottom-level cache and the top-level builder.
/// All device work is serialized on the gate.
pub struct Accelerator<D: CommandDevice> {
    config: BuildConfig,
    gate: SyncGate<D>,
    bottom_levels: BlasCache<D::Buffer, D::AccelerationStructure>,
    instance_blas: Vec<BlasHandle>,
    top_level: TlasBuilder<D::Buffer, D::AccelerationStructure>,
}

impl<D: CommandDevice> Accelerator<D> {
    pub fn new(device: &D, config: BuildConfig) -> Result<Self, Error> {
        let gate = SyncGate::new(device, "acceleration structures", config.fence_timeout_ms)?;
        Ok(Self {
            config,
            gate,
            bottom_levels: BlasCache::default(),
            instance_blas: Vec::new(),
            top_level: TlasBuilder::new(),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn stage(&self) -> TlasStage {
        self.top_level.stage()
    }

    pub fn bottom_levels(&self) -> &BlasCache<D::Buffer, D::AccelerationStructure> {
        &self.bottom_levels
    }

    /// Bottom-level structure of every instance, in instance order.
    pub fn instance_bottom_levels(&self) -> &[BlasHandle] {
        &self.instance_blas
    }

    pub fn instances(&self) -> &[AccelerationStructureInstance] {
        self.top_level.instances()
    }

    /// The structure to bind for tracing, once built.
    ///
    /// Call [`Accelerator::wait_idle`] first if other work may be in flight.
    pub fn top_level(&self) -> Option<&AccelerationStructure<D::Buffer, D::AccelerationStructure>> {
        self.top_level.top_level()
    }

    /// Device buffer holding the instance records of the top-level structure.
    pub fn instance_buffer(&self) -> Option<D::Buffer> {
        self.top_level.instance_buffer()
    }

    pub fn gate(&self) -> &SyncGate<D> {
        &self.gate
    }

    /// Build the bottom-level structures of all distinct meshes, then the
    /// top-level structure with one instance per node.
    #[profiling::function]
    pub fn load_scene(&mut self, device: &D, nodes: &[MeshNode<D::Buffer>]) -> Result<(), Error> {
        let actual = self.top_level.stage();
        if actual != TlasStage::Unbuilt {
            return Err(Error::InvalidState {
                expected: TlasStage::Unbuilt,
                actual,
            });
        }
        instance::check_count(nodes.len())?;

        let handles =
            self.bottom_levels
                .build_scene(device, &mut self.gate, nodes, &self.config)?;
        let instances = instance::assemble(&self.bottom_levels, &handles, nodes, &self.config)?;
        self.top_level
            .build(device, &mut self.gate, instances, &self.config)?;
        self.instance_blas = handles;
        log::info!(
            "Scene loaded: {} instances of {} unique meshes",
            nodes.len(),
            self.bottom_levels.len()
        );
        Ok(())
    }

    /// Apply `delta` to all instances.
    pub fn refit(&mut self, device: &D, delta: glam::Mat4) -> Result<(), Error> {
        self.top_level.refit(device, &mut self.gate, delta)
    }

    /// Apply one delta per instance.
    pub fn refit_instances(&mut self, device: &D, deltas: &[glam::Mat4]) -> Result<(), Error> {
        self.top_level
            .refit_instances(device, &mut self.gate, deltas)
    }

    /// Block until all submitted work is done.
    pub fn wait_idle(&mut self, device: &D) -> Result<(), Error> {
        self.gate.wait(device)
    }

    /// Release everything. If the device does not finish in time, the
    /// resources are leaked instead.
    pub fn destroy(&mut self, device: &D) {
        if let Err(err) = self.gate.wait(device) {
            log::error!("Leaking acceleration structures: {}", err);
            return;
        }
        self.top_level.destroy(device);
        self.bottom_levels.destroy(device);
        self.instance_blas.clear();
        self.gate.destroy(device);
    }
}
