use std::{fmt::Debug, hash::Hash};

use super::{DeviceAddress, DeviceError, GenericBufferPiece};

pub trait ResourceDevice {
    type Buffer: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;
    type AccelerationStructure: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;

    fn create_buffer(&self, desc: super::BufferDesc) -> Result<Self::Buffer, DeviceError>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    /// Only valid for buffers created with `BufferUsage::DEVICE_ADDRESS`.
    fn buffer_device_address(&self, buffer: Self::Buffer) -> DeviceAddress;
    /// Copy `data` into a host-visible buffer.
    fn write_buffer(&self, piece: GenericBufferPiece<Self::Buffer>, data: &[u8]);

    fn create_acceleration_structure(
        &self,
        desc: super::AccelerationStructureDesc<Self::Buffer>,
    ) -> Result<Self::AccelerationStructure, DeviceError>;
    fn destroy_acceleration_structure(&self, acceleration_structure: Self::AccelerationStructure);
    fn acceleration_structure_device_address(
        &self,
        acceleration_structure: Self::AccelerationStructure,
    ) -> DeviceAddress;
    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        meshes: &[super::AccelerationStructureMesh<Self::Buffer>],
        flags: super::BuildFlags,
    ) -> Result<super::AccelerationStructureSizes, DeviceError>;
    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        flags: super::BuildFlags,
    ) -> Result<super::AccelerationStructureSizes, DeviceError>;

    fn limits(&self) -> super::Limits;
}

pub trait CommandDevice: ResourceDevice {
    type CommandEncoder: CommandEncoder<
        Buffer = Self::Buffer,
        AccelerationStructure = Self::AccelerationStructure,
    >;
    type SyncPoint: Clone + Debug;

    fn create_command_encoder(
        &self,
        desc: super::CommandEncoderDesc,
    ) -> Result<Self::CommandEncoder, DeviceError>;
    fn destroy_command_encoder(&self, encoder: &mut Self::CommandEncoder);
    fn submit(&self, encoder: &mut Self::CommandEncoder) -> Result<Self::SyncPoint, DeviceError>;
    /// Returns `false` if the sync point is not reached within the timeout.
    fn wait_for(&self, sp: &Self::SyncPoint, timeout_ms: u32) -> bool;
}

pub trait CommandEncoder {
    type Buffer: Send + Sync + Clone + Copy + Debug;
    type AccelerationStructure: Send + Sync + Clone + Copy + Debug;
    type TransferPass<'a>: TransferEncoder<Buffer = Self::Buffer>
    where
        Self: 'a;
    type AccelerationStructurePass<'a>: AccelerationStructureEncoder<
        Buffer = Self::Buffer,
        AccelerationStructure = Self::AccelerationStructure,
    >
    where
        Self: 'a;

    /// Reset the encoder and begin recording. The previous submission
    /// must have completed.
    fn start(&mut self) -> Result<(), DeviceError>;
    fn transfer(&mut self, label: &str) -> Self::TransferPass<'_>;
    /// Opening the pass orders all preceding transfers before the builds.
    fn acceleration_structure(&mut self, label: &str) -> Self::AccelerationStructurePass<'_>;
}

pub trait TransferEncoder {
    type Buffer: Send + Sync + Clone + Copy + Debug;

    fn copy_buffer_to_buffer(
        &mut self,
        src: GenericBufferPiece<Self::Buffer>,
        dst: GenericBufferPiece<Self::Buffer>,
        size: u64,
    );
}

pub trait AccelerationStructureEncoder {
    type Buffer: Send + Sync + Clone + Copy + Debug;
    type AccelerationStructure: Send + Sync + Clone + Copy + Debug;

    fn build_bottom_level(
        &mut self,
        acceleration_structure: Self::AccelerationStructure,
        meshes: &[super::AccelerationStructureMesh<Self::Buffer>],
        flags: super::BuildFlags,
        scratch_data: GenericBufferPiece<Self::Buffer>,
    );

    fn build_top_level(
        &mut self,
        acceleration_structure: Self::AccelerationStructure,
        mode: super::BuildMode,
        flags: super::BuildFlags,
        instance_count: u32,
        instance_data: GenericBufferPiece<Self::Buffer>,
        scratch_data: GenericBufferPiece<Self::Buffer>,
    );

    /// Make completed acceleration structure writes visible to
    /// subsequent acceleration structure builds.
    fn barrier(&mut self);
}
