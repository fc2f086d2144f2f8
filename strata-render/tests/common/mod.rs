//! Recording device used to drive the acceleration structure code
//! without a GPU.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::Arc,
};
use strata_graphics::{
    traits, AccelerationStructureDesc, AccelerationStructureInstance, AccelerationStructureMesh,
    AccelerationStructureSizes, AccelerationStructureType, BufferDesc, BufferUsage, BuildFlags,
    BuildMode, CommandEncoderDesc, DeviceAddress, DeviceError, GenericBufferPiece, Limits, Memory,
};
use strata_render::{GeometryBuffer, Mesh, MeshNode, Surface, Vertex};

pub const SCRATCH_ALIGNMENT: u64 = 128;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Buffer(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AccelerationStructure(pub u32);

pub type Piece = GenericBufferPiece<Buffer>;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Copy {
        src: Piece,
        dst: Piece,
        size: u64,
    },
    /// Implicit barrier when an acceleration structure pass opens.
    PassBarrier,
    BuildBottomLevel {
        acceleration_structure: AccelerationStructure,
        triangle_counts: Vec<u32>,
        index_offsets: Vec<u64>,
        flags: BuildFlags,
        scratch: Piece,
    },
    BuildTopLevel {
        acceleration_structure: AccelerationStructure,
        mode: BuildMode,
        flags: BuildFlags,
        instance_count: u32,
        instance_data: Piece,
        scratch: Piece,
    },
    Barrier,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    CreateBuffer(Buffer),
    DestroyBuffer(Buffer),
    CreateAccelerationStructure(AccelerationStructure),
    DestroyAccelerationStructure(AccelerationStructure),
    Submit { id: u32, commands: Vec<Command> },
    Wait { id: u32, completed: bool },
}

#[derive(Clone, Debug)]
pub struct BufferInfo {
    pub name: String,
    pub size: u64,
    pub memory: Memory,
    pub usage: BufferUsage,
    pub alignment: u64,
    pub address: DeviceAddress,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct AccelerationStructureInfo {
    pub name: String,
    pub ty: AccelerationStructureType,
    pub buffer: Buffer,
    pub size: u64,
    /// Instances consumed by the last top-level build or update.
    pub instances: Vec<AccelerationStructureInstance>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    next_submission: u32,
    buffers: HashMap<Buffer, BufferInfo>,
    acceleration_structures: HashMap<AccelerationStructure, AccelerationStructureInfo>,
    destroyed_buffers: HashMap<Buffer, BufferInfo>,
    events: Vec<Event>,
    fail_allocation: Option<String>,
    fail_submit: bool,
    pending_timeouts: u32,
    encoders: u32,
}

#[derive(Default)]
pub struct MockDevice {
    state: RefCell<State>,
    fail_start: Rc<Cell<bool>>,
}

pub struct Encoder {
    commands: Vec<Command>,
    recording: bool,
    fail_start: Rc<Cell<bool>>,
}

pub struct TransferPass<'a> {
    commands: &'a mut Vec<Command>,
}

pub struct AccelerationStructurePass<'a> {
    commands: &'a mut Vec<Command>,
}

#[derive(Clone, Debug)]
pub struct SyncPoint(u32);

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every buffer allocation whose name contains `pattern`.
    pub fn fail_allocations(&self, pattern: Option<&str>) {
        self.state.borrow_mut().fail_allocation = pattern.map(str::to_string);
    }

    /// Make resetting the command encoder fail, as on a lost device.
    pub fn fail_encoder_starts(&self, fail: bool) {
        self.fail_start.set(fail);
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.state.borrow_mut().fail_submit = fail;
    }

    /// Make the next `count` fence waits time out.
    pub fn time_out_waits(&self, count: u32) {
        self.state.borrow_mut().pending_timeouts = count;
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn submissions(&self) -> Vec<(u32, Vec<Command>)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match *event {
                Event::Submit {
                    id,
                    ref commands,
                } => Some((id, commands.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.submissions()
            .into_iter()
            .flat_map(|(_, commands)| commands)
            .collect()
    }

    pub fn buffer(&self, buffer: Buffer) -> BufferInfo {
        let state = self.state.borrow();
        match state.buffers.get(&buffer) {
            Some(info) => info.clone(),
            None => state.destroyed_buffers[&buffer].clone(),
        }
    }

    pub fn is_alive(&self, buffer: Buffer) -> bool {
        self.state.borrow().buffers.contains_key(&buffer)
    }

    pub fn live_buffers(&self) -> Vec<Buffer> {
        let mut buffers = self
            .state
            .borrow()
            .buffers
            .keys()
            .copied()
            .collect::<Vec<_>>();
        buffers.sort();
        buffers
    }

    pub fn live_acceleration_structures(&self) -> usize {
        self.state.borrow().acceleration_structures.len()
    }

    pub fn acceleration_structure(&self, raw: AccelerationStructure) -> AccelerationStructureInfo {
        self.state.borrow().acceleration_structures[&raw].clone()
    }

    pub fn live_encoders(&self) -> u32 {
        self.state.borrow().encoders
    }

    /// All buffers ever created whose name contains `pattern`.
    pub fn buffers_named(&self, pattern: &str) -> Vec<(Buffer, BufferInfo)> {
        let state = self.state.borrow();
        let mut list = state
            .buffers
            .iter()
            .chain(state.destroyed_buffers.iter())
            .filter(|&(_, info)| info.name.contains(pattern))
            .map(|(&buffer, info)| (buffer, info.clone()))
            .collect::<Vec<_>>();
        list.sort_by_key(|&(buffer, _)| buffer);
        list
    }

    fn execute(state: &mut State, commands: &[Command]) {
        for command in commands {
            match *command {
                Command::Copy { src, dst, size } => {
                    let bytes = state.buffers[&src.buffer].data
                        [src.offset as usize..(src.offset + size) as usize]
                        .to_vec();
                    let target = state.buffers.get_mut(&dst.buffer).unwrap();
                    target.data[dst.offset as usize..(dst.offset + size) as usize]
                        .copy_from_slice(&bytes);
                }
                Command::BuildTopLevel {
                    acceleration_structure,
                    instance_count,
                    instance_data,
                    ..
                } => {
                    let source = &state.buffers[&instance_data.buffer].data;
                    let start = instance_data.offset as usize;
                    let end = start + instance_count as usize * 64;
                    let instances = source[start..end]
                        .chunks_exact(64)
                        .map(bytemuck::pod_read_unaligned)
                        .collect();
                    state
                        .acceleration_structures
                        .get_mut(&acceleration_structure)
                        .unwrap()
                        .instances = instances;
                }
                _ => {}
            }
        }
    }
}

impl traits::ResourceDevice for MockDevice {
    type Buffer = Buffer;
    type AccelerationStructure = AccelerationStructure;

    fn create_buffer(&self, desc: BufferDesc) -> Result<Buffer, DeviceError> {
        let mut state = self.state.borrow_mut();
        if let Some(ref pattern) = state.fail_allocation {
            if desc.name.contains(pattern.as_str()) {
                return Err(DeviceError::OutOfDeviceMemory);
            }
        }
        assert_ne!(desc.size, 0, "zero-sized buffer '{}'", desc.name);
        state.next_id += 1;
        let buffer = Buffer(state.next_id);
        let address = if desc.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            0x1000_0000 + state.next_id as u64 * 0x1_0000
        } else {
            0
        };
        state.buffers.insert(
            buffer,
            BufferInfo {
                name: desc.name.to_string(),
                size: desc.size,
                memory: desc.memory,
                usage: desc.usage,
                alignment: desc.alignment,
                address,
                data: vec![0; desc.size as usize],
            },
        );
        state.events.push(Event::CreateBuffer(buffer));
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let mut state = self.state.borrow_mut();
        let info = state
            .buffers
            .remove(&buffer)
            .unwrap_or_else(|| panic!("double free of {buffer:?}"));
        state.destroyed_buffers.insert(buffer, info);
        state.events.push(Event::DestroyBuffer(buffer));
    }

    fn buffer_device_address(&self, buffer: Buffer) -> DeviceAddress {
        self.state.borrow().buffers[&buffer].address
    }

    fn write_buffer(&self, piece: Piece, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let info = state.buffers.get_mut(&piece.buffer).unwrap();
        assert_ne!(info.memory, Memory::Device, "writing to device memory");
        let start = piece.offset as usize;
        info.data[start..start + data.len()].copy_from_slice(data);
    }

    fn create_acceleration_structure(
        &self,
        desc: AccelerationStructureDesc<Buffer>,
    ) -> Result<AccelerationStructure, DeviceError> {
        let mut state = self.state.borrow_mut();
        let storage = &state.buffers[&desc.buffer.buffer];
        assert!(storage
            .usage
            .contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE));
        assert!(desc.buffer.offset + desc.size <= storage.size);
        state.next_id += 1;
        let raw = AccelerationStructure(state.next_id);
        state.acceleration_structures.insert(
            raw,
            AccelerationStructureInfo {
                name: desc.name.to_string(),
                ty: desc.ty,
                buffer: desc.buffer.buffer,
                size: desc.size,
                instances: Vec::new(),
            },
        );
        state.events.push(Event::CreateAccelerationStructure(raw));
        Ok(raw)
    }

    fn destroy_acceleration_structure(&self, raw: AccelerationStructure) {
        let mut state = self.state.borrow_mut();
        state
            .acceleration_structures
            .remove(&raw)
            .unwrap_or_else(|| panic!("double free of {raw:?}"));
        state.events.push(Event::DestroyAccelerationStructure(raw));
    }

    fn acceleration_structure_device_address(&self, raw: AccelerationStructure) -> DeviceAddress {
        0x9000_0000 + raw.0 as u64 * 0x100
    }

    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        meshes: &[AccelerationStructureMesh<Buffer>],
        _flags: BuildFlags,
    ) -> Result<AccelerationStructureSizes, DeviceError> {
        let triangles = meshes.iter().map(|m| m.triangle_count as u64).sum::<u64>();
        Ok(AccelerationStructureSizes {
            data: 256 + triangles * 64,
            scratch: 512 + triangles * 32,
            update_scratch: 0,
        })
    }

    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        _flags: BuildFlags,
    ) -> Result<AccelerationStructureSizes, DeviceError> {
        let count = instance_count as u64;
        Ok(AccelerationStructureSizes {
            data: 256 + count * 128,
            scratch: 1024 + count * 64,
            update_scratch: 384 + count * 16,
        })
    }

    fn limits(&self) -> Limits {
        Limits {
            min_scratch_alignment: SCRATCH_ALIGNMENT,
        }
    }
}

impl traits::CommandDevice for MockDevice {
    type CommandEncoder = Encoder;
    type SyncPoint = SyncPoint;

    fn create_command_encoder(&self, _desc: CommandEncoderDesc) -> Result<Encoder, DeviceError> {
        self.state.borrow_mut().encoders += 1;
        Ok(Encoder {
            commands: Vec::new(),
            recording: false,
            fail_start: Rc::clone(&self.fail_start),
        })
    }

    fn destroy_command_encoder(&self, _encoder: &mut Encoder) {
        let mut state = self.state.borrow_mut();
        assert_ne!(state.encoders, 0, "double free of a command encoder");
        state.encoders -= 1;
    }

    fn submit(&self, encoder: &mut Encoder) -> Result<SyncPoint, DeviceError> {
        assert!(encoder.recording, "submitting an encoder that was not started");
        encoder.recording = false;
        let mut state = self.state.borrow_mut();
        if state.fail_submit {
            return Err(DeviceError::DeviceLost);
        }
        let commands = std::mem::take(&mut encoder.commands);
        Self::execute(&mut state, &commands);
        state.next_submission += 1;
        let id = state.next_submission;
        state.events.push(Event::Submit { id, commands });
        Ok(SyncPoint(id))
    }

    fn wait_for(&self, sp: &SyncPoint, _timeout_ms: u32) -> bool {
        let mut state = self.state.borrow_mut();
        let completed = if state.pending_timeouts > 0 {
            state.pending_timeouts -= 1;
            false
        } else {
            true
        };
        state.events.push(Event::Wait {
            id: sp.0,
            completed,
        });
        completed
    }
}

impl traits::CommandEncoder for Encoder {
    type Buffer = Buffer;
    type AccelerationStructure = AccelerationStructure;
    type TransferPass<'a> = TransferPass<'a>;
    type AccelerationStructurePass<'a> = AccelerationStructurePass<'a>;

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.fail_start.get() {
            return Err(DeviceError::DeviceLost);
        }
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn transfer(&mut self, _label: &str) -> TransferPass<'_> {
        assert!(self.recording);
        TransferPass {
            commands: &mut self.commands,
        }
    }

    fn acceleration_structure(&mut self, _label: &str) -> AccelerationStructurePass<'_> {
        assert!(self.recording);
        self.commands.push(Command::PassBarrier);
        AccelerationStructurePass {
            commands: &mut self.commands,
        }
    }
}

impl traits::TransferEncoder for TransferPass<'_> {
    type Buffer = Buffer;

    fn copy_buffer_to_buffer(&mut self, src: Piece, dst: Piece, size: u64) {
        self.commands.push(Command::Copy { src, dst, size });
    }
}

impl traits::AccelerationStructureEncoder for AccelerationStructurePass<'_> {
    type Buffer = Buffer;
    type AccelerationStructure = AccelerationStructure;

    fn build_bottom_level(
        &mut self,
        acceleration_structure: AccelerationStructure,
        meshes: &[AccelerationStructureMesh<Buffer>],
        flags: BuildFlags,
        scratch: Piece,
    ) {
        self.commands.push(Command::BuildBottomLevel {
            acceleration_structure,
            triangle_counts: meshes.iter().map(|m| m.triangle_count).collect(),
            index_offsets: meshes.iter().map(|m| m.index_data.offset).collect(),
            flags,
            scratch,
        });
    }

    fn build_top_level(
        &mut self,
        acceleration_structure: AccelerationStructure,
        mode: BuildMode,
        flags: BuildFlags,
        instance_count: u32,
        instance_data: Piece,
        scratch: Piece,
    ) {
        self.commands.push(Command::BuildTopLevel {
            acceleration_structure,
            mode,
            flags,
            instance_count,
            instance_data,
            scratch,
        });
    }

    fn barrier(&mut self) {
        self.commands.push(Command::Barrier);
    }
}

/// Upload a mesh into host-visible buffers, like a loader would.
pub fn create_mesh(
    device: &MockDevice,
    name: &str,
    vertices: &[Vertex],
    indices: &[u32],
    surfaces: Vec<Surface>,
) -> Arc<Mesh<Buffer>> {
    use strata_graphics::traits::ResourceDevice as _;

    let usage = BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::DEVICE_ADDRESS;
    let vertex_data: &[u8] = bytemuck::cast_slice(vertices);
    let vertex_buffer = device
        .create_buffer(BufferDesc {
            name: &format!("{name}/vertices"),
            size: vertex_data.len() as u64,
            memory: Memory::Shared,
            usage: usage | BufferUsage::VERTEX,
            alignment: 0,
        })
        .unwrap();
    device.write_buffer(vertex_buffer.into(), vertex_data);
    let index_data: &[u8] = bytemuck::cast_slice(indices);
    let index_buffer = device
        .create_buffer(BufferDesc {
            name: &format!("{name}/indices"),
            size: index_data.len() as u64,
            memory: Memory::Shared,
            usage: usage | BufferUsage::INDEX,
            alignment: 0,
        })
        .unwrap();
    device.write_buffer(index_buffer.into(), index_data);

    Arc::new(Mesh {
        name: name.to_string(),
        geometry: GeometryBuffer {
            vertex_buffer,
            vertex_address: device.buffer_device_address(vertex_buffer),
            vertex_count: vertices.len() as u32,
            index_buffer,
            index_address: device.buffer_device_address(index_buffer),
            index_count: indices.len() as u32,
        },
        surfaces,
    })
}

/// Unit quad in the XY plane, as one surface of two triangles.
pub fn create_quad(device: &MockDevice, name: &str) -> Arc<Mesh<Buffer>> {
    let vertices = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]].map(|[x, y]| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        color: [1.0; 4],
        ..Default::default()
    });
    create_mesh(
        device,
        name,
        &vertices,
        &[0, 1, 2, 0, 2, 3],
        vec![Surface {
            start_index: 0,
            count: 6,
        }],
    )
}

pub fn place(mesh: &Arc<Mesh<Buffer>>, world_transform: glam::Mat4) -> MeshNode<Buffer> {
    MeshNode {
        mesh: Arc::clone(mesh),
        world_transform,
    }
}
