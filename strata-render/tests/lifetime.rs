mod common;

use common::{create_quad, place, Command, Event, MockDevice, SCRATCH_ALIGNMENT};
use glam::{Mat4, Vec3};
use strata_graphics::{BufferUsage, Memory};
use strata_render::{transform, Accelerator, BuildConfig, ErrorKind, TlasStage};

fn position(events: &[Event], target: &Event) -> usize {
    events
        .iter()
        .position(|e| e == target)
        .unwrap_or_else(|| panic!("{target:?} not found"))
}

fn loaded(nodes: usize) -> (MockDevice, Accelerator<MockDevice>) {
    let device = MockDevice::new();
    let mut accelerator = Accelerator::new(&device, BuildConfig::default()).unwrap();
    let quad = create_quad(&device, "quad");
    let nodes = (0..nodes)
        .map(|i| place(&quad, Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0))))
        .collect::<Vec<_>>();
    accelerator.load_scene(&device, &nodes).unwrap();
    (device, accelerator)
}

#[test]
fn scratch_is_released_after_its_fence() {
    let (device, _accelerator) = loaded(2);
    let events = device.events();
    let submissions = device.submissions();

    for (id, commands) in submissions {
        for command in commands {
            let scratch = match command {
                Command::BuildBottomLevel { scratch, .. }
                | Command::BuildTopLevel { scratch, .. } => scratch.buffer,
                _ => continue,
            };
            let submitted = position(&events, &Event::CreateBuffer(scratch));
            let waited = position(
                &events,
                &Event::Wait {
                    id,
                    completed: true,
                },
            );
            let released = position(&events, &Event::DestroyBuffer(scratch));
            assert!(submitted < waited && waited < released);
        }
    }
}

#[test]
fn bottom_level_build_ends_with_barrier() {
    let (device, _accelerator) = loaded(1);
    let submissions = device.submissions();
    let (_, blas_commands) = &submissions[0];
    assert_eq!(blas_commands[0], Command::PassBarrier);
    assert!(matches!(
        blas_commands[1],
        Command::BuildBottomLevel { .. }
    ));
    assert_eq!(blas_commands[2], Command::Barrier);

    // The instance upload precedes the build in the same submission.
    let (_, tlas_commands) = &submissions[1];
    assert!(matches!(tlas_commands[0], Command::Copy { .. }));
    assert_eq!(tlas_commands[1], Command::PassBarrier);
    assert!(matches!(tlas_commands[2], Command::BuildTopLevel { .. }));
}

#[test]
fn scratch_buffers_are_aligned() {
    let (device, mut accelerator) = loaded(3);
    accelerator
        .refit(&device, Mat4::from_translation(Vec3::Z))
        .unwrap();
    let scratches = device.buffers_named("scratch");
    // Bottom level, top level build, top level update.
    assert_eq!(scratches.len(), 3);
    for (_, info) in scratches {
        assert_eq!(info.alignment, SCRATCH_ALIGNMENT);
        assert_eq!(info.memory, Memory::Device);
        assert!(info.usage.contains(BufferUsage::DEVICE_ADDRESS));
    }
    // The update uses its own scratch size.
    let (_, update) = &device.buffers_named("update-scratch")[0];
    assert_eq!(update.size, 384 + 3 * 16);
}

#[test]
fn upload_is_sized_to_instances() {
    let (device, accelerator) = loaded(3);
    let staging = device.buffers_named("staging");
    assert_eq!(staging.len(), 1);
    let (staging_buffer, info) = &staging[0];
    assert_eq!(info.size, 3 * 64);
    assert_eq!(info.memory, Memory::Upload);

    let copy = device
        .commands()
        .into_iter()
        .find_map(|c| match c {
            Command::Copy { src, dst, size } => Some((src, dst, size)),
            _ => None,
        })
        .unwrap();
    assert_eq!(copy.0.buffer, *staging_buffer);
    assert_eq!(Some(copy.1.buffer), accelerator.instance_buffer());
    assert_eq!(copy.2, 3 * 64);

    let top_level = accelerator.top_level().unwrap();
    let storage = device.buffer(top_level.buffer);
    assert!(storage
        .usage
        .contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE));
    assert_eq!(storage.size, 256 + 3 * 128);
}

#[test]
fn staging_and_scratch_do_not_outlive_the_build() {
    let (device, accelerator) = loaded(2);
    for (buffer, _) in device
        .buffers_named("scratch")
        .into_iter()
        .chain(device.buffers_named("staging"))
    {
        assert!(!device.is_alive(buffer), "{buffer:?} leaked");
    }
    assert!(accelerator.gate().is_idle());
}

#[test]
fn allocation_failure_is_reported() {
    let device = MockDevice::new();
    let mut accelerator = Accelerator::new(&device, BuildConfig::default()).unwrap();
    let quad = create_quad(&device, "quad");
    let mesh_buffers = device.live_buffers();
    device.fail_allocations(Some("scratch"));

    let err = accelerator
        .load_scene(&device, &[place(&quad, Mat4::IDENTITY)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert!(device.submissions().is_empty());
    assert_eq!(device.live_buffers(), mesh_buffers);
    assert_eq!(device.live_acceleration_structures(), 0);
    assert_eq!(accelerator.stage(), TlasStage::Unbuilt);
}

#[test]
fn timeout_is_fatal_and_keeps_scratch() {
    let device = MockDevice::new();
    let mut accelerator = Accelerator::new(&device, BuildConfig::default()).unwrap();
    let quad = create_quad(&device, "quad");
    // The first wait guards the top-level submission.
    device.time_out_waits(1);

    let err = accelerator
        .load_scene(&device, &[place(&quad, Mat4::IDENTITY)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceTimeout);
    assert_eq!(accelerator.stage(), TlasStage::Unbuilt);
    // The bottom-level scratch is still owned by the unfinished work.
    let (scratch, _) = &device.buffers_named("quad/scratch")[0];
    assert!(device.is_alive(*scratch));

    accelerator.wait_idle(&device).unwrap();
    assert!(!device.is_alive(*scratch));
}

#[test]
fn failed_refit_keeps_last_good_state() {
    let (device, mut accelerator) = loaded(2);
    let before = accelerator.instances().to_vec();
    let top_level = *accelerator.top_level().unwrap();

    device.fail_submissions(true);
    let err = accelerator
        .refit(&device, Mat4::from_translation(Vec3::Y))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert_eq!(accelerator.stage(), TlasStage::Built);
    assert_eq!(accelerator.instances(), &before[..]);
    assert_eq!(*accelerator.top_level().unwrap(), top_level);
    for (buffer, _) in device.buffers_named("update-scratch") {
        assert!(!device.is_alive(buffer));
    }

    device.fail_submissions(false);
    accelerator
        .refit(&device, Mat4::from_translation(Vec3::Y))
        .unwrap();
    let moved = transform::decode(&accelerator.instances()[1].transform());
    assert!(moved
        .w_axis
        .truncate()
        .abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-5));
}

#[test]
fn refit_timeout_keeps_device_transforms() {
    let (device, mut accelerator) = loaded(1);
    device.time_out_waits(1);
    let err = accelerator
        .refit(&device, Mat4::from_translation(Vec3::Y))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceTimeout);
    assert_eq!(accelerator.stage(), TlasStage::Built);

    // The update was submitted, so the host mirror follows the device.
    accelerator.wait_idle(&device).unwrap();
    let raw = accelerator.top_level().unwrap().raw;
    assert_eq!(
        device.acceleration_structure(raw).instances,
        accelerator.instances()
    );

    accelerator
        .refit(&device, Mat4::from_translation(Vec3::X))
        .unwrap();
    let moved = transform::decode(&accelerator.instances()[0].transform());
    assert!(moved
        .w_axis
        .truncate()
        .abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-5));
    assert_eq!(
        device.acceleration_structure(raw).instances,
        accelerator.instances()
    );
}

#[test]
fn encoder_reset_failure_is_reported() {
    let device = MockDevice::new();
    let mut accelerator = Accelerator::new(&device, BuildConfig::default()).unwrap();
    let quad = create_quad(&device, "quad");
    let mesh_buffers = device.live_buffers();
    let nodes = [place(&quad, Mat4::IDENTITY)];

    device.fail_encoder_starts(true);
    let err = accelerator.load_scene(&device, &nodes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(matches!(
        err,
        strata_render::Error::Device {
            what: "command encoder reset",
            ..
        }
    ));
    assert!(device.submissions().is_empty());
    assert_eq!(device.live_buffers(), mesh_buffers);
    assert_eq!(device.live_acceleration_structures(), 0);
    assert_eq!(accelerator.stage(), TlasStage::Unbuilt);

    device.fail_encoder_starts(false);
    accelerator.load_scene(&device, &nodes).unwrap();
    assert_eq!(accelerator.stage(), TlasStage::Built);
}

#[test]
fn refit_survives_encoder_reset_failure() {
    let (device, mut accelerator) = loaded(2);
    let before = accelerator.instances().to_vec();
    device.fail_encoder_starts(true);
    let err = accelerator
        .refit(&device, Mat4::from_translation(Vec3::Y))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert_eq!(accelerator.stage(), TlasStage::Built);
    assert_eq!(accelerator.instances(), &before[..]);
    for (buffer, _) in device.buffers_named("update-scratch") {
        assert!(!device.is_alive(buffer));
    }
}

#[test]
fn destroy_is_idempotent() {
    let (device, mut accelerator) = loaded(2);
    accelerator.destroy(&device);
    accelerator.destroy(&device);
    assert_eq!(device.live_encoders(), 0);
    assert_eq!(device.live_acceleration_structures(), 0);

    let quad = create_quad(&device, "late");
    let mesh_buffers = device.live_buffers();
    let err = accelerator
        .load_scene(&device, &[place(&quad, Mat4::IDENTITY)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(device.live_buffers(), mesh_buffers);
}

#[test]
fn destroy_releases_everything() {
    let device = MockDevice::new();
    let mut accelerator = Accelerator::new(&device, BuildConfig::default()).unwrap();
    let quad = create_quad(&device, "quad");
    let other = create_quad(&device, "other");
    let mesh_buffers = device.live_buffers();
    accelerator
        .load_scene(
            &device,
            &[place(&quad, Mat4::IDENTITY), place(&other, Mat4::IDENTITY)],
        )
        .unwrap();
    accelerator.refit(&device, Mat4::IDENTITY).unwrap();
    assert_eq!(device.live_acceleration_structures(), 3);

    accelerator.destroy(&device);
    assert_eq!(device.live_acceleration_structures(), 0);
    assert_eq!(device.live_buffers(), mesh_buffers);
    assert_eq!(device.live_encoders(), 0);
    assert_eq!(accelerator.stage(), TlasStage::Unbuilt);
}
