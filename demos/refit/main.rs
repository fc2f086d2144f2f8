use glam::{Mat4, Vec3};
use std::{env, path::PathBuf};
use strata::{Axis, Node, Scene, Surface, TransformControls, Vertex};

fn quad_vertices() -> [Vertex; 4] {
    [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]].map(|[x, y]| Vertex {
        position: [x, y, 0.0],
        uv_x: x + 0.5,
        normal: [0.0, 0.0, 1.0],
        uv_y: y + 0.5,
        color: [1.0; 4],
    })
}

fn print_instances(engine: &strata::Engine) {
    for instance in engine.accelerator().instances() {
        let matrix = strata::transform::decode(&instance.transform());
        log::info!(
            "\tinstance {} at {:?}",
            instance.custom_index(),
            matrix.w_axis.truncate()
        );
    }
}

fn main() {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/refit/engine.ron"));
    let config = match strata::config::Engine::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Using defaults, {}: {:?}", err, config_path);
            strata::config::Engine::default()
        }
    };

    let mut engine = match strata::Engine::new(&config) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("{}", err);
            return;
        }
    };

    let quad = engine
        .create_mesh(
            "quad",
            &quad_vertices(),
            &[0, 1, 2, 0, 2, 3],
            vec![Surface {
                start_index: 0,
                count: 6,
            }],
        )
        .unwrap();
    let scene = Scene {
        roots: vec![
            Node::new("A", Mat4::IDENTITY).with_mesh(&quad),
            Node::new("B", Mat4::from_translation(Vec3::X)).with_mesh(&quad),
        ],
    };
    engine.load_scene(&scene).unwrap();
    log::info!(
        "Loaded {} bottom-level structures",
        engine.accelerator().bottom_levels().len()
    );
    print_instances(&engine);

    engine
        .refit(Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)))
        .unwrap();
    log::info!("After moving up:");
    print_instances(&engine);

    let mut controls = TransformControls::default();
    let steps = [
        controls.set_rotation(Axis::Y, 0.5),
        controls.set_scale(2.0),
        controls.set_rotation(Axis::Y, 0.0),
        controls.set_scale(1.0),
    ];
    for delta in steps.into_iter().flatten() {
        engine.refit(delta).unwrap();
    }
    log::info!("After spinning around:");
    print_instances(&engine);

    let top_level = engine.top_level().unwrap().unwrap();
    log::info!("Top-level structure ready at {:#x}", top_level.address);
}
