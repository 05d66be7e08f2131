//! Headless frame demo
//!
//! Drives the render pipeline against a recording device for a few seconds
//! of simulated time and logs per-frame statistics. Pass a `.toml` or `.ron`
//! renderer config as the first argument to override the defaults.

use nalgebra::{Rotation2, Translation2};
use render_pipeline::foundation::logging;
use render_pipeline::prelude::*;
use render_pipeline::scene::{ColorMask, FilterId, MeshGeometry, RenderableId};

const FRAME_MS: u64 = 16;
const FRAMES: u64 = 600;

struct DemoScene {
    scene: Scene,
    spinners: Vec<RenderableId>,
    flicker: RenderableId,
}

fn load_config() -> Result<RendererConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading renderer config from {}", path);
            RendererConfig::load_from_file(&path)
        }
        None => Ok(RendererConfig::default().with_gc_timing(2000, 1000)),
    }
}

fn fan(segments: u32, radius: f32) -> MeshGeometry {
    let mut positions = vec![0.0, 0.0];
    let mut uvs = vec![0.5, 0.5];
    let mut indices = Vec::new();
    for i in 0..=segments {
        #[allow(clippy::cast_precision_loss)]
        let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
        positions.extend([angle.cos() * radius, angle.sin() * radius]);
        uvs.extend([0.5 + angle.cos() * 0.5, 0.5 + angle.sin() * 0.5]);
        if i > 0 {
            indices.extend([0, i, i + 1]);
        }
    }
    MeshGeometry::new(positions, uvs, indices)
}

fn build_scene(renderer: &mut Renderer) -> DemoScene {
    let textures = renderer.textures_mut();
    let ship = textures.create(64, 64);
    let glow = textures.create(32, 32);
    let backdrop = textures.create(512, 512);

    let mut scene = Scene::new();
    let background = scene.create_render_group();
    let world = scene.create_render_group();

    let sky = scene.create_renderable(Renderable::sprite(backdrop, 800.0, 600.0));
    let planet = scene.create_renderable(Renderable::mesh(backdrop, fan(128, 120.0)).with_position(400.0, 300.0));
    scene.add_child(background, SceneNode::Renderable(sky));
    scene.add_child(
        background,
        SceneNode::Effect {
            effect: Effect::Filter(FilterId(1)),
            children: vec![SceneNode::Renderable(planet)],
        },
    );

    let mut spinners = Vec::new();
    for i in 0..24u8 {
        let x = f32::from(i % 6) * 120.0 + 60.0;
        let y = f32::from(i / 6) * 120.0 + 60.0;
        let blend = if i % 4 == 0 { BlendMode::Add } else { BlendMode::Normal };
        let texture = if i % 2 == 0 { ship } else { glow };
        let id = scene.create_renderable(
            Renderable::sprite(texture, 48.0, 48.0)
                .with_position(x, y)
                .with_blend_mode(blend),
        );
        scene.add_child(world, SceneNode::Renderable(id));
        spinners.push(id);
    }

    let flicker = scene.create_renderable(Renderable::sprite(glow, 16.0, 16.0).with_position(700.0, 40.0));
    scene.add_child(
        world,
        SceneNode::Effect {
            effect: Effect::ColorMask(ColorMask::RED | ColorMask::ALPHA),
            children: vec![SceneNode::Renderable(flicker)],
        },
    );

    DemoScene { scene, spinners, flicker }
}

fn animate(demo: &mut DemoScene, frame: u64) {
    #[allow(clippy::cast_precision_loss)]
    let angle = frame as f32 * 0.02;
    for (i, &id) in demo.spinners.iter().enumerate() {
        if i % 3 != 0 {
            continue;
        }
        if let Some(renderable) = demo.scene.renderable_mut(id) {
            let (x, y) = (renderable.transform[(0, 2)], renderable.transform[(1, 2)]);
            renderable.transform =
                Translation2::new(x, y).to_homogeneous() * Rotation2::new(angle).to_homogeneous();
        }
    }
    if frame % 120 == 60 {
        let visible = demo.scene.renderable(demo.flicker).is_some_and(Renderable::is_visible);
        demo.scene.set_visible(demo.flicker, !visible);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_filter("info");
    log::info!("Starting headless frame demo");

    let config = load_config()?;
    let mut scheduler = TickerScheduler::new();
    let clock = ManualClock::new();
    let mut renderer = Renderer::with_default_pipes(config, &mut scheduler, Box::new(clock.clone()))?;
    let mut demo = build_scene(&mut renderer);
    let mut device = RecordingDevice::new();

    let mut totals = FrameStats::default();
    for frame in 0..FRAMES {
        clock.advance(FRAME_MS);
        scheduler.update(clock.now_ms());
        animate(&mut demo, frame);

        device.clear_commands();
        let stats = renderer.render(&mut demo.scene, &mut device);
        if stats.failed_groups > 0 {
            log::warn!("Frame {}: {} groups failed", stats.tick, stats.failed_groups);
        }
        if let Some(report) = stats.gc {
            log::info!(
                "Frame {}: GC unloaded {} resources and {} cached entries",
                stats.tick,
                report.unloaded,
                report.hashes.unloaded
            );
        }
        if frame % 60 == 0 {
            log::info!(
                "Frame {}: {} draws, {} rebuilt, {} updated, {} replayed, build {}us",
                stats.tick,
                device.draw_calls(),
                stats.groups_rebuilt,
                stats.groups_updated,
                stats.groups_replayed,
                stats.build_time_us
            );
        }

        totals.groups_rebuilt += stats.groups_rebuilt;
        totals.groups_updated += stats.groups_updated;
        totals.groups_replayed += stats.groups_replayed;
        totals.failed_groups += stats.failed_groups;
        totals.uploads += stats.uploads;
        totals.build_time_us += stats.build_time_us;
    }

    let batch = renderer.pipes().batch().stats();
    log::info!(
        "Done: {} rebuilds, {} in-place updates, {} replays, {} uploads, {} failed",
        totals.groups_rebuilt,
        totals.groups_updated,
        totals.groups_replayed,
        totals.uploads,
        totals.failed_groups
    );
    log::info!(
        "Batching: {} elements batched, {} updated in place, {} batches drawn, {} skipped",
        batch.elements_batched,
        batch.elements_updated,
        batch.batches_drawn,
        batch.batches_skipped
    );
    log::info!(
        "GC: {} sweeps, {} unloaded; {} textures created on the device",
        renderer.gc().stats().sweeps,
        renderer.gc().stats().unloaded,
        device.created_textures()
    );
    Ok(())
}
