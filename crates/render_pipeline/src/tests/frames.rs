use super::Harness;
use crate::batcher::{BatchAction, DeviceBatcherAdaptor};
use crate::config::RendererConfig;
use crate::device::{BlendMode, ColorMask, DeviceCommand, FilterId, ShaderId};
use crate::foundation::time::ManualClock;
use crate::gc::TickerScheduler;
use crate::instructions::InstructionPayload;
use crate::pipes::{RenderPipe, SpritePipe};
use crate::scene::{Effect, MeshGeometry, Renderable, SceneNode};
use crate::{RenderError, Renderer};

fn triangle() -> MeshGeometry {
    MeshGeometry::new(
        vec![0.0, 0.0, 10.0, 0.0, 0.0, 10.0],
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        vec![0, 1, 2],
    )
}

#[test]
fn test_unchanged_scene_replays_without_upload() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    for x in 0..3u8 {
        h.add(Renderable::sprite(texture, 8.0, 8.0).with_position(f32::from(x) * 10.0, 0.0));
    }

    let first = h.frame(16);
    assert_eq!(first.groups_rebuilt, 1);
    assert_eq!(first.uploads, 1);
    assert_eq!(first.instructions_executed, 1);
    assert_eq!(h.device.draw_calls(), 1);

    let second = h.frame(16);
    assert_eq!(second.groups_replayed, 1);
    assert_eq!(second.uploads, 0);
    assert_eq!(second.instructions_executed, 1);
    assert_eq!(h.device.draw_calls(), 1);
    assert_eq!(h.device.created_textures(), 1);
}

#[test]
fn test_in_place_update_matches_rebuild() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    let moved = h.add(Renderable::sprite(texture, 8.0, 8.0).with_position(20.0, 0.0));
    h.frame(16);

    if let Some(renderable) = h.scene.renderable_mut(moved) {
        renderable.tint = 0x00FF_0000;
        renderable.set_position(40.0, 5.0);
    }
    let updated = h.frame(16);
    assert_eq!(updated.groups_updated, 1);
    assert_eq!(updated.uploads, 1);
    assert_eq!(h.renderer.pipes().batch().stats().elements_updated, 1);
    let in_place = h.vertex_bytes();

    h.scene.render_group_mut(h.group).unwrap().mark_structure_changed();
    let rebuilt = h.frame(16);
    assert_eq!(rebuilt.groups_rebuilt, 1);
    assert_eq!(h.vertex_bytes(), in_place);
}

#[test]
fn test_blend_changes_split_batches() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.add(Renderable::sprite(texture, 8.0, 8.0).with_blend_mode(BlendMode::Add));
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.frame(16);

    let blends = h.commands_matching(|c| matches!(c, DeviceCommand::SetBlendMode(_)));
    assert_eq!(
        blends,
        vec![
            DeviceCommand::SetBlendMode(BlendMode::Normal),
            DeviceCommand::SetBlendMode(BlendMode::Add),
            DeviceCommand::SetBlendMode(BlendMode::Normal),
        ]
    );
    assert_eq!(h.device.draw_calls(), 3);
    assert_eq!(h.commands_matching(|c| matches!(c, DeviceCommand::BindGeometry { .. })).len(), 1);

    let actions: Vec<_> = h
        .renderer
        .pipes()
        .batch()
        .batches(h.set_id(), Renderable::DEFAULT_BATCHER)
        .iter()
        .map(|b| b.action)
        .collect();
    assert_eq!(
        actions,
        vec![BatchAction::StartBatch, BatchAction::RenderBatch, BatchAction::RenderBatch]
    );
}

#[test]
fn test_texture_slot_overflow() {
    let mut h = Harness::new(RendererConfig::default().with_max_batchable_textures(2));
    for _ in 0..4 {
        let texture = h.texture();
        h.add(Renderable::sprite(texture, 8.0, 8.0));
    }
    h.frame(16);

    let draws = h.commands_matching(|c| matches!(c, DeviceCommand::DrawIndexed { .. }));
    assert_eq!(
        draws,
        vec![
            DeviceCommand::DrawIndexed { start: 0, count: 12 },
            DeviceCommand::DrawIndexed { start: 12, count: 12 },
        ]
    );
    let slots: Vec<_> = h
        .device
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::BindTexture { slot, .. } => Some(*slot),
            _ => None,
        })
        .collect();
    assert_eq!(slots, vec![0, 1, 0, 1]);
}

#[test]
fn test_unavailable_texture_skips_only_its_batch() {
    let mut h = Harness::new(RendererConfig::default().with_max_batchable_textures(1));
    let good = h.texture();
    let bad = h.texture();
    h.add(Renderable::sprite(good, 8.0, 8.0));
    h.add(Renderable::sprite(bad, 8.0, 8.0));
    h.device.fail_texture(bad);

    let stats = h.frame(16);
    assert_eq!(stats.failed_groups, 0);
    assert_eq!(stats.instructions_executed, 2);
    assert_eq!(h.device.draw_calls(), 1);
    assert_eq!(h.renderer.pipes().batch().stats().batches_skipped, 1);

    h.device.restore_texture(bad);
    let stats = h.frame(16);
    assert_eq!(stats.groups_replayed, 1);
    assert_eq!(h.device.draw_calls(), 2);
}

#[test]
fn test_pending_texture_draws_once_ready() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.renderer.textures_mut().create_pending(16, 16);
    h.add(Renderable::sprite(texture, 8.0, 8.0));

    h.frame(16);
    assert_eq!(h.device.draw_calls(), 0);

    h.renderer.textures_mut().mark_ready(texture);
    h.frame(16);
    assert_eq!(h.device.draw_calls(), 1);
}

#[test]
fn test_destroyed_texture_forces_rebuild() {
    let mut h = Harness::new(RendererConfig::default());
    let doomed = h.texture();
    let kept = h.texture();
    h.add(Renderable::sprite(doomed, 8.0, 8.0));
    h.add(Renderable::sprite(kept, 8.0, 8.0));
    h.frame(16);
    assert_eq!(h.device.live_textures(), 2);

    h.renderer.destroy_texture(&mut h.scene, doomed);

    let stats = h.frame(16);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.groups_rebuilt, 1);
    assert_eq!(h.device.live_textures(), 1);
    let batches = h.renderer.pipes().batch().batches(h.set_id(), Renderable::DEFAULT_BATCHER);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].element_count, 1);
    assert_eq!(batches[0].textures.as_slice(), &[kept]);
}

#[test]
fn test_large_mesh_drawn_unbatched() {
    let mut config = RendererConfig::default();
    config.batcher.mesh_batch_vertex_limit = 2;
    let mut h = Harness::new(config);
    let texture = h.texture();
    let mesh = h.add(Renderable::mesh(texture, triangle()));
    h.frame(16);

    let set = h.scene.render_group(h.group).unwrap().instruction_set();
    let payloads: Vec<_> = set.iter().map(|i| i.payload).collect();
    assert_eq!(
        payloads,
        vec![
            InstructionPayload::BlendMode(BlendMode::Normal),
            InstructionPayload::Renderable(mesh),
        ]
    );
    assert!(h.device.commands().contains(&DeviceCommand::BindShader(ShaderId::MESH)));
    assert_eq!(
        h.commands_matching(|c| matches!(c, DeviceCommand::DrawIndexed { .. })),
        vec![DeviceCommand::DrawIndexed { start: 0, count: 3 }]
    );
    assert_eq!(h.device.uploads(), 2);

    h.frame(16);
    assert_eq!(h.device.uploads(), 0);
    assert_eq!(h.device.draw_calls(), 1);
}

#[test]
fn test_unbatched_mesh_breaks_sprite_run() {
    let mut config = RendererConfig::default();
    config.batcher.mesh_batch_vertex_limit = 2;
    let mut h = Harness::new(config);
    let texture = h.texture();
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.add(Renderable::mesh(texture, triangle()));
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.frame(16);

    let set = h.scene.render_group(h.group).unwrap().instruction_set();
    let kinds: Vec<_> = set
        .iter()
        .map(|i| match i.payload {
            InstructionPayload::Batch { .. } => "batch",
            InstructionPayload::Renderable(_) => "mesh",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["batch", "mesh", "batch"]);
    assert_eq!(h.device.draw_calls(), 3);
    assert_eq!(h.commands_matching(|c| matches!(c, DeviceCommand::BindGeometry { .. })).len(), 3);
}

#[test]
fn test_small_mesh_joins_sprite_batch() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.add(Renderable::mesh(texture, triangle()));
    h.frame(16);

    assert_eq!(
        h.commands_matching(|c| matches!(c, DeviceCommand::DrawIndexed { .. })),
        vec![DeviceCommand::DrawIndexed { start: 0, count: 9 }]
    );
}

#[test]
fn test_effects_bracket_their_subtree() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    let sprite = h.scene.create_renderable(Renderable::sprite(texture, 8.0, 8.0));
    let masked = SceneNode::Effect {
        effect: Effect::ColorMask(ColorMask::RED),
        children: vec![SceneNode::Renderable(sprite)],
    };
    h.scene.add_child(
        h.group,
        SceneNode::Effect {
            effect: Effect::Filter(FilterId(7)),
            children: vec![masked],
        },
    );
    h.frame(16);

    let effects = h.commands_matching(|c| {
        matches!(
            c,
            DeviceCommand::PushFilter(_)
                | DeviceCommand::PopFilter
                | DeviceCommand::SetColorMask(_)
                | DeviceCommand::DrawIndexed { .. }
        )
    });
    assert_eq!(
        effects,
        vec![
            DeviceCommand::PushFilter(FilterId(7)),
            DeviceCommand::SetColorMask(ColorMask::RED),
            DeviceCommand::DrawIndexed { start: 0, count: 6 },
            DeviceCommand::SetColorMask(ColorMask::all()),
            DeviceCommand::PopFilter,
        ]
    );
}

#[test]
fn test_failed_group_does_not_stop_the_frame() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    let broken = h.add(Renderable::sprite(texture, 8.0, 8.0).with_batcher("missing"));
    let other = h.scene.create_render_group();
    let fine = h.scene.create_renderable(Renderable::sprite(texture, 8.0, 8.0));
    h.scene.add_child(other, SceneNode::Renderable(fine));

    let stats = h.frame(16);
    assert_eq!(stats.failed_groups, 1);
    assert_eq!(stats.groups_rebuilt, 1);
    assert_eq!(h.device.draw_calls(), 1);

    if let Some(renderable) = h.scene.renderable_mut(broken) {
        renderable.batcher = Renderable::DEFAULT_BATCHER;
    }
    let stats = h.frame(16);
    assert_eq!(stats.failed_groups, 0);
    assert_eq!(stats.groups_rebuilt, 1);
    assert_eq!(stats.groups_replayed, 1);
    assert_eq!(h.device.draw_calls(), 2);
}

#[test]
fn test_destroy_renderable_rebuilds_group() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    let gone = h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.frame(16);

    assert!(h.renderer.destroy_renderable(&mut h.scene, gone).is_some());
    assert!(h.renderer.destroy_renderable(&mut h.scene, gone).is_none());

    let stats = h.frame(16);
    assert_eq!(stats.groups_rebuilt, 1);
    assert_eq!(
        h.commands_matching(|c| matches!(c, DeviceCommand::DrawIndexed { .. })),
        vec![DeviceCommand::DrawIndexed { start: 0, count: 6 }]
    );
}

#[test]
fn test_destroy_render_group_releases_geometry() {
    let mut h = Harness::new(RendererConfig::default());
    let texture = h.texture();
    h.add(Renderable::sprite(texture, 8.0, 8.0));
    h.frame(16);
    let buffers = h.device.live_buffers();
    assert_eq!(buffers, 2);

    assert!(h.renderer.destroy_render_group(&mut h.scene, h.group));
    assert!(!h.renderer.destroy_render_group(&mut h.scene, h.group));

    let stats = h.frame(16);
    assert_eq!(stats.released, 2);
    assert_eq!(h.device.live_buffers(), 0);
    assert_eq!(h.device.draw_calls(), 0);
}

#[test]
fn test_pipe_name_collision_rejected() {
    let mut scheduler = TickerScheduler::new();
    let pipes: Vec<Box<dyn RenderPipe>> = vec![Box::new(SpritePipe::new()), Box::new(SpritePipe::new())];
    let result = Renderer::new(
        RendererConfig::default(),
        pipes,
        Box::new(DeviceBatcherAdaptor::new()),
        &mut scheduler,
        Box::new(ManualClock::new()),
    );
    assert!(matches!(result, Err(RenderError::PipeNameCollision(name)) if name == "sprite"));
}

#[test]
fn test_invalid_config_rejected() {
    let mut scheduler = TickerScheduler::new();
    let result = Renderer::with_default_pipes(
        RendererConfig::default().with_max_batchable_textures(0),
        &mut scheduler,
        Box::new(ManualClock::new()),
    );
    assert!(matches!(result, Err(RenderError::Config(_))));
}
