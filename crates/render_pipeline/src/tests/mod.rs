//! Whole-frame scenarios driven through [`Renderer`]

mod frames;

use crate::config::RendererConfig;
use crate::device::{DeviceCommand, RecordingDevice};
use crate::foundation::time::{Clock, ManualClock};
use crate::gc::TickerScheduler;
use crate::instructions::InstructionSetId;
use crate::scene::{RenderGroupId, Renderable, RenderableId, Scene, SceneNode};
use crate::texture::TextureId;
use crate::{FrameStats, Renderer};

/// Renderer, scene and headless device sharing one manual clock
struct Harness {
    renderer: Renderer,
    scheduler: TickerScheduler,
    clock: ManualClock,
    device: RecordingDevice,
    scene: Scene,
    group: RenderGroupId,
}

impl Harness {
    fn new(config: RendererConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut scheduler = TickerScheduler::new();
        let clock = ManualClock::new();
        let renderer = Renderer::with_default_pipes(config, &mut scheduler, Box::new(clock.clone()))
            .expect("valid configuration");
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        Self {
            renderer,
            scheduler,
            clock,
            device: RecordingDevice::new(),
            scene,
            group,
        }
    }

    fn texture(&mut self) -> TextureId {
        self.renderer.textures_mut().create(32, 32)
    }

    fn add(&mut self, renderable: Renderable) -> RenderableId {
        let id = self.scene.create_renderable(renderable);
        self.scene.add_child(self.group, SceneNode::Renderable(id));
        id
    }

    /// Advance time, fire due schedules and render with a fresh command log
    fn frame(&mut self, advance_ms: u64) -> FrameStats {
        self.clock.advance(advance_ms);
        self.scheduler.update(self.clock.now_ms());
        self.device.clear_commands();
        self.renderer.render(&mut self.scene, &mut self.device)
    }

    fn set_id(&self) -> InstructionSetId {
        self.scene
            .render_group(self.group)
            .map(|g| g.instruction_set().id())
            .expect("group exists")
    }

    fn vertex_bytes(&self) -> Vec<u8> {
        self.renderer
            .pipes()
            .batch()
            .geometry(self.set_id(), Renderable::DEFAULT_BATCHER)
            .map(|g| g.vertex_bytes().to_vec())
            .unwrap_or_default()
    }

    fn commands_matching(&self, filter: impl Fn(&DeviceCommand) -> bool) -> Vec<DeviceCommand> {
        self.device.commands().iter().filter(|c| filter(c)).cloned().collect()
    }
}
