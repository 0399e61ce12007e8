//! 渲染器模块
//!
//! 自底向上分层：
//!
//! - `descriptor` / `memory` / `sync` / `command` / `state`：描述符堆、显存、fence、命令录制、状态跟踪
//! - `device`：持有后端与上述服务，负责资源生命周期与上传
//! - `resource` / `swapchain` / `pipeline` / `scene`：资源包装、交换链、管线、场景数据
//! - `context`：帧循环
//! - `passes`：GBuffer → Light → Sky → Composite
//!
//! `Renderer` 把它们串成一帧。所有服务都是显式传入的，没有全局单例。

pub mod arena;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod memory;
pub mod passes;
pub mod pipeline;
pub mod resource;
pub mod scene;
pub mod state;
pub mod swapchain;
pub mod sync;

use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};

pub use arena::{BufferHandle, ConstantBufferHandle, DepthBufferHandle, RenderTextureHandle, TextureHandle};
pub use context::{ContextDesc, FrameInfo, RhiContext};
pub use descriptor::GpuDescriptorHandle;
pub use device::{Device, DeviceDesc};
pub use passes::{CompositePass, GBufferPass, LightPass, PassOutput, SkyPass};
pub use pipeline::{CompiledShaderDir, InMemoryShaderLibrary, ShaderLibrary};
pub use resource::RenderTexture;
pub use scene::{Camera, LightSet, Scene, Skybox};
pub use sync::FenceValue;

use passes::CompositeInputs;

/// 一帧的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: FrameInfo,
    pub draws: u32,
    pub fence: FenceValue,
}

/// 延迟渲染器
pub struct Renderer {
    gbuffer: GBufferPass,
    light: LightPass,
    sky: SkyPass,
    composite: CompositePass,
    output: PassOutput,
    // 最后析构：设备在 Drop 中等待 GPU 并释放所有资源
    context: RhiContext,
}

impl Renderer {
    pub fn new(mut context: RhiContext, shaders: &dyn ShaderLibrary, output: PassOutput) -> Result<Self> {
        let (width, height) = (context.width(), context.height());
        let device = context.device_mut();
        let gbuffer = GBufferPass::new(device, shaders, width, height)?;
        let light = LightPass::new(device, shaders, width, height)?;
        let sky = SkyPass::new(device, shaders, width, height)?;
        let composite = CompositePass::new(device, shaders)?;

        info!(width, height, output = ?output, "Deferred renderer initialized");
        Ok(Self { gbuffer, light, sky, composite, output, context })
    }

    pub fn context(&self) -> &RhiContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RhiContext {
        &mut self.context
    }

    pub fn device(&self) -> &Device {
        self.context.device()
    }

    pub fn device_mut(&mut self) -> &mut Device {
        self.context.device_mut()
    }

    pub fn output(&self) -> PassOutput {
        self.output
    }

    pub fn set_output(&mut self, output: PassOutput) {
        if output != self.output {
            debug!(from = ?self.output, to = ?output, "Display output changed");
            self.output = output;
        }
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.context.set_vsync(vsync);
    }

    /// 某个输出对应的渲染纹理
    pub fn output_texture(&self, output: PassOutput) -> Option<RenderTextureHandle> {
        match output {
            PassOutput::Lighting => self.light.target(),
            PassOutput::Sky => self.sky.target(),
            gbuffer => self.gbuffer.target(gbuffer),
        }
    }

    /// 当前选中输出的 GPU 可见 SRV 句柄（供编辑器视口采样）
    pub fn render_target(&self) -> Result<GpuDescriptorHandle> {
        let handle = self.output_texture(self.output).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("No render texture for output {:?}", self.output))
        })?;
        let texture = self.context.device().render_texture(handle)?;
        texture.srv().gpu.ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("'{}' has no shader-visible descriptor", texture.label())).into()
        })
    }

    fn srv_index(&self, output: PassOutput) -> Result<u32> {
        let handle = self.output_texture(output).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("No render texture for output {:?}", output))
        })?;
        Ok(self.context.device().render_texture(handle)?.srv_index())
    }

    /// 录制并呈现一帧
    pub fn render_frame(
        &mut self,
        scene: &dyn Scene,
        camera: &Camera,
        lights: &LightSet,
        skybox: &Skybox,
    ) -> Result<FrameStats> {
        let frame = self.context.begin_frame()?;

        let draws = self.gbuffer.render(&mut self.context, scene, camera)?;

        let gbuffer = self.gbuffer.srv_indices(self.context.device())?;
        let ibl = skybox.ibl_indices(self.context.device())?;
        self.light.render(&mut self.context, camera, lights, &gbuffer, &ibl)?;
        self.sky.render(&mut self.context, skybox, camera)?;

        let inputs = CompositeInputs {
            lighting: self.srv_index(PassOutput::Lighting)?,
            sky: self.srv_index(PassOutput::Sky)?,
            depth_proxy: self.srv_index(PassOutput::DepthProxy)?,
            selected: self.srv_index(self.output)?,
            output: self.output,
        };
        self.composite.render(&mut self.context, &inputs)?;

        let fence = self.context.present()?;
        Ok(FrameStats { frame, draws, fence })
    }

    /// 窗口尺寸变化：重建后备缓冲、深度缓冲和所有 Pass 的渲染纹理
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width.max(1) == self.context.width() && height.max(1) == self.context.height() {
            return Ok(());
        }
        self.context.on_resize(width, height)?;

        let (width, height) = (self.context.width(), self.context.height());
        let device = self.context.device_mut();
        self.gbuffer.resize(device, width, height)?;
        self.light.resize(device, width, height)?;
        self.sky.resize(device, width, height)?;
        info!(width, height, "Renderer resized");
        Ok(())
    }

    /// 等待 GPU 空闲并销毁 Pass 资源
    pub fn shutdown(self) -> Result<()> {
        let Self { gbuffer, light, sky, mut context, .. } = self;
        context.flush()?;
        let device = context.device_mut();
        gbuffer.destroy(device)?;
        light.destroy(device)?;
        sky.destroy(device)?;
        device.flush()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::context::ContextDesc;
    use super::device::{Device, DeviceDesc};
    use crate::gfx::software::SoftwareBackend;
    use crate::gfx::types::SurfaceTarget;

    pub fn device_desc(frames: u32) -> DeviceDesc {
        DeviceDesc {
            frame_count: frames,
            srv_heap_capacity: 256,
            rtv_heap_capacity: 32,
            dsv_heap_capacity: 4,
            validate_states: true,
            ..DeviceDesc::default()
        }
    }

    pub fn test_device(frames: u32) -> Device {
        Device::new(Box::new(SoftwareBackend::new(Default::default())), &device_desc(frames))
            .expect("software device")
    }

    pub fn context_desc(frames: u32, width: u32, height: u32) -> ContextDesc {
        ContextDesc { device: device_desc(frames), surface: SurfaceTarget::Headless, width, height, vsync: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::{Matrix4, Vector3};
    use crate::geometry::MeshData;
    use crate::gfx::software::{CompletionMode, JournalEvent, SoftwareBackend, SoftwareProbe};
    use crate::gfx::types::Format;
    use crate::renderer::resource::TextureDesc;
    use crate::renderer::scene::{Material, PointLight, StaticScene};
    use test_support::context_desc;

    fn renderer(mode: CompletionMode) -> (Renderer, SoftwareProbe) {
        let backend = SoftwareBackend::with_completion(mode);
        let probe = backend.probe();
        let context = RhiContext::new(Box::new(backend), &context_desc(3, 64, 64)).unwrap();
        let shaders = InMemoryShaderLibrary::with_placeholders();
        (Renderer::new(context, &shaders, PassOutput::Lighting).unwrap(), probe)
    }

    fn demo_scene(device: &mut Device) -> (StaticScene, Skybox) {
        let mesh = device.upload_mesh(&MeshData::cube("Cube", 0.5)).unwrap();
        let mut scene = StaticScene::new();
        scene.push(mesh.draw_item(Matrix4::identity(), Material::default()));
        scene.push(mesh.draw_item(Matrix4::new_translation(&Vector3::new(2.0, 0.0, 0.0)), Material::default()));
        let skybox = Skybox::solid_color(device, [0.3, 0.5, 0.9, 1.0]).unwrap();
        (scene, skybox)
    }

    fn lights() -> LightSet {
        LightSet {
            points: vec![PointLight {
                position: Vector3::new(0.0, 2.0, 2.0),
                radius: 10.0,
                color: [1.0; 3],
                intensity: 5.0,
            }],
            ..LightSet::default()
        }
    }

    #[test]
    fn test_three_frame_wait_schedule() {
        let backend = SoftwareBackend::with_completion(CompletionMode::Deferred);
        let probe = backend.probe();
        let mut ctx = RhiContext::new(Box::new(backend), &context_desc(3, 64, 64)).unwrap();

        let texture = ctx
            .device_mut()
            .create_texture(TextureDesc::new("Albedo", 64, 64, Format::Rgba8Unorm), &[])
            .unwrap();
        assert_eq!(ctx.device().texture(texture).unwrap().srv_index(), 0);

        let mut waited = Vec::new();
        let mut signals = Vec::new();
        for _ in 0..5 {
            let info = ctx.begin_frame().unwrap();
            waited.push(info.waited);
            signals.push(ctx.present().unwrap().value());
        }

        assert_eq!(signals, vec![1, 2, 3, 4, 5]);
        assert_eq!(waited, vec![false, false, false, true, true]);
        probe.with_journal(|journal| {
            assert_eq!(journal.signals(), vec![1, 2, 3, 4, 5]);
            assert_eq!(journal.waits(), vec![1, 2]);
        });
    }

    #[test]
    fn test_full_frame_records_every_pass() {
        let (mut renderer, probe) = renderer(CompletionMode::Immediate);
        let (scene, skybox) = demo_scene(renderer.device_mut());
        let camera = Camera::new(Vector3::new(0.0, 1.0, 4.0), Vector3::zeros(), 1.0);
        probe.clear_journal();

        let stats = renderer.render_frame(&scene, &camera, &lights(), &skybox).unwrap();
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.frame.slot, 0);

        renderer.render_frame(&scene, &camera, &lights(), &skybox).unwrap();
        probe.with_journal(|journal| {
            // 每帧：2 个物体 + 光照 + 天空 + 合成
            assert_eq!(journal.total_draws(), 2 * 5);
            assert_eq!(journal.presents(), 2);
            let back_buffer_barriers = journal
                .events()
                .iter()
                .filter(|e| matches!(e, JournalEvent::Barrier { before: crate::gfx::types::ResourceState::Present, .. }))
                .count();
            assert_eq!(back_buffer_barriers, 2);
        });

        // 所有 Pass 都把渲染纹理恢复到了着色器资源状态
        assert!(!renderer.context().is_recording());
        renderer.shutdown().unwrap();
    }

    #[test]
    fn test_render_target_follows_selection() {
        let (mut renderer, _) = renderer(CompletionMode::Immediate);
        let outputs = [
            PassOutput::DepthProxy,
            PassOutput::BaseColor,
            PassOutput::TexCoords,
            PassOutput::Normal,
            PassOutput::MetalRoughness,
            PassOutput::Emissive,
            PassOutput::WorldPosition,
            PassOutput::Lighting,
            PassOutput::Sky,
        ];

        let mut handles = Vec::new();
        for output in outputs {
            renderer.set_output(output);
            assert_eq!(renderer.output(), output);
            handles.push(renderer.render_target().unwrap());
        }
        let mut unique = handles.clone();
        unique.sort_by_key(|h| h.ptr);
        unique.dedup();
        assert_eq!(unique.len(), outputs.len());
    }

    #[test]
    fn test_resize_rebuilds_pass_targets() {
        let (mut renderer, _) = renderer(CompletionMode::Deferred);
        let (scene, skybox) = demo_scene(renderer.device_mut());
        let camera = Camera::new(Vector3::new(0.0, 0.0, 3.0), Vector3::zeros(), 1.0);
        renderer.render_frame(&scene, &camera, &lights(), &skybox).unwrap();

        let old = renderer.output_texture(PassOutput::Normal).unwrap();
        renderer.resize(128, 96).unwrap();

        assert!(renderer.device().render_texture(old).is_err());
        let normal = renderer.output_texture(PassOutput::Normal).unwrap();
        let texture = renderer.device().render_texture(normal).unwrap();
        assert_eq!((texture.width(), texture.height()), (128, 96));

        let stats = renderer.render_frame(&scene, &camera, &lights(), &skybox).unwrap();
        assert_eq!(stats.frame.slot, 0);
        assert!(renderer.render_target().is_ok());
    }
}
