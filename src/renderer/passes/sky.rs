//! 天空 Pass：把环境立方体贴图画进独立的渲染纹理，由合成 Pass 按深度代理与光照结果混合

use crate::core::error::Result;
use crate::gfx::types::{CullMode, Format};
use crate::renderer::arena::{ConstantBufferHandle, RenderTextureHandle};
use crate::renderer::context::RhiContext;
use crate::renderer::device::Device;
use crate::renderer::pipeline::{PipelineBuilder, PipelineState, ShaderLibrary};
use crate::renderer::resource::{ConstantBuffer, RenderTexture};
use crate::renderer::scene::{Camera, SkyConstants, Skybox};

use super::{begin_targets, end_targets, PassOutput, TargetSet, TargetSpec};

const ROOT_INDICES: u32 = 0;
const ROOT_CAMERA: u32 = 1;

const SKY_TARGETS: [TargetSpec; 1] =
    [TargetSpec { output: PassOutput::Sky, label: "Sky", format: Format::Rgba16Float, clear: [0.0; 4] }];

pub struct SkyPass {
    pipeline: PipelineState,
    targets: TargetSet,
    constants: ConstantBufferHandle,
}

impl SkyPass {
    pub fn new(device: &mut Device, shaders: &dyn ShaderLibrary, width: u32, height: u32) -> Result<Self> {
        // 天空盒网格朝内，从内部观察时正面可见
        let pipeline = PipelineBuilder::new("Sky", "sky.hlsl")
            .constants(2)
            .constant_buffer()
            .render_targets(&[Format::Rgba16Float])
            .cull(CullMode::Back)
            .build(device, shaders)?;

        let targets = TargetSet::new(device, &SKY_TARGETS, width, height)?;
        let constants = device.create_constant_buffer("Sky Camera", std::mem::size_of::<SkyConstants>() as u64)?;
        Ok(Self { pipeline, targets, constants })
    }

    pub fn target(&self) -> Option<RenderTextureHandle> {
        self.targets.get(PassOutput::Sky)
    }

    pub fn resize(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        self.targets.resize(device, width, height)
    }

    pub fn render(&self, ctx: &mut RhiContext, skybox: &Skybox, camera: &Camera) -> Result<()> {
        let slot = ctx.frame_slot()?;
        ctx.device_mut().update_constants(self.constants, slot, &camera.sky_constants())?;

        let environment = ctx.device().texture(skybox.environment)?.srv_index();
        let targets = self.targets.bound(ctx.device())?;
        let sky_cb = ctx.device().constant_buffer(self.constants)?.resource_id(slot)?;
        let mesh = skybox.mesh;

        ctx.begin_pass("Sky");
        begin_targets(ctx, &targets)?;
        let rtvs: Vec<_> = targets.iter().map(|t| t.rtv).collect();

        ctx.set_pipeline(&self.pipeline)?;
        let list = ctx.list();
        list.set_render_targets(&rtvs, None)?;
        list.set_root_constants(ROOT_INDICES, &[environment, mesh.vertex_srv])?;
        list.set_root_constant_buffer(ROOT_CAMERA, sky_cb, 0)?;
        list.set_index_buffer(mesh.index_view)?;
        list.draw_indexed(mesh.index_count, 0, 0)?;

        end_targets(ctx, &targets)?;
        ctx.end_pass()
    }

    pub fn destroy(mut self, device: &mut Device) -> Result<()> {
        self.targets.destroy(device)?;
        device.destroy_constant_buffer(self.constants)
    }
}
