//! GBuffer Pass
//!
//! 7 个渲染目标同时写入，共享场景深度缓冲。每个绘制项只更新根常量：
//!
//! | 根参数 | 内容 |
//! |--------|------|
//! | 0 | 世界矩阵（16 个常量） |
//! | 1 | 材质记录（16 个常量） |
//! | 2 | 顶点缓冲区堆索引 + base vertex |
//! | 3 | 相机常量缓冲区（根 CBV） |

use tracing::warn;

use crate::core::error::Result;
use crate::gfx::types::{CompareFunc, CullMode, Format};
use crate::renderer::arena::{ConstantBufferHandle, RenderTextureHandle};
use crate::renderer::context::RhiContext;
use crate::renderer::device::Device;
use crate::renderer::pipeline::{PipelineBuilder, PipelineState, ShaderLibrary};
use crate::renderer::resource::{ConstantBuffer, RenderTexture};
use crate::renderer::scene::{Camera, CameraConstants, Scene};

use super::{begin_targets, end_targets, PassOutput, TargetSet, TargetSpec};

const ROOT_TRANSFORM: u32 = 0;
const ROOT_MATERIAL: u32 = 1;
const ROOT_VERTEX: u32 = 2;
const ROOT_CAMERA: u32 = 3;

/// GBuffer 布局，顺序即 RTV 绑定顺序与光照 Pass 根常量顺序
pub const GBUFFER_TARGETS: [TargetSpec; 7] = [
    TargetSpec { output: PassOutput::DepthProxy, label: "GBuffer Depth", format: Format::R32Float, clear: [1.0, 0.0, 0.0, 0.0] },
    TargetSpec { output: PassOutput::BaseColor, label: "GBuffer Base Color", format: Format::Rgba8Unorm, clear: [0.0; 4] },
    TargetSpec { output: PassOutput::TexCoords, label: "GBuffer TexCoords", format: Format::Rg16Float, clear: [0.0; 4] },
    TargetSpec { output: PassOutput::Normal, label: "GBuffer Normal", format: Format::Rgba16Float, clear: [0.0; 4] },
    TargetSpec {
        output: PassOutput::MetalRoughness,
        label: "GBuffer Metal Roughness",
        format: Format::Rg16Float,
        clear: [0.0; 4],
    },
    TargetSpec { output: PassOutput::Emissive, label: "GBuffer Emissive", format: Format::Rgba16Float, clear: [0.0; 4] },
    TargetSpec {
        output: PassOutput::WorldPosition,
        label: "GBuffer World Position",
        format: Format::Rgba32Float,
        clear: [0.0; 4],
    },
];

pub struct GBufferPass {
    pipeline: PipelineState,
    targets: TargetSet,
    camera: ConstantBufferHandle,
}

impl GBufferPass {
    pub fn new(device: &mut Device, shaders: &dyn ShaderLibrary, width: u32, height: u32) -> Result<Self> {
        let formats: Vec<Format> = GBUFFER_TARGETS.iter().map(|t| t.format).collect();
        let pipeline = PipelineBuilder::new("GBuffer", "gbuffer.hlsl")
            .constants(16)
            .constants(16)
            .constants(2)
            .constant_buffer()
            .render_targets(&formats)
            .depth(true, CompareFunc::Less)
            .cull(CullMode::Back)
            .build(device, shaders)?;

        let targets = TargetSet::new(device, &GBUFFER_TARGETS, width, height)?;
        let camera = device.create_constant_buffer("GBuffer Camera", std::mem::size_of::<CameraConstants>() as u64)?;
        Ok(Self { pipeline, targets, camera })
    }

    pub fn target(&self, output: PassOutput) -> Option<RenderTextureHandle> {
        self.targets.get(output)
    }

    /// 7 个目标的 SRV 堆索引，顺序同 `GBUFFER_TARGETS`
    pub fn srv_indices(&self, device: &Device) -> Result<Vec<u32>> {
        self.targets.srv_indices(device)
    }

    pub fn resize(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        self.targets.resize(device, width, height)
    }

    /// 录制 GBuffer，返回绘制项数量
    pub fn render(&self, ctx: &mut RhiContext, scene: &dyn Scene, camera: &Camera) -> Result<u32> {
        let slot = ctx.frame_slot()?;
        let (width, height) = (ctx.width(), ctx.height());
        ctx.device_mut().update_constants(self.camera, slot, &camera.constants(width, height))?;

        let targets = self.targets.bound(ctx.device())?;
        let camera_cb = ctx.device().constant_buffer(self.camera)?.resource_id(slot)?;
        let (depth_id, dsv) = {
            let depth = ctx.depth_buffer()?;
            (depth.id(), depth.dsv().cpu)
        };

        ctx.begin_pass("GBuffer");
        begin_targets(ctx, &targets)?;
        ctx.list().clear_depth(dsv, depth_id, 1.0)?;

        let rtvs: Vec<_> = targets.iter().map(|t| t.rtv).collect();
        ctx.list().set_render_targets(&rtvs, Some(dsv))?;
        ctx.set_pipeline(&self.pipeline)?;
        ctx.list().set_root_constant_buffer(ROOT_CAMERA, camera_cb, 0)?;

        let list = ctx.list();
        let mut draws = 0;
        scene.visit_drawables(&mut |item| {
            if item.index_buffer.is_empty() || item.index_count == 0 {
                warn!(vertex_buffer = item.vertex_buffer, "Drawable without index data skipped");
                return Ok(());
            }
            list.set_root_constants(ROOT_TRANSFORM, &item.transform_constants())?;
            list.set_root_constants(ROOT_MATERIAL, &item.material.to_constants())?;
            list.set_root_constants(ROOT_VERTEX, &[item.vertex_buffer, item.base_vertex])?;
            list.set_index_buffer(item.index_buffer)?;
            list.draw_indexed(item.index_count, item.first_index, 0)?;
            draws += 1;
            Ok(())
        })?;

        end_targets(ctx, &targets)?;
        ctx.end_pass()?;
        Ok(draws)
    }

    pub fn destroy(mut self, device: &mut Device) -> Result<()> {
        self.targets.destroy(device)?;
        device.destroy_constant_buffer(self.camera)
    }
}
