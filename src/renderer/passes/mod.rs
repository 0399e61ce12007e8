//! 渲染 Pass
//!
//! 每个 Pass 拥有自己的渲染纹理与管线，每帧按 GBuffer → Light → Sky → Composite 顺序录制。
//! 渲染纹理的稳态是 `PixelShaderResource`：写入它的 Pass 在开始时转换到
//! `RenderTarget`，结束前再转换回来，Pass 作用域检查这对转换是否成对。

mod composite;
mod gbuffer;
mod light;
mod sky;

pub use composite::{CompositeInputs, CompositePass};
pub use gbuffer::{GBufferPass, GBUFFER_TARGETS};
pub use light::LightPass;
pub use sky::SkyPass;

use crate::core::error::Result;
use crate::gfx::types::{Format, RawResourceId, ResourceState};

use super::arena::RenderTextureHandle;
use super::context::RhiContext;
use super::descriptor::CpuDescriptorHandle;
use super::device::Device;
use super::resource::RenderTexture;

/// 可供显示的 Pass 输出
pub use crate::core::config::DisplayOutput as PassOutput;

/// 全屏四边形的顶点数（三角形带，顶点着色器按 SV_VertexID 生成位置）
pub const FULLSCREEN_VERTEX_COUNT: u32 = 4;

/// 渲染纹理规格
#[derive(Debug, Clone, Copy)]
pub struct TargetSpec {
    pub output: PassOutput,
    pub label: &'static str,
    pub format: Format,
    pub clear: [f32; 4],
}

/// 一组渲染纹理
#[derive(Debug)]
pub(crate) struct TargetSet {
    specs: &'static [TargetSpec],
    handles: Vec<RenderTextureHandle>,
}

/// 绑定所需的渲染纹理信息
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundTarget {
    pub resource: RawResourceId,
    pub rtv: CpuDescriptorHandle,
    pub clear: [f32; 4],
}

impl TargetSet {
    pub fn new(device: &mut Device, specs: &'static [TargetSpec], width: u32, height: u32) -> Result<Self> {
        let mut set = Self { specs, handles: Vec::with_capacity(specs.len()) };
        set.create(device, width, height)?;
        Ok(set)
    }

    fn create(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        for spec in self.specs {
            let handle = device.create_render_texture(spec.label, width, height, spec.format, spec.clear)?;
            self.handles.push(handle);
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &mut Device) -> Result<()> {
        for handle in self.handles.drain(..) {
            device.destroy_render_texture(handle)?;
        }
        Ok(())
    }

    pub fn resize(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        self.destroy(device)?;
        self.create(device, width, height)
    }

    pub fn get(&self, output: PassOutput) -> Option<RenderTextureHandle> {
        self.specs
            .iter()
            .position(|spec| spec.output == output)
            .and_then(|i| self.handles.get(i).copied())
    }

    pub fn srv_indices(&self, device: &Device) -> Result<Vec<u32>> {
        self.handles
            .iter()
            .map(|h| device.render_texture(*h).map(|rt| rt.srv_index()))
            .collect()
    }

    pub fn bound(&self, device: &Device) -> Result<Vec<BoundTarget>> {
        self.handles
            .iter()
            .map(|h| {
                let rt = device.render_texture(*h)?;
                Ok(BoundTarget { resource: rt.id(), rtv: rt.rtv().cpu, clear: rt.clear_color() })
            })
            .collect()
    }
}

/// 把渲染纹理从着色器资源转换为渲染目标并清除
pub(crate) fn begin_targets(ctx: &mut RhiContext, targets: &[BoundTarget]) -> Result<()> {
    for target in targets {
        ctx.transition(target.resource, ResourceState::PixelShaderResource, ResourceState::RenderTarget)?;
    }
    for target in targets {
        ctx.list().clear_render_target(target.rtv, target.resource, target.clear)?;
    }
    Ok(())
}

/// 把渲染纹理转换回着色器资源
pub(crate) fn end_targets(ctx: &mut RhiContext, targets: &[BoundTarget]) -> Result<()> {
    for target in targets {
        ctx.transition(target.resource, ResourceState::RenderTarget, ResourceState::PixelShaderResource)?;
    }
    Ok(())
}
