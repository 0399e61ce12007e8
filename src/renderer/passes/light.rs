//! 延迟光照 Pass
//!
//! 全屏四边形，无顶点/索引缓冲。根参数 0 是 11 个堆索引：
//! 7 个 GBuffer SRV 后接环境、辐照度、预过滤、BRDF LUT；
//! 根参数 1 和 2 分别是相机与灯光常量缓冲区。

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{Format, PrimitiveTopology};
use crate::renderer::arena::{ConstantBufferHandle, RenderTextureHandle};
use crate::renderer::context::RhiContext;
use crate::renderer::device::Device;
use crate::renderer::pipeline::{PipelineBuilder, PipelineState, ShaderLibrary};
use crate::renderer::resource::{ConstantBuffer, RenderTexture};
use crate::renderer::scene::{Camera, CameraConstants, IblIndices, LightConstants, LightSet};

use super::{begin_targets, end_targets, PassOutput, TargetSet, TargetSpec, FULLSCREEN_VERTEX_COUNT};

const ROOT_INDICES: u32 = 0;
const ROOT_CAMERA: u32 = 1;
const ROOT_LIGHTS: u32 = 2;

pub const GBUFFER_INPUTS: usize = 7;
pub const LIGHT_INDEX_COUNT: usize = GBUFFER_INPUTS + 4;

const LIGHT_TARGETS: [TargetSpec; 1] = [TargetSpec {
    output: PassOutput::Lighting,
    label: "Lighting",
    format: Format::Rgba16Float,
    clear: [0.0; 4],
}];

/// 拼出光照 Pass 的 11 个根常量
pub fn light_indices(gbuffer: &[u32], ibl: &IblIndices) -> Result<[u32; LIGHT_INDEX_COUNT]> {
    if gbuffer.len() != GBUFFER_INPUTS {
        return Err(GraphicsError::CommandExecution(format!(
            "Light pass expects {} G-buffer indices, got {}",
            GBUFFER_INPUTS,
            gbuffer.len()
        ))
        .into());
    }
    let mut indices = [0u32; LIGHT_INDEX_COUNT];
    indices[..GBUFFER_INPUTS].copy_from_slice(gbuffer);
    indices[GBUFFER_INPUTS..].copy_from_slice(&[ibl.environment, ibl.irradiance, ibl.prefiltered, ibl.brdf_lut]);
    Ok(indices)
}

pub struct LightPass {
    pipeline: PipelineState,
    targets: TargetSet,
    camera: ConstantBufferHandle,
    lights: ConstantBufferHandle,
}

impl LightPass {
    pub fn new(device: &mut Device, shaders: &dyn ShaderLibrary, width: u32, height: u32) -> Result<Self> {
        let pipeline = PipelineBuilder::new("Light", "light.hlsl")
            .constants(LIGHT_INDEX_COUNT as u32)
            .constant_buffer()
            .constant_buffer()
            .render_targets(&[Format::Rgba16Float])
            .build(device, shaders)?;

        let targets = TargetSet::new(device, &LIGHT_TARGETS, width, height)?;
        let camera = device.create_constant_buffer("Light Camera", std::mem::size_of::<CameraConstants>() as u64)?;
        let lights = device.create_constant_buffer("Lights", std::mem::size_of::<LightConstants>() as u64)?;
        Ok(Self { pipeline, targets, camera, lights })
    }

    pub fn target(&self) -> Option<RenderTextureHandle> {
        self.targets.get(PassOutput::Lighting)
    }

    pub fn resize(&mut self, device: &mut Device, width: u32, height: u32) -> Result<()> {
        self.targets.resize(device, width, height)
    }

    pub fn render(
        &self,
        ctx: &mut RhiContext,
        camera: &Camera,
        lights: &LightSet,
        gbuffer: &[u32],
        ibl: &IblIndices,
    ) -> Result<()> {
        let indices = light_indices(gbuffer, ibl)?;
        let slot = ctx.frame_slot()?;
        let (width, height) = (ctx.width(), ctx.height());
        ctx.device_mut().update_constants(self.camera, slot, &camera.constants(width, height))?;
        ctx.device_mut().update_constants(self.lights, slot, &lights.constants())?;

        let targets = self.targets.bound(ctx.device())?;
        let camera_cb = ctx.device().constant_buffer(self.camera)?.resource_id(slot)?;
        let lights_cb = ctx.device().constant_buffer(self.lights)?.resource_id(slot)?;

        ctx.begin_pass("Light");
        begin_targets(ctx, &targets)?;
        let rtvs: Vec<_> = targets.iter().map(|t| t.rtv).collect();

        ctx.set_pipeline(&self.pipeline)?;
        let list = ctx.list();
        list.set_render_targets(&rtvs, None)?;
        list.set_root_constants(ROOT_INDICES, &indices)?;
        list.set_root_constant_buffer(ROOT_CAMERA, camera_cb, 0)?;
        list.set_root_constant_buffer(ROOT_LIGHTS, lights_cb, 0)?;
        list.set_topology(PrimitiveTopology::TriangleStrip)?;
        list.draw(FULLSCREEN_VERTEX_COUNT, 1)?;
        list.set_topology(PrimitiveTopology::TriangleList)?;

        end_targets(ctx, &targets)?;
        ctx.end_pass()
    }

    pub fn destroy(mut self, device: &mut Device) -> Result<()> {
        self.targets.destroy(device)?;
        device.destroy_constant_buffer(self.camera)?;
        device.destroy_constant_buffer(self.lights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_indices_order() {
        let ibl = IblIndices { environment: 20, irradiance: 21, prefiltered: 22, brdf_lut: 23 };
        let indices = light_indices(&[1, 2, 3, 4, 5, 6, 7], &ibl).unwrap();
        assert_eq!(indices, [1, 2, 3, 4, 5, 6, 7, 20, 21, 22, 23]);
        assert!(light_indices(&[1, 2, 3], &ibl).is_err());
    }
}
