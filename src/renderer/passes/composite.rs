//! 合成到后备缓冲
//!
//! 根常量：光照、天空、深度代理、当前选中输出的 SRV 索引和显示模式。
//! 模式 0 按深度代理在光照和天空之间选择；模式 1 直接显示选中的输出。

use crate::core::error::Result;
use crate::gfx::types::{PrimitiveTopology, ResourceState};
use crate::renderer::context::RhiContext;
use crate::renderer::device::Device;
use crate::renderer::pipeline::{PipelineBuilder, PipelineState, ShaderLibrary};
use crate::renderer::swapchain::SwapChain;

use super::{PassOutput, FULLSCREEN_VERTEX_COUNT};

const ROOT_INDICES: u32 = 0;

/// 合成 Pass 的输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeInputs {
    pub lighting: u32,
    pub sky: u32,
    pub depth_proxy: u32,
    pub selected: u32,
    pub output: PassOutput,
}

impl CompositeInputs {
    pub fn to_constants(&self) -> [u32; 5] {
        let mode = match self.output {
            PassOutput::Lighting => 0,
            _ => 1,
        };
        [self.lighting, self.sky, self.depth_proxy, self.selected, mode]
    }
}

pub struct CompositePass {
    pipeline: PipelineState,
}

impl CompositePass {
    pub fn new(device: &mut Device, shaders: &dyn ShaderLibrary) -> Result<Self> {
        let pipeline = PipelineBuilder::new("Composite", "composite.hlsl")
            .constants(5)
            .render_targets(&[SwapChain::FORMAT])
            .build(device, shaders)?;
        Ok(Self { pipeline })
    }

    pub fn render(&self, ctx: &mut RhiContext, inputs: &CompositeInputs) -> Result<()> {
        let back = ctx.back_buffer()?;

        ctx.begin_pass("Composite");
        ctx.transition(back.resource, ResourceState::Present, ResourceState::RenderTarget)?;
        ctx.list().clear_render_target(back.rtv_cpu(), back.resource, [0.0, 0.0, 0.0, 1.0])?;

        ctx.set_pipeline(&self.pipeline)?;
        let list = ctx.list();
        list.set_render_targets(&[back.rtv_cpu()], None)?;
        list.set_root_constants(ROOT_INDICES, &inputs.to_constants())?;
        list.set_topology(PrimitiveTopology::TriangleStrip)?;
        list.draw(FULLSCREEN_VERTEX_COUNT, 1)?;
        list.set_topology(PrimitiveTopology::TriangleList)?;

        ctx.transition(back.resource, ResourceState::RenderTarget, ResourceState::Present)?;
        ctx.end_pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_mode() {
        let mut inputs =
            CompositeInputs { lighting: 10, sky: 11, depth_proxy: 3, selected: 10, output: PassOutput::Lighting };
        assert_eq!(inputs.to_constants(), [10, 11, 3, 10, 0]);

        inputs.output = PassOutput::Normal;
        inputs.selected = 6;
        assert_eq!(inputs.to_constants()[3..], [6, 1]);
    }
}
