//! 录制的命令流
//!
//! 命令列表在 CPU 端把命令记录为 `Command` 序列，提交时由后端翻译成
//! 原生命令（DX12 后端）或直接执行（软件后端）。

use super::types::{
    IndexBufferView, PipelineId, PrimitiveTopology, RawHeapId, RawResourceId, RootSignatureId,
    ScissorRect, TextureFootprint, TransitionBarrier, Viewport,
};

/// 一条录制的 GPU 命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 一批转换屏障
    Barrier(Vec<TransitionBarrier>),
    /// 缓冲区区间拷贝
    CopyBuffer {
        dst: RawResourceId,
        dst_offset: u64,
        src: RawResourceId,
        src_offset: u64,
        size: u64,
    },
    /// 上传缓冲区到纹理子资源
    CopyBufferToTexture {
        dst: RawResourceId,
        subresource: u32,
        src: RawResourceId,
        src_offset: u64,
        footprint: TextureFootprint,
    },
    /// 纹理子资源到回读缓冲区
    CopyTextureToBuffer {
        dst: RawResourceId,
        dst_offset: u64,
        src: RawResourceId,
        subresource: u32,
        footprint: TextureFootprint,
    },
    ClearRenderTarget {
        rtv: usize,
        resource: RawResourceId,
        color: [f32; 4],
    },
    ClearDepth {
        dsv: usize,
        resource: RawResourceId,
        depth: f32,
    },
    SetDescriptorHeap(RawHeapId),
    SetRootSignature(RootSignatureId),
    SetPipeline(PipelineId),
    /// 写入根常量（从偏移 0 开始）
    SetRootConstants { parameter: u32, values: Vec<u32> },
    /// 以 GPU 虚拟地址绑定根 CBV
    SetRootConstantBuffer {
        parameter: u32,
        resource: RawResourceId,
        offset: u64,
    },
    SetRenderTargets { rtvs: Vec<usize>, dsv: Option<usize> },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetTopology(PrimitiveTopology),
    SetIndexBuffer(IndexBufferView),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
}

impl Command {
    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw { .. } | Command::DrawIndexed { .. })
    }
}
