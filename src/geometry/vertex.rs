//! 顶点格式
//!
//! 顶点不经过输入装配器：顶点缓冲区以结构化缓冲区 SRV 暴露，
//! 顶点着色器用 `SV_VertexID + base_vertex` 按索引拉取。
//! 因此布局必须与 HLSL 中的 `StructuredBuffer<Vertex>` 逐字节一致。

use bytemuck::{Pod, Zeroable};

/// 网格顶点
///
/// | 字段 | 字节 |
/// |------|------|
/// | position | 0..12 |
/// | normal | 12..24 |
/// | texcoord | 24..32 |
/// | tangent | 32..48，w 为副切线的符号 |
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub tangent: [f32; 4],
}

impl Vertex {
    /// 结构化缓冲区的元素跨度
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    #[inline]
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2], tangent: [f32; 4]) -> Self {
        Self { position, normal, texcoord, tangent }
    }

    /// 只有位置的顶点（天空盒）
    #[inline]
    pub fn position_only(position: [f32; 3]) -> Self {
        Self { position, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 48);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);

        let v = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.25], [1.0, 0.0, 0.0, -1.0]);
        let words: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(words[6..8], [0.5, 0.25]);
        assert_eq!(words[11], -1.0);
    }
}
