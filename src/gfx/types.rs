//! 后端无关的 GPU 类型
//!
//! 这些类型是核心层与具体图形 API 之间的“协议”：资源描述、视图描述、
//! 资源状态、根签名与管线描述、适配器与能力信息等。
//! 后端只负责把它们翻译成原生结构体。

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::core::config::FeatureLevel;

/// 后端内部资源 ID（资源与其子分配一一绑定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawResourceId(pub(crate) u64);

impl fmt::Display for RawResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// 描述符堆 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHeapId(pub(crate) u32);

/// 命令分配器 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId(pub(crate) u32);

/// 根签名 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureId(pub(crate) u32);

/// 管线状态 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(crate) u32);

/// 命令队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// 图形队列（支持图形、计算、传输），热路径只使用它
    Graphics,
    /// 异步计算队列
    Compute,
    /// 传输队列
    Copy,
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// 着色器可见的 CBV/SRV/UAV 堆（bindless 表）
    CbvSrvUav,
    /// 渲染目标视图
    Rtv,
    /// 深度模板视图
    Dsv,
}

impl DescriptorHeapKind {
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapKind::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapKind::Rtv => "RTV",
            DescriptorHeapKind::Dsv => "DSV",
        }
    }

    pub fn is_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapKind::CbvSrvUav)
    }
}

/// 描述符堆的地址信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    /// CPU 句柄基址（非零）
    pub cpu_start: usize,
    /// GPU 句柄基址（仅着色器可见的堆）
    pub gpu_start: Option<u64>,
    /// 描述符步长
    pub increment_size: u32,
}

/// 资源放置类别，创建后不可改变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryPlacement {
    /// GPU 本地内存，稳态读取
    DeviceLocal,
    /// CPU 可写的上传内存
    UploadVisible,
    /// GPU 本地内存，以 CopyDest 状态创建，作为上传数据的最终驻留位置
    CopyDestination,
    /// CPU 可读的回读内存（仅调试路径）
    Readback,
}

impl MemoryPlacement {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryPlacement::DeviceLocal => "device-local",
            MemoryPlacement::UploadVisible => "upload-visible",
            MemoryPlacement::CopyDestination => "copy-destination",
            MemoryPlacement::Readback => "readback",
        }
    }

    /// CPU 是否可以映射
    pub fn is_cpu_visible(&self) -> bool {
        matches!(self, MemoryPlacement::UploadVisible | MemoryPlacement::Readback)
    }
}

/// 像素 / 元素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    Rg32Float,
    R32Float,
    R32Uint,
    D32Float,
}

impl Format {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 1,
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb | Format::Bgra8Unorm => 4,
            Format::Rg16Float | Format::R32Float | Format::R32Uint | Format::D32Float => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgba32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D32Float)
    }
}

bitflags! {
    /// 资源用途标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
    }
}

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    Buffer,
    Texture2D,
}

/// 清除值（渲染目标的优化清除值）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

/// 资源描述
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDesc {
    pub label: String,
    pub dimension: ResourceDimension,
    /// 缓冲区为字节数，纹理为像素宽度
    pub width: u64,
    pub height: u32,
    pub array_size: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub flags: ResourceFlags,
    pub clear_value: Option<ClearValue>,
}

impl ResourceDesc {
    /// 缓冲区描述
    pub fn buffer(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            flags: ResourceFlags::empty(),
            clear_value: None,
        }
    }

    /// 二维纹理描述
    pub fn texture_2d(label: impl Into<String>, width: u32, height: u32, format: Format) -> Self {
        Self {
            label: label.into(),
            dimension: ResourceDimension::Texture2D,
            width: width as u64,
            height,
            array_size: 1,
            mip_levels: 1,
            format,
            flags: ResourceFlags::empty(),
            clear_value: None,
        }
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_array_size(mut self, array_size: u16) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u16) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }

    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    pub fn subresource_count(&self) -> u32 {
        self.array_size as u32 * self.mip_levels as u32
    }

    /// 子资源的尺寸（紧密排列）
    pub fn subresource_extent(&self, subresource: u32) -> (u32, u32) {
        let mip = subresource % self.mip_levels as u32;
        let width = ((self.width as u32) >> mip).max(1);
        let height = (self.height >> mip).max(1);
        (width, height)
    }

    /// 紧密排列时的总字节数
    pub fn packed_size(&self) -> u64 {
        if self.is_buffer() {
            return self.width;
        }
        (0..self.subresource_count())
            .map(|sub| {
                let (w, h) = self.subresource_extent(sub);
                w as u64 * h as u64 * self.format.bytes_per_pixel() as u64
            })
            .sum()
    }
}

/// 缓冲区到纹理拷贝时的行布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFootprint {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// 行跨度，按 256 字节对齐
    pub row_pitch: u32,
}

/// 纹理数据行跨度对齐要求
pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;

/// 常量缓冲区大小对齐要求
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

impl TextureFootprint {
    pub fn new(format: Format, width: u32, height: u32) -> Self {
        let row_pitch = align_up(
            (width * format.bytes_per_pixel()) as u64,
            TEXTURE_PITCH_ALIGNMENT as u64,
        ) as u32;
        Self { format, width, height, row_pitch }
    }

    /// 一行有效数据的字节数
    pub fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    /// 上传缓冲区需要的总字节数
    pub fn total_bytes(&self) -> u64 {
        self.row_pitch as u64 * self.height as u64
    }
}

/// GPU 资源状态
///
/// 与 D3D12 的 `D3D12_RESOURCE_STATES` 对应。核心层不会自动推断状态，
/// 每个屏障都由调用方声明 before/after。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    PixelShaderResource,
    NonPixelShaderResource,
    AllShaderResource,
    CopyDest,
    CopySource,
    GenericRead,
    Present,
}

impl ResourceState {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceState::Common => "Common",
            ResourceState::VertexAndConstantBuffer => "VertexAndConstantBuffer",
            ResourceState::IndexBuffer => "IndexBuffer",
            ResourceState::RenderTarget => "RenderTarget",
            ResourceState::UnorderedAccess => "UnorderedAccess",
            ResourceState::DepthWrite => "DepthWrite",
            ResourceState::DepthRead => "DepthRead",
            ResourceState::PixelShaderResource => "PixelShaderResource",
            ResourceState::NonPixelShaderResource => "NonPixelShaderResource",
            ResourceState::AllShaderResource => "AllShaderResource",
            ResourceState::CopyDest => "CopyDest",
            ResourceState::CopySource => "CopySource",
            ResourceState::GenericRead => "GenericRead",
            ResourceState::Present => "Present",
        }
    }
}

/// 一个转换屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub resource: RawResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 视图描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewDesc {
    /// 纹理着色器资源视图
    TextureSrv { format: Format, mip_levels: u16, cube: bool },
    /// 缓冲区着色器资源视图（stride 为 0 时为原始字节视图）
    BufferSrv { first_element: u64, num_elements: u32, stride: u32 },
    /// 纹理无序访问视图
    TextureUav { format: Format, mip_slice: u16 },
    /// 缓冲区无序访问视图
    BufferUav { first_element: u64, num_elements: u32, stride: u32 },
    /// 常量缓冲视图
    Cbv { offset: u64, size: u32 },
    /// 渲染目标视图
    Rtv { format: Format },
    /// 深度模板视图
    Dsv { format: Format },
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width as i32, bottom: height as i32 }
    }
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

/// 索引缓冲视图；`resource` 为空表示空视图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexBufferView {
    pub resource: Option<RawResourceId>,
    pub size_bytes: u32,
}

impl IndexBufferView {
    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
    }
}

/// 物理适配器信息
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub index: u32,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
    /// 该适配器支持的最高特性等级
    pub max_feature_level: FeatureLevel,
    /// 软件适配器（WARP 等）
    pub is_software: bool,
}

/// 资源绑定层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceBindingTier {
    Tier1,
    Tier2,
    Tier3,
}

/// 光线追踪层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RaytracingTier {
    NotSupported,
    Tier1_0,
    Tier1_1,
}

/// 网格着色器层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MeshShaderTier {
    NotSupported,
    Tier1,
}

/// 启动时探测的可选硬件特性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub feature_level: FeatureLevel,
    /// 着色器模型（主版本，次版本）
    pub shader_model: (u8, u8),
    pub wave_ops: bool,
    pub wave_lane_count_min: u32,
    pub raytracing_tier: RaytracingTier,
    pub mesh_shader_tier: MeshShaderTier,
    pub resource_binding_tier: ResourceBindingTier,
}

impl DeviceCapabilities {
    /// 是否支持通过 `ResourceDescriptorHeap[]` 直接索引（SM 6.6 + Tier3）
    pub fn supports_dynamic_resources(&self) -> bool {
        self.resource_binding_tier == ResourceBindingTier::Tier3 && self.shader_model >= (6, 6)
    }
}

/// 窗口表面
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceTarget {
    /// 无窗口（软件后端 / 测试）
    Headless,
    /// Win32 窗口句柄
    Hwnd(isize),
}

/// 交换链描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
}

/// 着色器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
            ShaderStage::Compute => "cs",
        }
    }
}

/// 编译后的着色器字节码（不透明）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlob(pub Arc<[u8]>);

impl ShaderBlob {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 根参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// 32 位根常量
    Constants { register: u32, space: u32, num_values: u32 },
    /// 根 CBV
    Cbv { register: u32, space: u32 },
}

impl RootParameter {
    /// 占用的根签名 DWORD 数
    pub fn cost(&self) -> u32 {
        match self {
            RootParameter::Constants { num_values, .. } => *num_values,
            RootParameter::Cbv { .. } => 2,
        }
    }
}

/// 静态采样器的过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFilter {
    Point,
    Linear,
    Anisotropic,
}

/// 静态采样器的寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

/// 静态采样器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSampler {
    pub register: u32,
    pub filter: SamplerFilter,
    pub address: AddressMode,
}

/// 根签名描述
#[derive(Debug, Clone, PartialEq)]
pub struct RootSignatureDesc {
    pub label: String,
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    /// 允许着色器直接索引 CBV/SRV/UAV 堆
    pub bindless: bool,
}

/// 根签名最多 64 个 DWORD
pub const MAX_ROOT_SIGNATURE_DWORDS: u32 = 64;

impl RootSignatureDesc {
    pub fn cost(&self) -> u32 {
        self.parameters.iter().map(RootParameter::cost).sum()
    }
}

/// 背面剔除
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
    Front,
}

/// 深度比较函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunc {
    Less,
    LessEqual,
    Always,
}

/// 深度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub format: Format,
    pub write: bool,
    pub compare: CompareFunc,
}

/// 图形管线描述
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub vertex_shader: ShaderBlob,
    pub pixel_shader: ShaderBlob,
    pub render_target_formats: Vec<Format>,
    pub depth: Option<DepthState>,
    pub cull: CullMode,
}

/// 同时绑定的渲染目标上限
pub const MAX_RENDER_TARGETS: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_pitch_alignment() {
        let footprint = TextureFootprint::new(Format::Rgba8Unorm, 64, 64);
        assert_eq!(footprint.row_bytes(), 256);
        assert_eq!(footprint.row_pitch, 256);

        let footprint = TextureFootprint::new(Format::Rgba8Unorm, 10, 3);
        assert_eq!(footprint.row_bytes(), 40);
        assert_eq!(footprint.row_pitch, 256);
        assert_eq!(footprint.total_bytes(), 768);
    }

    #[test]
    fn test_packed_size_with_mips() {
        let desc = ResourceDesc::texture_2d("mips", 4, 4, Format::Rgba8Unorm).with_mip_levels(3);
        // 4x4 + 2x2 + 1x1
        assert_eq!(desc.packed_size(), (16 + 4 + 1) * 4);
        assert_eq!(desc.subresource_extent(2), (1, 1));

        let cube = ResourceDesc::texture_2d("cube", 2, 2, Format::Rgba16Float).with_array_size(6);
        assert_eq!(cube.packed_size(), 6 * 4 * 8);
    }

    #[test]
    fn test_root_signature_cost() {
        let desc = RootSignatureDesc {
            label: "test".into(),
            parameters: vec![
                RootParameter::Constants { register: 0, space: 0, num_values: 16 },
                RootParameter::Cbv { register: 1, space: 0 },
            ],
            static_samplers: Vec::new(),
            bindless: true,
        };
        assert_eq!(desc.cost(), 18);
    }
}
