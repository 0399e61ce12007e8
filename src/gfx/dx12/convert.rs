//! 后端无关类型到 D3D12 结构体的转换

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::config::FeatureLevel;
use crate::gfx::types::{
    AddressMode, ClearValue, CompareFunc, CullMode, Format, PrimitiveTopology, ResourceDesc, ResourceDimension,
    ResourceFlags, ResourceState, SamplerFilter,
};

pub fn format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

/// 资源本身的格式：深度纹理以无类型格式创建，才能同时拥有 DSV 和 R32 SRV
pub fn resource_format(desc: &ResourceDesc) -> DXGI_FORMAT {
    match desc.format {
        Format::D32Float => DXGI_FORMAT_R32_TYPELESS,
        other => format(other),
    }
}

pub fn feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

pub fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::AllShaderResource => D3D12_RESOURCE_STATE_ALL_SHADER_RESOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.flags.contains(ResourceFlags::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.flags.contains(ResourceFlags::DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    if desc.flags.contains(ResourceFlags::UNORDERED_ACCESS) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }

    match desc.dimension {
        ResourceDimension::Buffer => D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.width,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
            ..Default::default()
        },
        ResourceDimension::Texture2D => D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width,
            Height: desc.height,
            DepthOrArraySize: desc.array_size,
            MipLevels: desc.mip_levels,
            Format: resource_format(desc),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
            ..Default::default()
        },
    }
}

pub fn clear_value(desc: &ResourceDesc) -> Option<D3D12_CLEAR_VALUE> {
    desc.clear_value.map(|value| match value {
        ClearValue::Color(color) => D3D12_CLEAR_VALUE {
            Format: format(desc.format),
            Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
        },
        ClearValue::DepthStencil { depth, stencil } => D3D12_CLEAR_VALUE {
            Format: DXGI_FORMAT_D32_FLOAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: depth, Stencil: stencil },
            },
        },
    })
}

pub fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

pub fn cull_mode(cull: CullMode) -> D3D12_CULL_MODE {
    match cull {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Back => D3D12_CULL_MODE_BACK,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
    }
}

pub fn compare_func(compare: CompareFunc) -> D3D12_COMPARISON_FUNC {
    match compare {
        CompareFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn filter(filter: SamplerFilter) -> D3D12_FILTER {
    match filter {
        SamplerFilter::Point => D3D12_FILTER_MIN_MAG_MIP_POINT,
        SamplerFilter::Linear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        SamplerFilter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
    }
}

pub fn address_mode(address: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match address {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
    }
}
