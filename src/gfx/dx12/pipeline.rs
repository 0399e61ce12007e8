//! 根签名序列化与图形管线状态创建

use std::mem::ManuallyDrop;

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{GraphicsPipelineDesc, RootParameter, RootSignatureDesc, MAX_RENDER_TARGETS};
use crate::verify;

use super::convert;

pub fn create_root_signature(device: &ID3D12Device, desc: &RootSignatureDesc) -> Result<ID3D12RootSignature> {
    let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
        .parameters
        .iter()
        .map(|parameter| match *parameter {
            RootParameter::Constants { register, space, num_values } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Constants: D3D12_ROOT_CONSTANTS {
                        ShaderRegister: register,
                        RegisterSpace: space,
                        Num32BitValues: num_values,
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            },
            RootParameter::Cbv { register, space } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR { ShaderRegister: register, RegisterSpace: space },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            },
        })
        .collect();

    let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
        .static_samplers
        .iter()
        .map(|sampler| {
            let address = convert::address_mode(sampler.address);
            D3D12_STATIC_SAMPLER_DESC {
                Filter: convert::filter(sampler.filter),
                AddressU: address,
                AddressV: address,
                AddressW: address,
                MipLODBias: 0.0,
                MaxAnisotropy: 16,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: D3D12_STATIC_BORDER_COLOR_OPAQUE_BLACK,
                MinLOD: 0.0,
                MaxLOD: D3D12_FLOAT32_MAX,
                ShaderRegister: sampler.register,
                RegisterSpace: 0,
                ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            }
        })
        .collect();

    // 顶点从 SRV 中按 SV_VertexID 取出，不使用输入装配布局
    let mut flags = D3D12_ROOT_SIGNATURE_FLAG_NONE;
    if desc.bindless {
        flags |= D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED;
    }

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: samplers.as_ptr(),
        Flags: flags,
    };

    unsafe {
        let mut signature = None;
        let mut error = None;
        if let Err(e) = D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error)) {
            let message = error.map(|blob: ID3DBlob| blob_to_string(&blob)).unwrap_or_else(|| format!("{:?}", e));
            return Err(GraphicsError::PipelineCreation(format!("'{}': {}", desc.label, message)).into());
        }
        let signature = signature
            .ok_or_else(|| GraphicsError::PipelineCreation(format!("'{}': empty root signature blob", desc.label)))?;

        let bytes = std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize());
        let root_signature: ID3D12RootSignature = verify!(device.CreateRootSignature(0, bytes), "CreateRootSignature")?;
        super::set_name(&root_signature, &desc.label);
        Ok(root_signature)
    }
}

pub fn create_graphics_pipeline(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    desc: &GraphicsPipelineDesc,
) -> Result<ID3D12PipelineState> {
    if desc.render_target_formats.len() > MAX_RENDER_TARGETS {
        return Err(GraphicsError::PipelineCreation(format!("'{}' binds too many render targets", desc.label)).into());
    }

    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    for (slot, format) in rtv_formats.iter_mut().zip(&desc.render_target_formats) {
        *slot = convert::format(*format);
    }

    let write_all = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: false.into(),
        LogicOpEnable: false.into(),
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        ..Default::default()
    };

    let depth_stencil = match desc.depth {
        Some(depth) => D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: if depth.write { D3D12_DEPTH_WRITE_MASK_ALL } else { D3D12_DEPTH_WRITE_MASK_ZERO },
            DepthFunc: convert::compare_func(depth.compare),
            StencilEnable: false.into(),
            StencilReadMask: 0xFF,
            StencilWriteMask: 0xFF,
            FrontFace: D3D12_DEPTH_STENCILOP_DESC::default(),
            BackFace: D3D12_DEPTH_STENCILOP_DESC::default(),
        },
        None => D3D12_DEPTH_STENCIL_DESC { DepthEnable: false.into(), ..Default::default() },
    };

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.vertex_shader.bytes().as_ptr() as *const _,
            BytecodeLength: desc.vertex_shader.bytes().len(),
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.pixel_shader.bytes().as_ptr() as *const _,
            BytecodeLength: desc.pixel_shader.bytes().len(),
        },
        BlendState: D3D12_BLEND_DESC {
            AlphaToCoverageEnable: false.into(),
            IndependentBlendEnable: false.into(),
            RenderTarget: [write_all; 8],
        },
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: convert::cull_mode(desc.cull),
            FrontCounterClockwise: true.into(),
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        DepthStencilState: depth_stencil,
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: desc.render_target_formats.len() as u32,
        RTVFormats: rtv_formats,
        DSVFormat: desc.depth.map_or(DXGI_FORMAT_UNKNOWN, |d| convert::format(d.format)),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        ..Default::default()
    };

    let result = unsafe { device.CreateGraphicsPipelineState(&pso_desc) };
    // 归还描述结构体持有的根签名引用
    drop(ManuallyDrop::into_inner(pso_desc.pRootSignature));

    let pipeline: ID3D12PipelineState = verify!(result, "CreateGraphicsPipelineState")?;
    super::set_name(&pipeline, &desc.label);
    Ok(pipeline)
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    }
}
