//! DirectX 12 描述符堆
//!
//! 只负责原生堆的创建与视图写入；槽位分配在核心层的 `DescriptorAllocator` 中完成。

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{DescriptorHeapInfo, DescriptorHeapKind, ViewDesc};
use crate::verify;

use super::convert;

/// DX12 描述符堆
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    kind: DescriptorHeapKind,
    capacity: u32,
    info: DescriptorHeapInfo,
}

impl Dx12DescriptorHeap {
    pub fn new(device: &ID3D12Device, kind: DescriptorHeapKind, capacity: u32, label: &str) -> Result<Self> {
        let heap_type = match kind {
            DescriptorHeapKind::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            DescriptorHeapKind::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            DescriptorHeapKind::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        };
        let flags = if kind.is_shader_visible() {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = verify!(
                device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: heap_type,
                    NumDescriptors: capacity,
                    Flags: flags,
                    NodeMask: 0,
                }),
                "CreateDescriptorHeap"
            )?;
            super::set_name(&heap, label);

            let gpu_start = kind
                .is_shader_visible()
                .then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);
            let info = DescriptorHeapInfo {
                cpu_start: heap.GetCPUDescriptorHandleForHeapStart().ptr,
                gpu_start,
                increment_size: device.GetDescriptorHandleIncrementSize(heap_type),
            };
            Ok(Self { heap, kind, capacity, info })
        }
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn info(&self) -> DescriptorHeapInfo {
        self.info
    }

    fn cpu_handle(&self, index: u32) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if index >= self.capacity {
            return Err(GraphicsError::CommandExecution(format!(
                "Descriptor index {} outside {} heap of {}",
                index,
                self.kind.name(),
                self.capacity
            ))
            .into());
        }
        Ok(D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.info.cpu_start + index as usize * self.info.increment_size as usize,
        })
    }

    /// 在 `index` 处写入视图
    pub fn write_view(
        &self,
        device: &ID3D12Device,
        index: u32,
        resource: &ID3D12Resource,
        view: &ViewDesc,
    ) -> Result<()> {
        let handle = self.cpu_handle(index)?;
        unsafe {
            match *view {
                ViewDesc::TextureSrv { format, mip_levels, cube } => {
                    let desc = if cube {
                        D3D12_SHADER_RESOURCE_VIEW_DESC {
                            Format: convert::format(format),
                            ViewDimension: D3D12_SRV_DIMENSION_TEXTURECUBE,
                            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                                TextureCube: D3D12_TEXCUBE_SRV {
                                    MostDetailedMip: 0,
                                    MipLevels: mip_levels as u32,
                                    ResourceMinLODClamp: 0.0,
                                },
                            },
                        }
                    } else {
                        D3D12_SHADER_RESOURCE_VIEW_DESC {
                            Format: convert::format(format),
                            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                                Texture2D: D3D12_TEX2D_SRV {
                                    MostDetailedMip: 0,
                                    MipLevels: mip_levels as u32,
                                    PlaneSlice: 0,
                                    ResourceMinLODClamp: 0.0,
                                },
                            },
                        }
                    };
                    device.CreateShaderResourceView(resource, Some(&desc), handle);
                }
                ViewDesc::BufferSrv { first_element, num_elements, stride } => {
                    // stride 为 0 时是 ByteAddressBuffer
                    let (format, flags) = if stride == 0 {
                        (DXGI_FORMAT_R32_TYPELESS, D3D12_BUFFER_SRV_FLAG_RAW)
                    } else {
                        (DXGI_FORMAT_UNKNOWN, D3D12_BUFFER_SRV_FLAG_NONE)
                    };
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: format,
                        ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_SRV {
                                FirstElement: first_element,
                                NumElements: num_elements,
                                StructureByteStride: stride,
                                Flags: flags,
                            },
                        },
                    };
                    device.CreateShaderResourceView(resource, Some(&desc), handle);
                }
                ViewDesc::TextureUav { format, mip_slice } => {
                    let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                        Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_UAV { MipSlice: mip_slice as u32, PlaneSlice: 0 },
                        },
                    };
                    device.CreateUnorderedAccessView(resource, None::<&ID3D12Resource>, Some(&desc), handle);
                }
                ViewDesc::BufferUav { first_element, num_elements, stride } => {
                    let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                        Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_UAV {
                                FirstElement: first_element,
                                NumElements: num_elements,
                                StructureByteStride: stride,
                                CounterOffsetInBytes: 0,
                                Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                            },
                        },
                    };
                    device.CreateUnorderedAccessView(resource, None::<&ID3D12Resource>, Some(&desc), handle);
                }
                ViewDesc::Cbv { offset, size } => {
                    let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                        BufferLocation: resource.GetGPUVirtualAddress() + offset,
                        SizeInBytes: size,
                    };
                    device.CreateConstantBufferView(Some(&desc), handle);
                }
                ViewDesc::Rtv { format } => {
                    let desc = D3D12_RENDER_TARGET_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                        Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_RTV { MipSlice: 0, PlaneSlice: 0 },
                        },
                    };
                    device.CreateRenderTargetView(resource, Some(&desc), handle);
                }
                ViewDesc::Dsv { format } => {
                    let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                        Flags: D3D12_DSV_FLAG_NONE,
                        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                        },
                    };
                    device.CreateDepthStencilView(resource, Some(&desc), handle);
                }
            }
        }
        Ok(())
    }
}
