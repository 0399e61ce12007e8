//! 把录制的 `Command` 序列翻译成 D3D12 命令列表调用

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::Result;
use crate::gfx::command::Command;
use crate::gfx::types::{TextureFootprint, TransitionBarrier};

use super::{convert, Dx12Backend};

impl Dx12Backend {
    pub(super) fn record(&self, list: &ID3D12GraphicsCommandList, commands: &[Command]) -> Result<()> {
        for command in commands {
            unsafe { self.record_one(list, command)? };
        }
        Ok(())
    }

    unsafe fn record_one(&self, list: &ID3D12GraphicsCommandList, command: &Command) -> Result<()> {
        match command {
            Command::Barrier(barriers) => {
                let native = barriers
                    .iter()
                    .map(|barrier| self.transition(barrier))
                    .collect::<Result<Vec<_>>>()?;
                list.ResourceBarrier(&native);
            }
            Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                list.CopyBufferRegion(self.resource(*dst)?, *dst_offset, self.resource(*src)?, *src_offset, *size);
            }
            Command::CopyBufferToTexture { dst, subresource, src, src_offset, footprint } => {
                let dst = subresource_location(self.resource(*dst)?, *subresource);
                let src = footprint_location(self.resource(*src)?, *src_offset, footprint);
                list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            }
            Command::CopyTextureToBuffer { dst, dst_offset, src, subresource, footprint } => {
                let dst = footprint_location(self.resource(*dst)?, *dst_offset, footprint);
                let src = subresource_location(self.resource(*src)?, *subresource);
                list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            }
            Command::ClearRenderTarget { rtv, color, .. } => {
                list.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: *rtv }, color, None);
            }
            Command::ClearDepth { dsv, depth, .. } => {
                list.ClearDepthStencilView(
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: *dsv },
                    D3D12_CLEAR_FLAG_DEPTH,
                    *depth,
                    0,
                    None,
                );
            }
            Command::SetDescriptorHeap(heap) => {
                list.SetDescriptorHeaps(&[Some(self.heap(*heap)?.heap().clone())]);
            }
            Command::SetRootSignature(id) => {
                list.SetGraphicsRootSignature(self.root_signature(*id)?);
            }
            Command::SetPipeline(id) => {
                list.SetPipelineState(self.pipeline(*id)?);
            }
            Command::SetRootConstants { parameter, values } => {
                list.SetGraphicsRoot32BitConstants(*parameter, values.len() as u32, values.as_ptr() as *const _, 0);
            }
            Command::SetRootConstantBuffer { parameter, resource, offset } => {
                let address = self.resource(*resource)?.GetGPUVirtualAddress() + offset;
                list.SetGraphicsRootConstantBufferView(*parameter, address);
            }
            Command::SetRenderTargets { rtvs, dsv } => {
                let handles: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> =
                    rtvs.iter().map(|ptr| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: *ptr }).collect();
                let depth = dsv.map(|ptr| D3D12_CPU_DESCRIPTOR_HANDLE { ptr });
                list.OMSetRenderTargets(
                    handles.len() as u32,
                    (!handles.is_empty()).then(|| handles.as_ptr()),
                    false,
                    depth.as_ref().map(|d| d as *const _),
                );
            }
            Command::SetViewport(viewport) => {
                list.RSSetViewports(&[D3D12_VIEWPORT {
                    TopLeftX: viewport.x,
                    TopLeftY: viewport.y,
                    Width: viewport.width,
                    Height: viewport.height,
                    MinDepth: viewport.min_depth,
                    MaxDepth: viewport.max_depth,
                }]);
            }
            Command::SetScissor(rect) => {
                list.RSSetScissorRects(&[RECT {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                }]);
            }
            Command::SetTopology(topology) => {
                list.IASetPrimitiveTopology(convert::topology(*topology));
            }
            Command::SetIndexBuffer(view) => match view.resource {
                Some(resource) => {
                    list.IASetIndexBuffer(Some(&D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: self.resource(resource)?.GetGPUVirtualAddress(),
                        SizeInBytes: view.size_bytes,
                        Format: DXGI_FORMAT_R32_UINT,
                    }));
                }
                None => list.IASetIndexBuffer(None),
            },
            Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                list.DrawInstanced(*vertex_count, *instance_count, *first_vertex, *first_instance);
            }
            Command::DrawIndexed { index_count, instance_count, first_index, base_vertex, first_instance } => {
                list.DrawIndexedInstanced(*index_count, *instance_count, *first_index, *base_vertex, *first_instance);
            }
        }
        Ok(())
    }

    fn transition(&self, barrier: &TransitionBarrier) -> Result<D3D12_RESOURCE_BARRIER> {
        let resource = self.resource(barrier.resource)?;
        Ok(D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    // 借用指针，不增加引用计数
                    pResource: unsafe { std::mem::transmute_copy(resource) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: convert::resource_state(barrier.before),
                    StateAfter: convert::resource_state(barrier.after),
                }),
            },
        })
    }
}

fn subresource_location(resource: &ID3D12Resource, subresource: u32) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: subresource },
    }
}

fn footprint_location(resource: &ID3D12Resource, offset: u64, footprint: &TextureFootprint) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: offset,
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    Format: convert::format(footprint.format),
                    Width: footprint.width,
                    Height: footprint.height,
                    Depth: 1,
                    RowPitch: footprint.row_pitch,
                },
            },
        },
    }
}
