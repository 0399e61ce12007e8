//! DirectX 12 后端
//!
//! 把 `GpuBackend` 原语翻译成 D3D12 / DXGI 调用：
//! - 资源通过 `gpu-allocator` 子分配，资源与分配一一绑定
//! - 每种队列一个命令列表，提交时按录制的命令流重放
//! - 图形队列上只有一个 fence，帧同步策略由核心层决定

mod commands;
mod convert;
mod descriptor;
mod pipeline;

use std::collections::HashMap;
use std::iter::once;
use std::time::Duration;

use gpu_allocator::d3d12::{
    Allocator, AllocatorCreateDesc, ID3D12DeviceVersion, Resource, ResourceCategory, ResourceCreateDesc,
    ResourceStateOrBarrierLayout, ResourceType,
};
use gpu_allocator::MemoryLocation;
use tracing::{debug, info, warn};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

use crate::core::config::FeatureLevel;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::gfx::command::Command;
use crate::gfx::types::{
    AdapterInfo, AllocatorId, DescriptorHeapInfo, DescriptorHeapKind, DeviceCapabilities, GraphicsPipelineDesc,
    MemoryPlacement, MeshShaderTier, PipelineId, QueueKind, RawHeapId, RawResourceId, RaytracingTier, ResourceBindingTier,
    ResourceDesc, ResourceDimension, ResourceFlags, ResourceState, RootSignatureDesc, RootSignatureId, SurfaceTarget,
    SwapChainDesc, ViewDesc,
};
use crate::verify;

use descriptor::Dx12DescriptorHeap;

/// 后端持有的资源
enum NativeResource {
    /// 由 gpu-allocator 子分配
    Allocated(Resource),
    /// 交换链后备缓冲，由 DXGI 持有内存
    BackBuffer(ID3D12Resource),
}

impl NativeResource {
    fn resource(&self) -> &ID3D12Resource {
        match self {
            NativeResource::Allocated(resource) => resource.resource(),
            NativeResource::BackBuffer(resource) => resource,
        }
    }
}

struct Dx12SwapChain {
    swap_chain: IDXGISwapChain3,
    desc: SwapChainDesc,
    buffers: Vec<RawResourceId>,
}

/// DirectX 12 后端
pub struct Dx12Backend {
    factory: IDXGIFactory4,
    adapters: Vec<IDXGIAdapter1>,
    debug_layer: bool,

    device: Option<ID3D12Device>,
    feature_level: FeatureLevel,
    allocator: Option<Allocator>,

    queues: HashMap<QueueKind, ID3D12CommandQueue>,
    command_lists: HashMap<QueueKind, ID3D12GraphicsCommandList>,
    command_allocators: Vec<(ID3D12CommandAllocator, QueueKind)>,

    heaps: Vec<Dx12DescriptorHeap>,
    resources: HashMap<RawResourceId, NativeResource>,
    next_resource: u64,
    root_signatures: Vec<ID3D12RootSignature>,
    pipelines: Vec<ID3D12PipelineState>,

    fence: Option<ID3D12Fence>,
    fence_event: HANDLE,

    swapchain: Option<Dx12SwapChain>,
}

impl Dx12Backend {
    /// 创建 DXGI 工厂；`debug_layer` 为真时先启用 D3D12 调试层
    pub fn new(debug_layer: bool) -> Result<Self> {
        unsafe {
            if debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(e) => warn!(error = ?e, "Failed to enable DX12 Debug Layer"),
                }
            }

            let flags = if debug_layer { DXGI_CREATE_FACTORY_DEBUG } else { DXGI_CREATE_FACTORY_FLAGS(0) };
            let factory: IDXGIFactory4 = verify!(CreateDXGIFactory2(flags), "CreateDXGIFactory2")?;

            Ok(Self {
                factory,
                adapters: Vec::new(),
                debug_layer,
                device: None,
                feature_level: FeatureLevel::Level11_0,
                allocator: None,
                queues: HashMap::new(),
                command_lists: HashMap::new(),
                command_allocators: Vec::new(),
                heaps: Vec::new(),
                resources: HashMap::new(),
                next_resource: 1,
                root_signatures: Vec::new(),
                pipelines: Vec::new(),
                fence: None,
                fence_event: HANDLE::default(),
                swapchain: None,
            })
        }
    }

    fn device(&self) -> Result<&ID3D12Device> {
        self.device
            .as_ref()
            .ok_or_else(|| GraphicsError::DeviceCreation("Device has not been created".into()).into())
    }

    fn fence(&self) -> Result<&ID3D12Fence> {
        self.fence
            .as_ref()
            .ok_or_else(|| GraphicsError::DeviceCreation("Fence has not been created".into()).into())
    }

    fn queue(&self, kind: QueueKind) -> Result<&ID3D12CommandQueue> {
        self.queues
            .get(&kind)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Queue {:?} was not created", kind)).into())
    }

    pub(super) fn resource(&self, id: RawResourceId) -> Result<&ID3D12Resource> {
        self.resources
            .get(&id)
            .map(NativeResource::resource)
            .ok_or_else(|| GraphicsError::StaleHandle { kind: "resource" }.into())
    }

    pub(super) fn heap(&self, id: RawHeapId) -> Result<&Dx12DescriptorHeap> {
        self.heaps
            .get(id.0 as usize)
            .ok_or_else(|| GraphicsError::StaleHandle { kind: "descriptor heap" }.into())
    }

    pub(super) fn root_signature(&self, id: RootSignatureId) -> Result<&ID3D12RootSignature> {
        self.root_signatures
            .get(id.0 as usize)
            .ok_or_else(|| GraphicsError::StaleHandle { kind: "root signature" }.into())
    }

    pub(super) fn pipeline(&self, id: PipelineId) -> Result<&ID3D12PipelineState> {
        self.pipelines
            .get(id.0 as usize)
            .ok_or_else(|| GraphicsError::StaleHandle { kind: "pipeline" }.into())
    }

    fn insert_resource(&mut self, resource: NativeResource) -> RawResourceId {
        let id = RawResourceId(self.next_resource);
        self.next_resource += 1;
        self.resources.insert(id, resource);
        id
    }

    fn back_buffers(&mut self, swap_chain: &IDXGISwapChain3, count: u32) -> Result<Vec<RawResourceId>> {
        let mut buffers = Vec::with_capacity(count as usize);
        for i in 0..count {
            let buffer: ID3D12Resource = unsafe { verify!(swap_chain.GetBuffer(i), "IDXGISwapChain::GetBuffer")? };
            set_name(&buffer, &format!("Back Buffer {}", i));
            buffers.push(self.insert_resource(NativeResource::BackBuffer(buffer)));
        }
        Ok(buffers)
    }

    fn map_cpu_visible(&self, id: RawResourceId, offset: u64, len: usize, read: bool) -> Result<*mut u8> {
        let resource = self.resource(id)?;
        let mut data = std::ptr::null_mut();
        // 只写映射声明空读取区间
        let range = if read {
            D3D12_RANGE { Begin: offset as usize, End: offset as usize + len }
        } else {
            D3D12_RANGE::default()
        };
        unsafe {
            verify!(resource.Map(0, Some(&range), Some(&mut data)), "ID3D12Resource::Map")?;
        }
        Ok(unsafe { (data as *mut u8).add(offset as usize) })
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        // 资源必须先于分配器释放
        if let Some(allocator) = self.allocator.as_mut() {
            for (_, resource) in self.resources.drain() {
                if let NativeResource::Allocated(resource) = resource {
                    if let Err(e) = allocator.free_resource(resource) {
                        warn!(error = %e, "Failed to free resource on shutdown");
                    }
                }
            }
        }
        if !self.fence_event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.fence_event);
            }
        }
    }
}

/// 为 D3D12 对象设置调试名称
pub(crate) fn set_name<T: Interface>(object: &T, label: &str) {
    if let Ok(object) = object.cast::<ID3D12Object>() {
        let wide: Vec<u16> = label.encode_utf16().chain(once(0)).collect();
        unsafe {
            let _ = object.SetName(PCWSTR(wide.as_ptr()));
        }
    }
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

fn queue_type(kind: QueueKind) -> D3D12_COMMAND_LIST_TYPE {
    match kind {
        QueueKind::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueKind::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueKind::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn memory_location(placement: MemoryPlacement) -> MemoryLocation {
    match placement {
        MemoryPlacement::DeviceLocal | MemoryPlacement::CopyDestination => MemoryLocation::GpuOnly,
        MemoryPlacement::UploadVisible => MemoryLocation::CpuToGpu,
        MemoryPlacement::Readback => MemoryLocation::GpuToCpu,
    }
}

fn resource_category(desc: &ResourceDesc) -> ResourceCategory {
    match desc.dimension {
        ResourceDimension::Buffer => ResourceCategory::Buffer,
        ResourceDimension::Texture2D if desc.flags.intersects(ResourceFlags::RENDER_TARGET | ResourceFlags::DEPTH_STENCIL) => {
            ResourceCategory::RtvDsvTexture
        }
        ResourceDimension::Texture2D => ResourceCategory::OtherTexture,
    }
}

/// 按适配器所能支持的最高等级从高到低尝试
unsafe fn max_feature_level(adapter: &IDXGIAdapter1) -> Option<FeatureLevel> {
    FeatureLevel::ALL.iter().rev().copied().find(|level| {
        D3D12CreateDevice(adapter, convert::feature_level(*level), std::ptr::null_mut::<Option<ID3D12Device>>()).is_ok()
    })
}

unsafe fn feature_data<T: Default>(device: &ID3D12Device, feature: D3D12_FEATURE) -> Option<T> {
    let mut data = T::default();
    device
        .CheckFeatureSupport(feature, &mut data as *mut T as *mut _, std::mem::size_of::<T>() as u32)
        .ok()
        .map(|_| data)
}

impl GpuBackend for Dx12Backend {
    fn name(&self) -> &'static str {
        "DirectX 12"
    }

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterInfo>> {
        self.adapters.clear();
        let mut infos = Vec::new();
        unsafe {
            let mut index = 0;
            while let Ok(adapter) = self.factory.EnumAdapters1(index) {
                index += 1;
                let desc = verify!(adapter.GetDesc1(), "IDXGIAdapter1::GetDesc1")?;
                let Some(max_level) = max_feature_level(&adapter) else {
                    debug!(name = %adapter_name(&desc), "Adapter does not support D3D12, skipped");
                    continue;
                };
                infos.push(AdapterInfo {
                    index: self.adapters.len() as u32,
                    name: adapter_name(&desc),
                    vendor_id: desc.VendorId,
                    device_id: desc.DeviceId,
                    dedicated_video_memory: desc.DedicatedVideoMemory as u64,
                    max_feature_level: max_level,
                    is_software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
                });
                self.adapters.push(adapter);
            }
        }
        Ok(infos)
    }

    fn create_device(&mut self, adapter: &AdapterInfo, feature_level: FeatureLevel) -> Result<()> {
        let native = self
            .adapters
            .get(adapter.index as usize)
            .ok_or_else(|| GraphicsError::AdapterNotFound(adapter.name.clone()))?;

        unsafe {
            let mut device: Option<ID3D12Device> = None;
            verify!(
                D3D12CreateDevice(native, convert::feature_level(feature_level), &mut device),
                "D3D12CreateDevice"
            )?;
            let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".into()))?;
            set_name(&device, "Device");

            let allocator = Allocator::new(&AllocatorCreateDesc {
                device: ID3D12DeviceVersion::Device(device.clone()),
                debug_settings: Default::default(),
                allocation_sizes: Default::default(),
            })
            .map_err(|e| GraphicsError::DeviceCreation(format!("GPU allocator: {}", e)))?;

            let fence: ID3D12Fence = verify!(device.CreateFence(0, D3D12_FENCE_FLAG_NONE), "CreateFence")?;
            self.fence_event = verify!(CreateEventW(None, false, false, None), "CreateEventW")?;

            self.fence = Some(fence);
            self.allocator = Some(allocator);
            self.device = Some(device);
            self.feature_level = feature_level;
        }

        info!(
            adapter = %adapter.name,
            feature_level = feature_level.name(),
            debug_layer = self.debug_layer,
            "D3D12 Device created"
        );
        Ok(())
    }

    fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let device = self.device()?;
        unsafe {
            let options: D3D12_FEATURE_DATA_D3D12_OPTIONS =
                feature_data(device, D3D12_FEATURE_D3D12_OPTIONS).unwrap_or_default();
            let options1: D3D12_FEATURE_DATA_D3D12_OPTIONS1 =
                feature_data(device, D3D12_FEATURE_D3D12_OPTIONS1).unwrap_or_default();
            let options5: D3D12_FEATURE_DATA_D3D12_OPTIONS5 =
                feature_data(device, D3D12_FEATURE_D3D12_OPTIONS5).unwrap_or_default();
            let options7: D3D12_FEATURE_DATA_D3D12_OPTIONS7 =
                feature_data(device, D3D12_FEATURE_D3D12_OPTIONS7).unwrap_or_default();

            // 运行时不认识的着色器模型会让查询失败，需要逐级降低
            let shader_model = [D3D_SHADER_MODEL_6_7, D3D_SHADER_MODEL_6_6, D3D_SHADER_MODEL_6_5, D3D_SHADER_MODEL_6_0]
                .iter()
                .find_map(|&highest| {
                    let mut data = D3D12_FEATURE_DATA_SHADER_MODEL { HighestShaderModel: highest };
                    device
                        .CheckFeatureSupport(
                            D3D12_FEATURE_SHADER_MODEL,
                            &mut data as *mut _ as *mut _,
                            std::mem::size_of::<D3D12_FEATURE_DATA_SHADER_MODEL>() as u32,
                        )
                        .ok()
                        .map(|_| data.HighestShaderModel.0)
                })
                .unwrap_or(D3D_SHADER_MODEL_5_1.0);

            Ok(DeviceCapabilities {
                feature_level: self.feature_level,
                shader_model: ((shader_model >> 4) as u8, (shader_model & 0xF) as u8),
                wave_ops: options1.WaveOps.as_bool(),
                wave_lane_count_min: options1.WaveLaneCountMin,
                raytracing_tier: match options5.RaytracingTier {
                    D3D12_RAYTRACING_TIER_1_1 => RaytracingTier::Tier1_1,
                    D3D12_RAYTRACING_TIER_1_0 => RaytracingTier::Tier1_0,
                    _ => RaytracingTier::NotSupported,
                },
                mesh_shader_tier: if options7.MeshShaderTier == D3D12_MESH_SHADER_TIER_1 {
                    MeshShaderTier::Tier1
                } else {
                    MeshShaderTier::NotSupported
                },
                resource_binding_tier: match options.ResourceBindingTier {
                    D3D12_RESOURCE_BINDING_TIER_3 => ResourceBindingTier::Tier3,
                    D3D12_RESOURCE_BINDING_TIER_2 => ResourceBindingTier::Tier2,
                    _ => ResourceBindingTier::Tier1,
                },
            })
        }
    }

    fn create_queue(&mut self, kind: QueueKind) -> Result<()> {
        let device = self.device()?;
        let queue: ID3D12CommandQueue = unsafe {
            verify!(
                device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: queue_type(kind),
                    Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                    ..Default::default()
                }),
                "CreateCommandQueue"
            )?
        };
        set_name(&queue, &format!("{:?} Queue", kind));
        self.queues.insert(kind, queue);
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        label: &str,
    ) -> Result<(RawHeapId, DescriptorHeapInfo)> {
        let heap = Dx12DescriptorHeap::new(self.device()?, kind, capacity, label)?;
        let info = heap.info();
        self.heaps.push(heap);
        Ok((RawHeapId(self.heaps.len() as u32 - 1), info))
    }

    fn write_view(&mut self, heap: RawHeapId, index: u32, resource: RawResourceId, view: &ViewDesc) -> Result<()> {
        self.heap(heap)?.write_view(self.device()?, index, self.resource(resource)?, view)
    }

    fn create_resource(
        &mut self,
        desc: &ResourceDesc,
        placement: MemoryPlacement,
        initial_state: ResourceState,
    ) -> Result<RawResourceId> {
        let native_desc = convert::resource_desc(desc);
        let clear_value = match desc.dimension {
            ResourceDimension::Texture2D => convert::clear_value(desc),
            ResourceDimension::Buffer => None,
        };
        let allocator = self
            .allocator
            .as_mut()
            .ok_or_else(|| GraphicsError::DeviceCreation("Device has not been created".into()))?;

        let resource = allocator
            .create_resource(&ResourceCreateDesc {
                name: &desc.label,
                memory_location: memory_location(placement),
                resource_category: resource_category(desc),
                resource_desc: &native_desc,
                clear_value: clear_value.as_ref(),
                initial_state_or_layout: ResourceStateOrBarrierLayout::ResourceState(convert::resource_state(
                    initial_state,
                )),
                resource_type: &ResourceType::Placed,
            })
            .map_err(|e| GraphicsError::ResourceCreation(format!("'{}' ({}): {}", desc.label, placement.name(), e)))?;

        set_name(resource.resource(), &desc.label);
        Ok(self.insert_resource(NativeResource::Allocated(resource)))
    }

    fn destroy_resource(&mut self, resource: RawResourceId) {
        match self.resources.remove(&resource) {
            Some(NativeResource::Allocated(allocated)) => {
                if let Some(allocator) = self.allocator.as_mut() {
                    if let Err(e) = allocator.free_resource(allocated) {
                        warn!(%resource, error = %e, "Failed to free resource");
                    }
                }
            }
            Some(NativeResource::BackBuffer(_)) => {}
            None => warn!(%resource, "Destroying unknown resource"),
        }
    }

    fn write_buffer(&mut self, resource: RawResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self.map_cpu_visible(resource, offset, data.len(), false)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            self.resource(resource)?.Unmap(0, None);
        }
        Ok(())
    }

    fn read_buffer(&mut self, resource: RawResourceId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let ptr = self.map_cpu_visible(resource, offset, len, true)?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), len);
            self.resource(resource)?.Unmap(0, Some(&D3D12_RANGE::default()));
        }
        Ok(out)
    }

    fn create_command_allocator(&mut self, queue: QueueKind) -> Result<AllocatorId> {
        let allocator: ID3D12CommandAllocator =
            unsafe { verify!(self.device()?.CreateCommandAllocator(queue_type(queue)), "CreateCommandAllocator")? };
        self.command_allocators.push((allocator, queue));
        Ok(AllocatorId(self.command_allocators.len() as u32 - 1))
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> Result<()> {
        let (native, _) = self
            .command_allocators
            .get(allocator.0 as usize)
            .ok_or(GraphicsError::StaleHandle { kind: "command allocator" })?;
        unsafe { verify!(native.Reset(), "ID3D12CommandAllocator::Reset") }
    }

    fn execute(&mut self, queue: QueueKind, allocator: AllocatorId, commands: &[Command]) -> Result<()> {
        let (native_allocator, allocator_queue) = self
            .command_allocators
            .get(allocator.0 as usize)
            .cloned()
            .ok_or(GraphicsError::StaleHandle { kind: "command allocator" })?;
        if allocator_queue != queue {
            return Err(GraphicsError::CommandExecution(format!(
                "Allocator for {:?} queue submitted to {:?} queue",
                allocator_queue, queue
            ))
            .into());
        }

        let list = match self.command_lists.get(&queue) {
            Some(list) => {
                unsafe { verify!(list.Reset(&native_allocator, None), "ID3D12GraphicsCommandList::Reset")? };
                list.clone()
            }
            None => {
                // 新建的命令列表处于打开状态
                let list: ID3D12GraphicsCommandList = unsafe {
                    verify!(
                        self.device()?.CreateCommandList(0, queue_type(queue), &native_allocator, None),
                        "CreateCommandList"
                    )?
                };
                set_name(&list, &format!("{:?} Command List", queue));
                self.command_lists.insert(queue, list.clone());
                list
            }
        };

        self.record(&list, commands)?;
        unsafe {
            verify!(list.Close(), "ID3D12GraphicsCommandList::Close")?;
            let submitted: ID3D12CommandList = verify!(list.cast(), "ID3D12GraphicsCommandList::cast")?;
            self.queue(queue)?.ExecuteCommandLists(&[Some(submitted)]);
        }
        Ok(())
    }

    fn signal(&mut self, queue: QueueKind, value: u64) -> Result<()> {
        unsafe { verify!(self.queue(queue)?.Signal(self.fence()?, value), "ID3D12CommandQueue::Signal") }
    }

    fn completed_value(&self) -> u64 {
        self.fence.as_ref().map_or(0, |fence| unsafe { fence.GetCompletedValue() })
    }

    fn wait_for_value(&mut self, value: u64, timeout: Option<Duration>) -> Result<()> {
        let fence = self.fence()?;
        unsafe {
            if fence.GetCompletedValue() >= value {
                return Ok(());
            }
            verify!(fence.SetEventOnCompletion(value, self.fence_event), "ID3D12Fence::SetEventOnCompletion")?;
            let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u32::MAX as u128 - 1) as u32);
            if WaitForSingleObject(self.fence_event, millis) == WAIT_TIMEOUT {
                return Err(GraphicsError::FenceTimeout {
                    value,
                    completed: fence.GetCompletedValue(),
                    timeout_ms: millis as u64,
                }
                .into());
            }
        }
        Ok(())
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId> {
        let root_signature = pipeline::create_root_signature(self.device()?, desc)?;
        self.root_signatures.push(root_signature);
        Ok(RootSignatureId(self.root_signatures.len() as u32 - 1))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineId> {
        let root_signature = self.root_signature(desc.root_signature)?;
        let pipeline = pipeline::create_graphics_pipeline(self.device()?, root_signature, desc)?;
        self.pipelines.push(pipeline);
        Ok(PipelineId(self.pipelines.len() as u32 - 1))
    }

    fn create_swapchain(&mut self, surface: SurfaceTarget, desc: &SwapChainDesc) -> Result<Vec<RawResourceId>> {
        let SurfaceTarget::Hwnd(hwnd) = surface else {
            return Err(GraphicsError::SwapchainError("DX12 swap chain needs a window handle".into()).into());
        };
        let queue = self.queue(QueueKind::Graphics)?;

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: convert::format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, ..Default::default() },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain3 = unsafe {
            let swap_chain: IDXGISwapChain1 = verify!(
                self.factory.CreateSwapChainForHwnd(
                    queue,
                    HWND(hwnd as *mut core::ffi::c_void),
                    &swap_chain_desc,
                    None,
                    None
                ),
                "CreateSwapChainForHwnd"
            )?;
            verify!(swap_chain.cast(), "IDXGISwapChain1::cast")?
        };

        let buffers = self.back_buffers(&swap_chain, desc.buffer_count)?;
        info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Swap chain created");
        self.swapchain = Some(Dx12SwapChain { swap_chain, desc: *desc, buffers: buffers.clone() });
        Ok(buffers)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<Vec<RawResourceId>> {
        let mut swapchain = self
            .swapchain
            .take()
            .ok_or_else(|| GraphicsError::SwapchainError("Swap chain has not been created".into()))?;

        // ResizeBuffers 要求没有任何对后备缓冲的引用
        for buffer in swapchain.buffers.drain(..) {
            self.resources.remove(&buffer);
        }
        unsafe {
            verify!(
                swapchain.swap_chain.ResizeBuffers(
                    swapchain.desc.buffer_count,
                    width,
                    height,
                    DXGI_FORMAT_UNKNOWN,
                    DXGI_SWAP_CHAIN_FLAG(0)
                ),
                "IDXGISwapChain::ResizeBuffers"
            )?;
        }
        swapchain.desc.width = width;
        swapchain.desc.height = height;
        swapchain.buffers = self.back_buffers(&swapchain.swap_chain, swapchain.desc.buffer_count)?;

        let buffers = swapchain.buffers.clone();
        self.swapchain = Some(swapchain);
        Ok(buffers)
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain
            .as_ref()
            .map_or(0, |swapchain| unsafe { swapchain.swap_chain.GetCurrentBackBufferIndex() })
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| GraphicsError::SwapchainError("Swap chain has not been created".into()))?;
        let interval = if vsync { 1 } else { 0 };
        unsafe { verify!(swapchain.swap_chain.Present(interval, DXGI_PRESENT(0)).ok(), "IDXGISwapChain::Present") }
    }
}
