//! 资源管理模块
//!
//! 设备上的资源包装：缓冲区、常量缓冲区、纹理、深度缓冲与渲染纹理。
//! 所有包装对象存放在 `Device` 的竞技场里，外部只持有带版本的类型化句柄；
//! 销毁是延迟的，资源和描述符在 GPU 完成最后一次使用后才真正释放。
//!
//! 着色器可见的视图都分配在共享的 CBV/SRV/UAV 堆中，着色器通过堆索引
//! 动态访问（bindless），因此 `srv_index()` 就是着色器看到的资源编号。

use tracing::{debug, warn};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{
    align_up, ClearValue, DescriptorHeapKind, Format, IndexBufferView, MemoryPlacement, RawResourceId,
    ResourceDesc, ResourceFlags, ResourceState, ViewDesc, CONSTANT_BUFFER_ALIGNMENT,
};

use super::arena::{BufferHandle, ConstantBufferHandle, DepthBufferHandle, RenderTextureHandle, TextureHandle};
use super::descriptor::DescriptorHandle;
use super::device::{Device, Retired};
use super::memory::AllocatedResource;

/// 缓冲区用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// 顶点数据，着色器按索引拉取
    Vertex,
    /// 32 位索引
    Index,
    /// 结构化数据
    Structured,
}

/// 缓冲区描述
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub usage: BufferUsage,
    /// 元素大小（字节）
    pub stride: u32,
    pub element_count: u32,
}

impl BufferDesc {
    pub fn vertex(label: impl Into<String>, stride: u32, element_count: u32) -> Self {
        Self { label: label.into(), usage: BufferUsage::Vertex, stride, element_count }
    }

    pub fn index(label: impl Into<String>, index_count: u32) -> Self {
        Self {
            label: label.into(),
            usage: BufferUsage::Index,
            stride: std::mem::size_of::<u32>() as u32,
            element_count: index_count,
        }
    }

    pub fn structured(label: impl Into<String>, stride: u32, element_count: u32) -> Self {
        Self { label: label.into(), usage: BufferUsage::Structured, stride, element_count }
    }

    pub fn size(&self) -> u64 {
        self.stride as u64 * self.element_count as u64
    }

    /// 上传完成后的稳态
    pub fn steady_state(&self) -> ResourceState {
        match self.usage {
            BufferUsage::Index => ResourceState::IndexBuffer,
            BufferUsage::Vertex | BufferUsage::Structured => ResourceState::AllShaderResource,
        }
    }
}

/// 设备本地缓冲区
#[derive(Debug)]
pub struct Buffer {
    resource: AllocatedResource,
    desc: BufferDesc,
    /// 顶点与结构化缓冲区的 SRV，索引缓冲区为空
    srv: DescriptorHandle,
}

impl Buffer {
    pub fn resource(&self) -> &AllocatedResource {
        &self.resource
    }

    pub fn id(&self) -> RawResourceId {
        self.resource.id()
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    pub fn size(&self) -> u64 {
        self.desc.size()
    }

    pub fn state(&self) -> ResourceState {
        self.desc.steady_state()
    }

    pub fn srv(&self) -> &DescriptorHandle {
        &self.srv
    }

    /// 着色器可见的堆索引
    pub fn srv_index(&self) -> Option<u32> {
        (!self.srv.is_null()).then(|| self.srv.index())
    }

    /// 索引缓冲视图
    ///
    /// 对非索引缓冲区调用时记录警告并返回空视图。
    pub fn index_buffer_view(&self) -> IndexBufferView {
        if self.desc.usage != BufferUsage::Index {
            warn!(buffer = %self.desc.label, usage = ?self.desc.usage, "Requested index buffer view of a non-index buffer");
            return IndexBufferView::default();
        }
        IndexBufferView {
            resource: Some(self.resource.id()),
            size_bytes: self.desc.size() as u32,
        }
    }

    pub(crate) fn into_retired(self) -> Vec<Retired> {
        vec![
            Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, self.srv),
            Retired::Resource(self.resource),
        ]
    }
}

/// 每帧一份拷贝的常量缓冲区
///
/// 常量数据每帧都会变化，而 GPU 可能仍在读取上一帧的数据，因此每个帧槽位
/// 持有独立的上传内存与 CBV。`update` 只写入当前槽位的拷贝。
#[derive(Debug)]
pub struct ConstantBuffer {
    label: String,
    /// 按 256 字节对齐后的大小
    size: u64,
    copies: Vec<AllocatedResource>,
    views: Vec<DescriptorHandle>,
}

impl ConstantBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 对齐后的大小
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn copy_count(&self) -> u32 {
        self.copies.len() as u32
    }

    fn check_slot(&self, slot: u32) -> Result<usize> {
        if slot as usize >= self.copies.len() {
            return Err(GraphicsError::ResourceCreation(format!(
                "Constant buffer '{}' has {} copies, slot {} is out of range",
                self.label,
                self.copies.len(),
                slot
            ))
            .into());
        }
        Ok(slot as usize)
    }

    /// 槽位的资源（用于根 CBV 绑定）
    pub fn resource_id(&self, slot: u32) -> Result<RawResourceId> {
        Ok(self.copies[self.check_slot(slot)?].id())
    }

    pub fn cbv(&self, slot: u32) -> Result<&DescriptorHandle> {
        Ok(&self.views[self.check_slot(slot)?])
    }

    pub(crate) fn into_retired(self) -> Vec<Retired> {
        let mut retired: Vec<Retired> = self
            .views
            .into_iter()
            .map(|view| Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, view))
            .collect();
        retired.extend(self.copies.into_iter().map(Retired::Resource));
        retired
    }
}

/// 纹理描述
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mip_levels: u16,
    pub array_size: u16,
    /// 立方体贴图（6 层）
    pub cube: bool,
    /// 额外创建 UAV
    pub unordered_access: bool,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: Format) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            mip_levels: 1,
            array_size: 1,
            cube: false,
            unordered_access: false,
        }
    }

    pub fn cube(label: impl Into<String>, size: u32, format: Format) -> Self {
        Self { array_size: 6, cube: true, ..Self::new(label, size, size, format) }
    }

    pub fn with_mip_levels(mut self, mip_levels: u16) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_unordered_access(mut self) -> Self {
        self.unordered_access = true;
        self
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(GraphicsError::ResourceCreation(format!("Texture '{}': {}", self.label, reason)).into())
        };
        if self.width == 0 || self.height == 0 {
            return invalid("zero extent");
        }
        if self.format == Format::Unknown || self.format.is_depth() {
            return invalid("format is not a color format");
        }
        if self.mip_levels == 0 || (1u32 << (self.mip_levels - 1).min(31)) > self.width.max(self.height) {
            return invalid("mip chain longer than the extent allows");
        }
        if self.cube && (self.array_size != 6 || self.width != self.height) {
            return invalid("cube maps need 6 square faces");
        }
        Ok(())
    }

    fn resource_desc(&self) -> ResourceDesc {
        let mut desc = ResourceDesc::texture_2d(self.label.clone(), self.width, self.height, self.format)
            .with_mip_levels(self.mip_levels)
            .with_array_size(self.array_size);
        if self.unordered_access {
            desc = desc.with_flags(ResourceFlags::UNORDERED_ACCESS);
        }
        desc
    }
}

/// 采样纹理
#[derive(Debug)]
pub struct Texture {
    resource: AllocatedResource,
    desc: TextureDesc,
    srv: DescriptorHandle,
    uav: Option<DescriptorHandle>,
}

impl Texture {
    pub fn resource(&self) -> &AllocatedResource {
        &self.resource
    }

    pub fn id(&self) -> RawResourceId {
        self.resource.id()
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn srv(&self) -> &DescriptorHandle {
        &self.srv
    }

    pub fn srv_index(&self) -> u32 {
        self.srv.index()
    }

    pub fn uav(&self) -> Option<&DescriptorHandle> {
        self.uav.as_ref()
    }

    pub(crate) fn into_retired(self) -> Vec<Retired> {
        let mut retired = vec![Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, self.srv)];
        if let Some(uav) = self.uav {
            retired.push(Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, uav));
        }
        retired.push(Retired::Resource(self.resource));
        retired
    }
}

/// 深度缓冲
///
/// 稳态为 `DepthWrite`。可选的 SRV 以 `R32Float` 读取深度。
#[derive(Debug)]
pub struct DepthBuffer {
    resource: AllocatedResource,
    dsv: DescriptorHandle,
    srv: Option<DescriptorHandle>,
}

impl DepthBuffer {
    pub fn id(&self) -> RawResourceId {
        self.resource.id()
    }

    pub fn dsv(&self) -> &DescriptorHandle {
        &self.dsv
    }

    pub fn srv(&self) -> Option<&DescriptorHandle> {
        self.srv.as_ref()
    }

    pub fn width(&self) -> u32 {
        self.resource.desc().width as u32
    }

    pub fn height(&self) -> u32 {
        self.resource.desc().height
    }

    pub(crate) fn into_retired(self) -> Vec<Retired> {
        let mut retired = vec![Retired::Descriptor(DescriptorHeapKind::Dsv, self.dsv)];
        if let Some(srv) = self.srv {
            retired.push(Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, srv));
        }
        retired.push(Retired::Resource(self.resource));
        retired
    }
}

/// 渲染纹理：RTV + SRV
///
/// 稳态为 `PixelShaderResource`，写入它的 Pass 负责 读→RT→读 的成对转换。
#[derive(Debug)]
pub struct RenderTexture {
    resource: AllocatedResource,
    rtv: DescriptorHandle,
    srv: DescriptorHandle,
    clear_color: [f32; 4],
}

impl RenderTexture {
    pub fn id(&self) -> RawResourceId {
        self.resource.id()
    }

    pub fn label(&self) -> &str {
        self.resource.label()
    }

    pub fn format(&self) -> Format {
        self.resource.desc().format
    }

    pub fn width(&self) -> u32 {
        self.resource.desc().width as u32
    }

    pub fn height(&self) -> u32 {
        self.resource.desc().height
    }

    pub fn rtv(&self) -> &DescriptorHandle {
        &self.rtv
    }

    pub fn srv(&self) -> &DescriptorHandle {
        &self.srv
    }

    pub fn srv_index(&self) -> u32 {
        self.srv.index()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn resource(&self) -> &AllocatedResource {
        &self.resource
    }

    pub(crate) fn into_retired(self) -> Vec<Retired> {
        vec![
            Retired::Descriptor(DescriptorHeapKind::Rtv, self.rtv),
            Retired::Descriptor(DescriptorHeapKind::CbvSrvUav, self.srv),
            Retired::Resource(self.resource),
        ]
    }
}

impl Device {
    /// 创建设备本地缓冲区并上传初始数据（上传并等待）
    pub fn create_buffer(&mut self, desc: BufferDesc, data: &[u8]) -> Result<BufferHandle> {
        if desc.size() == 0 || data.len() as u64 != desc.size() {
            return Err(GraphicsError::ResourceCreation(format!(
                "Buffer '{}' expects {} bytes, got {}",
                desc.label,
                desc.size(),
                data.len()
            ))
            .into());
        }

        let resource = self.allocate_resource(
            &ResourceDesc::buffer(desc.label.clone(), desc.size()),
            MemoryPlacement::CopyDestination,
            ResourceState::CopyDest,
        )?;
        if let Err(e) = self.upload_buffer_data(&resource, data, desc.steady_state()) {
            self.retire_resource(resource);
            return Err(e);
        }

        let srv = match desc.usage {
            BufferUsage::Index => DescriptorHandle::null(),
            BufferUsage::Vertex | BufferUsage::Structured => {
                let view = ViewDesc::BufferSrv { first_element: 0, num_elements: desc.element_count, stride: desc.stride };
                match self.create_view(DescriptorHeapKind::CbvSrvUav, resource.id(), &view) {
                    Ok(srv) => srv,
                    Err(e) => {
                        self.retire_resource(resource);
                        return Err(e);
                    }
                }
            }
        };

        debug!(buffer = %desc.label, usage = ?desc.usage, bytes = desc.size(), srv = srv.index(), "Buffer created");
        Ok(self.buffers.insert(Buffer { resource, desc, srv }))
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers.get(handle)
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let buffer = self.buffers.remove(handle)?;
        self.retire_all(buffer.into_retired());
        Ok(())
    }

    /// 创建每个帧槽位一份拷贝的常量缓冲区
    pub fn create_constant_buffer(&mut self, label: impl Into<String>, size: u64) -> Result<ConstantBufferHandle> {
        let label = label.into();
        let aligned = align_up(size.max(1), CONSTANT_BUFFER_ALIGNMENT);

        let mut cb = ConstantBuffer { label, size: aligned, copies: Vec::new(), views: Vec::new() };
        for slot in 0..self.frame_count() {
            let created = self
                .allocate_resource(
                    &ResourceDesc::buffer(format!("{} [{}]", cb.label, slot), aligned),
                    MemoryPlacement::UploadVisible,
                    ResourceState::GenericRead,
                )
                .and_then(|resource| {
                    let view = self.create_view(
                        DescriptorHeapKind::CbvSrvUav,
                        resource.id(),
                        &ViewDesc::Cbv { offset: 0, size: aligned as u32 },
                    );
                    cb.copies.push(resource);
                    cb.views.push(view?);
                    Ok(())
                });
            if let Err(e) = created {
                self.retire_all(cb.into_retired());
                return Err(e);
            }
        }

        debug!(constant_buffer = %cb.label, size = aligned, copies = cb.copies.len(), "Constant buffer created");
        Ok(self.constant_buffers.insert(cb))
    }

    pub fn constant_buffer(&self, handle: ConstantBufferHandle) -> Result<&ConstantBuffer> {
        self.constant_buffers.get(handle)
    }

    /// 写入槽位 `slot` 的拷贝，其他槽位不受影响
    pub fn update_constant_buffer(&mut self, handle: ConstantBufferHandle, slot: u32, data: &[u8]) -> Result<()> {
        let cb = self.constant_buffers.get(handle)?;
        if data.len() as u64 > cb.size {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} bytes do not fit constant buffer '{}' ({} bytes)",
                data.len(),
                cb.label,
                cb.size
            ))
            .into());
        }
        // 拷贝固定在上传内存中，可以直接映射写入
        let id = cb.resource_id(slot)?;
        self.backend_mut().write_buffer(id, 0, data)
    }

    /// `update_constant_buffer` 的类型化版本
    pub fn update_constants<T: bytemuck::Pod>(
        &mut self,
        handle: ConstantBufferHandle,
        slot: u32,
        value: &T,
    ) -> Result<()> {
        self.update_constant_buffer(handle, slot, bytemuck::bytes_of(value))
    }

    pub fn destroy_constant_buffer(&mut self, handle: ConstantBufferHandle) -> Result<()> {
        let cb = self.constant_buffers.remove(handle)?;
        self.retire_all(cb.into_retired());
        Ok(())
    }

    /// 创建纹理
    ///
    /// `subresources` 为每个子资源（面优先、mip 次之的顺序）的紧密排列数据；
    /// 为空时创建未初始化的纹理，直接处于 `PixelShaderResource`。
    pub fn create_texture(&mut self, desc: TextureDesc, subresources: &[&[u8]]) -> Result<TextureHandle> {
        desc.validate()?;
        let resource_desc = desc.resource_desc();

        let resource = if subresources.is_empty() {
            self.allocate_resource(&resource_desc, MemoryPlacement::DeviceLocal, ResourceState::PixelShaderResource)?
        } else {
            if subresources.len() as u32 != resource_desc.subresource_count() {
                return Err(GraphicsError::ResourceCreation(format!(
                    "Texture '{}' has {} subresources, got data for {}",
                    desc.label,
                    resource_desc.subresource_count(),
                    subresources.len()
                ))
                .into());
            }
            let resource =
                self.allocate_resource(&resource_desc, MemoryPlacement::CopyDestination, ResourceState::CopyDest)?;
            if let Err(e) = self.upload_texture_data(&resource, subresources, ResourceState::PixelShaderResource) {
                self.retire_resource(resource);
                return Err(e);
            }
            resource
        };

        let srv_view = ViewDesc::TextureSrv { format: desc.format, mip_levels: desc.mip_levels, cube: desc.cube };
        let srv = match self.create_view(DescriptorHeapKind::CbvSrvUav, resource.id(), &srv_view) {
            Ok(srv) => srv,
            Err(e) => {
                self.retire_resource(resource);
                return Err(e);
            }
        };

        let uav = if desc.unordered_access {
            let uav_view = ViewDesc::TextureUav { format: desc.format, mip_slice: 0 };
            match self.create_view(DescriptorHeapKind::CbvSrvUav, resource.id(), &uav_view) {
                Ok(uav) => Some(uav),
                Err(e) => {
                    self.retire_descriptor(DescriptorHeapKind::CbvSrvUav, srv);
                    self.retire_resource(resource);
                    return Err(e);
                }
            }
        } else {
            None
        };

        debug!(
            texture = %desc.label,
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            cube = desc.cube,
            srv = srv.index(),
            "Texture created"
        );
        Ok(self.textures.insert(Texture { resource, desc, srv, uav }))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&Texture> {
        self.textures.get(handle)
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<()> {
        let texture = self.textures.remove(handle)?;
        self.retire_all(texture.into_retired());
        Ok(())
    }

    /// 创建 `D32Float` 深度缓冲，稳态为 `DepthWrite`
    pub fn create_depth_buffer(
        &mut self,
        label: impl Into<String>,
        width: u32,
        height: u32,
        with_srv: bool,
    ) -> Result<DepthBufferHandle> {
        let desc = ResourceDesc::texture_2d(label, width.max(1), height.max(1), Format::D32Float)
            .with_flags(ResourceFlags::DEPTH_STENCIL)
            .with_clear_value(ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        let resource = self.allocate_resource(&desc, MemoryPlacement::DeviceLocal, ResourceState::DepthWrite)?;

        let dsv = match self.create_view(DescriptorHeapKind::Dsv, resource.id(), &ViewDesc::Dsv { format: Format::D32Float }) {
            Ok(dsv) => dsv,
            Err(e) => {
                self.retire_resource(resource);
                return Err(e);
            }
        };

        let srv = if with_srv {
            let view = ViewDesc::TextureSrv { format: Format::R32Float, mip_levels: 1, cube: false };
            match self.create_view(DescriptorHeapKind::CbvSrvUav, resource.id(), &view) {
                Ok(srv) => Some(srv),
                Err(e) => {
                    self.retire_descriptor(DescriptorHeapKind::Dsv, dsv);
                    self.retire_resource(resource);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(self.depth_buffers.insert(DepthBuffer { resource, dsv, srv }))
    }

    pub fn depth_buffer(&self, handle: DepthBufferHandle) -> Result<&DepthBuffer> {
        self.depth_buffers.get(handle)
    }

    pub fn destroy_depth_buffer(&mut self, handle: DepthBufferHandle) -> Result<()> {
        let depth = self.depth_buffers.remove(handle)?;
        self.retire_all(depth.into_retired());
        Ok(())
    }

    /// 创建渲染纹理，稳态为 `PixelShaderResource`
    pub fn create_render_texture(
        &mut self,
        label: impl Into<String>,
        width: u32,
        height: u32,
        format: Format,
        clear_color: [f32; 4],
    ) -> Result<RenderTextureHandle> {
        let desc = ResourceDesc::texture_2d(label, width.max(1), height.max(1), format)
            .with_flags(ResourceFlags::RENDER_TARGET)
            .with_clear_value(ClearValue::Color(clear_color));
        let resource = self.allocate_resource(&desc, MemoryPlacement::DeviceLocal, ResourceState::PixelShaderResource)?;

        let rtv = match self.create_view(DescriptorHeapKind::Rtv, resource.id(), &ViewDesc::Rtv { format }) {
            Ok(rtv) => rtv,
            Err(e) => {
                self.retire_resource(resource);
                return Err(e);
            }
        };
        let srv_view = ViewDesc::TextureSrv { format, mip_levels: 1, cube: false };
        let srv = match self.create_view(DescriptorHeapKind::CbvSrvUav, resource.id(), &srv_view) {
            Ok(srv) => srv,
            Err(e) => {
                self.retire_descriptor(DescriptorHeapKind::Rtv, rtv);
                self.retire_resource(resource);
                return Err(e);
            }
        };

        Ok(self.render_textures.insert(RenderTexture { resource, rtv, srv, clear_color }))
    }

    pub fn render_texture(&self, handle: RenderTextureHandle) -> Result<&RenderTexture> {
        self.render_textures.get(handle)
    }

    pub fn destroy_render_texture(&mut self, handle: RenderTextureHandle) -> Result<()> {
        let rt = self.render_textures.remove(handle)?;
        self.retire_all(rt.into_retired());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RenderError;
    use crate::gfx::types::TextureFootprint;
    use crate::renderer::test_support::test_device;

    #[test]
    fn test_vertex_buffer_gets_srv() {
        let mut device = test_device(2);
        let data = vec![1u8; 3 * 32];
        let handle = device.create_buffer(BufferDesc::vertex("triangle", 32, 3), &data).unwrap();

        let buffer = device.buffer(handle).unwrap();
        assert_eq!(buffer.srv_index(), Some(0));
        assert_eq!(buffer.state(), ResourceState::AllShaderResource);
        assert_eq!(device.tracker().state(buffer.id()), Some(ResourceState::AllShaderResource));
        assert!(buffer.index_buffer_view().is_empty());

        assert_eq!(device.memory().stats().live_resources, 1);
    }

    #[test]
    fn test_index_buffer_view() {
        let mut device = test_device(2);
        let indices: Vec<u32> = vec![0, 1, 2, 2, 1, 3];
        let handle = device
            .create_buffer(BufferDesc::index("quad", 6), bytemuck::cast_slice(&indices))
            .unwrap();

        let buffer = device.buffer(handle).unwrap();
        let view = buffer.index_buffer_view();
        assert_eq!(view.resource, Some(buffer.id()));
        assert_eq!(view.size_bytes, 24);
        assert_eq!(buffer.srv_index(), None);
        assert_eq!(buffer.state(), ResourceState::IndexBuffer);
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let mut device = test_device(2);
        assert!(device.create_buffer(BufferDesc::vertex("short", 16, 4), &[0u8; 32]).is_err());
    }

    #[test]
    fn test_constant_buffer_alignment() {
        let mut device = test_device(3);
        let handle = device.create_constant_buffer("camera", 200).unwrap();
        let cb = device.constant_buffer(handle).unwrap();
        assert_eq!(cb.size(), 256);
        assert_eq!(cb.copy_count(), 3);
        let indices: Vec<u32> = (0..3).map(|slot| cb.cbv(slot).unwrap().index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(cb.cbv(3).is_err());
    }

    #[test]
    fn test_constant_buffer_slots_are_isolated() {
        let mut device = test_device(2);
        let handle = device.create_constant_buffer("lights", 64).unwrap();

        device.update_constant_buffer(handle, 0, &[0xAA; 64]).unwrap();
        device.update_constant_buffer(handle, 1, &[0xBB; 64]).unwrap();
        // 再次写入槽位 0 不影响槽位 1
        device.update_constant_buffer(handle, 0, &[0xCC; 64]).unwrap();

        let cb = device.constant_buffers.get(handle).unwrap();
        let (slot0, slot1) = (cb.copies[0].id(), cb.copies[1].id());
        let backend = device.backend_mut();
        assert_eq!(backend.read_buffer(slot0, 0, 64).unwrap(), vec![0xCC; 64]);
        assert_eq!(backend.read_buffer(slot1, 0, 64).unwrap(), vec![0xBB; 64]);
    }

    #[test]
    fn test_constant_buffer_overflow() {
        let mut device = test_device(2);
        let handle = device.create_constant_buffer("small", 16).unwrap();
        assert!(device.update_constant_buffer(handle, 0, &[0u8; 300]).is_err());
        assert!(device.update_constant_buffer(handle, 5, &[0u8; 16]).is_err());
    }

    #[test]
    fn test_texture_upload_and_srv() {
        let mut device = test_device(2);
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        let handle = device
            .create_texture(TextureDesc::new("albedo", 4, 4, Format::Rgba8Unorm), &[&pixels])
            .unwrap();

        let (resource_desc, id) = {
            let texture = device.texture(handle).unwrap();
            assert_eq!(texture.srv_index(), 0);
            assert!(texture.uav().is_none());
            (texture.resource().desc().clone(), texture.id())
        };
        assert_eq!(device.tracker().state(id), Some(ResourceState::PixelShaderResource));
        assert_eq!(TextureFootprint::new(resource_desc.format, 4, 4).row_bytes(), 16);

        let texture = device.textures.remove(handle).unwrap();
        let bytes = device.read_back(texture.resource(), ResourceState::PixelShaderResource).unwrap();
        assert_eq!(bytes, pixels);
        device.retire_all(texture.into_retired());
    }

    #[test]
    fn test_cube_texture_validation() {
        let mut device = test_device(2);
        let mut bad = TextureDesc::cube("sky", 8, Format::Rgba16Float);
        bad.height = 4;
        assert!(device.create_texture(bad, &[]).is_err());

        let handle = device
            .create_texture(TextureDesc::cube("sky", 8, Format::Rgba16Float).with_unordered_access(), &[])
            .unwrap();
        let texture = device.texture(handle).unwrap();
        assert!(texture.desc().cube);
        assert_eq!(texture.uav().map(|u| u.index()), Some(1));
    }

    #[test]
    fn test_depth_buffer_views() {
        let mut device = test_device(2);
        let plain = device.create_depth_buffer("depth", 64, 32, false).unwrap();
        let sampled = device.create_depth_buffer("shadow", 64, 32, true).unwrap();

        let plain = device.depth_buffer(plain).unwrap();
        assert!(plain.srv().is_none());
        assert_eq!(plain.dsv().index(), 0);
        assert_eq!((plain.width(), plain.height()), (64, 32));
        assert_eq!(device.tracker().state(plain.id()), Some(ResourceState::DepthWrite));

        let sampled = device.depth_buffer(sampled).unwrap();
        assert_eq!(sampled.dsv().index(), 1);
        assert_eq!(sampled.srv().map(|s| s.index()), Some(0));
    }

    #[test]
    fn test_destroyed_handle_is_stale() {
        let mut device = test_device(2);
        let rt = device
            .create_render_texture("lighting", 16, 16, Format::Rgba16Float, [0.0; 4])
            .unwrap();
        let srv_index = device.render_texture(rt).unwrap().srv_index();
        device.destroy_render_texture(rt).unwrap();

        match device.render_texture(rt) {
            Err(RenderError::Graphics(GraphicsError::StaleHandle { kind })) => assert_eq!(kind, "render texture"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(device.destroy_render_texture(rt).is_err());

        // 描述符在 GPU 完成后回到空闲列表
        device.flush().unwrap();
        let next = device
            .create_render_texture("lighting", 16, 16, Format::Rgba16Float, [0.0; 4])
            .unwrap();
        assert_eq!(device.render_texture(next).unwrap().srv_index(), srv_index);
    }
}
