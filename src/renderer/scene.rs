//! 场景侧数据
//!
//! 渲染器不拥有场景：它通过 `Scene::visit_drawables` 遍历绘制项，
//! 从相机、灯光和天空盒读取每帧常量。这里定义这些协作者的数据形状，
//! 以及与 HLSL 常量缓冲区逐字节一致的 `#[repr(C)]` 常量结构。

use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::core::error::Result;
use crate::core::math::{matrix_to_array, strip_translation, Matrix4, Point3, Vector3};
use crate::geometry::{MeshData, Vertex};
use crate::gfx::types::{Format, IndexBufferView};

use super::arena::{BufferHandle, TextureHandle};
use super::device::Device;
use super::resource::{Buffer, BufferDesc, Texture, TextureDesc};

/// 材质中“无纹理”的堆索引
pub const NO_TEXTURE: u32 = u32::MAX;

/// 点光源上限
pub const MAX_POINT_LIGHTS: usize = 4;

/// 透视相机（右手坐标系）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vector3,
    pub target: Vector3,
    pub up: Vector3,
    /// 垂直视场角（弧度）
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vector3, target: Vector3, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vector3::y(),
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect,
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn view_matrix(&self) -> Matrix4 {
        Matrix4::look_at_rh(&Point3::from(self.position), &Point3::from(self.target), &self.up)
    }

    pub fn projection_matrix(&self) -> Matrix4 {
        Matrix4::new_perspective(self.aspect, self.fov_y, self.near, self.far)
    }

    pub fn view_projection(&self) -> Matrix4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// GBuffer/Light Pass 的相机常量
    pub fn constants(&self, width: u32, height: u32) -> CameraConstants {
        let view_projection = self.view_projection();
        CameraConstants {
            view: matrix_to_array(&self.view_matrix()),
            projection: matrix_to_array(&self.projection_matrix()),
            view_projection: matrix_to_array(&view_projection),
            inverse_view_projection: matrix_to_array(&view_projection.try_inverse().unwrap_or_else(Matrix4::identity)),
            position: self.position.into(),
            near: self.near,
            far: self.far,
            viewport: [width as f32, height as f32],
            _pad: 0.0,
        }
    }

    /// 天空 Pass 的常量：视图矩阵去掉平移，天空盒始终围绕相机
    pub fn sky_constants(&self) -> SkyConstants {
        SkyConstants {
            view_projection: matrix_to_array(&(self.projection_matrix() * strip_translation(&self.view_matrix()))),
        }
    }
}

/// 相机常量缓冲区布局
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraConstants {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub near: f32,
    pub far: f32,
    pub viewport: [f32; 2],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkyConstants {
    pub view_projection: [[f32; 4]; 4],
}

/// 点光源
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vector3,
    pub radius: f32,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// 方向光
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// 光线传播方向
    pub direction: Vector3,
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vector3::new(-0.3, -1.0, -0.4).normalize(),
            color: [1.0, 0.96, 0.9],
            intensity: 3.0,
        }
    }
}

/// 一帧的灯光：最多 4 个点光源和 1 个方向光
#[derive(Debug, Clone, Default)]
pub struct LightSet {
    pub points: Vec<PointLight>,
    pub directional: DirectionalLight,
}

impl LightSet {
    pub fn constants(&self) -> LightConstants {
        if self.points.len() > MAX_POINT_LIGHTS {
            warn!(count = self.points.len(), max = MAX_POINT_LIGHTS, "Extra point lights ignored");
        }

        let mut constants = LightConstants::zeroed();
        for (slot, light) in constants.points.iter_mut().zip(&self.points) {
            *slot = PointLightData {
                position: light.position.into(),
                radius: light.radius,
                color: light.color,
                intensity: light.intensity,
            };
        }
        constants.point_count = self.points.len().min(MAX_POINT_LIGHTS) as u32;
        constants.direction = self.directional.direction.normalize().into();
        constants.directional_intensity = self.directional.intensity;
        constants.directional_color = self.directional.color;
        constants
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightData {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// 灯光常量缓冲区布局
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightConstants {
    pub points: [PointLightData; MAX_POINT_LIGHTS],
    pub direction: [f32; 3],
    pub directional_intensity: f32,
    pub directional_color: [f32; 3],
    pub point_count: u32,
}

/// PBR 材质参数，编码为 16 个根常量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub metal_roughness_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub base_color_factor: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_factor: [f32; 3],
    pub alpha_cutoff: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_texture: None,
            normal_texture: None,
            metal_roughness_texture: None,
            emissive_texture: None,
            base_color_factor: [1.0; 4],
            metallic: 0.0,
            roughness: 0.5,
            emissive_factor: [0.0; 3],
            alpha_cutoff: 0.0,
        }
    }
}

impl Material {
    /// 根常量布局：4 个纹理索引、颜色、金属度、粗糙度、自发光、alpha 裁剪
    pub fn to_constants(&self) -> [u32; 16] {
        let index = |t: Option<u32>| t.unwrap_or(NO_TEXTURE);
        let f = f32::to_bits;
        [
            index(self.base_color_texture),
            index(self.normal_texture),
            index(self.metal_roughness_texture),
            index(self.emissive_texture),
            f(self.base_color_factor[0]),
            f(self.base_color_factor[1]),
            f(self.base_color_factor[2]),
            f(self.base_color_factor[3]),
            f(self.metallic),
            f(self.roughness),
            f(self.emissive_factor[0]),
            f(self.emissive_factor[1]),
            f(self.emissive_factor[2]),
            f(self.alpha_cutoff),
            0,
            0,
        ]
    }
}

/// 一个绘制项
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub world: Matrix4,
    /// 顶点缓冲区的 SRV 堆索引
    pub vertex_buffer: u32,
    pub base_vertex: u32,
    pub index_buffer: IndexBufferView,
    pub first_index: u32,
    pub index_count: u32,
    pub material: Material,
}

impl DrawItem {
    /// 世界矩阵，16 个根常量
    pub fn transform_constants(&self) -> [u32; 16] {
        let columns = matrix_to_array(&self.world);
        let mut out = [0u32; 16];
        for (word, value) in out.iter_mut().zip(columns.iter().flatten()) {
            *word = value.to_bits();
        }
        out
    }
}

/// 场景
pub trait Scene {
    /// 依次访问每个绘制项；访问者返回错误时停止
    fn visit_drawables(&self, visitor: &mut dyn FnMut(&DrawItem) -> Result<()>) -> Result<()>;
}

/// 绘制项列表构成的场景
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    pub items: Vec<DrawItem>,
}

impl StaticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DrawItem) {
        self.items.push(item);
    }
}

impl Scene for StaticScene {
    fn visit_drawables(&self, visitor: &mut dyn FnMut(&DrawItem) -> Result<()>) -> Result<()> {
        for item in &self.items {
            visitor(item)?;
        }
        Ok(())
    }
}

/// 上传到 GPU 的网格
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_srv: u32,
    pub index_view: IndexBufferView,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn draw_item(&self, world: Matrix4, material: Material) -> DrawItem {
        DrawItem {
            world,
            vertex_buffer: self.vertex_srv,
            base_vertex: 0,
            index_buffer: self.index_view,
            first_index: 0,
            index_count: self.index_count,
            material,
        }
    }
}

impl Device {
    /// 上传网格的顶点与索引（加载期，上传并等待）
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GpuMesh> {
        mesh.validate()?;

        let vertex_buffer = self.create_buffer(
            BufferDesc::vertex(format!("{} Vertices", mesh.name), Vertex::STRIDE, mesh.vertex_count()),
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let index_buffer = match self.create_buffer(
            BufferDesc::index(format!("{} Indices", mesh.name), mesh.index_count()),
            bytemuck::cast_slice(&mesh.indices),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.destroy_buffer(vertex_buffer)?;
                return Err(e);
            }
        };

        let vertex_srv = self.buffer(vertex_buffer)?.srv_index().unwrap_or(NO_TEXTURE);
        let index_view = self.buffer(index_buffer)?.index_buffer_view();
        Ok(GpuMesh { vertex_buffer, index_buffer, vertex_srv, index_view, index_count: mesh.index_count() })
    }

    pub fn destroy_mesh(&mut self, mesh: GpuMesh) -> Result<()> {
        self.destroy_buffer(mesh.vertex_buffer)?;
        self.destroy_buffer(mesh.index_buffer)
    }
}

/// 天空盒：立方体网格与基于图像的光照贴图
#[derive(Debug, Clone, Copy)]
pub struct Skybox {
    pub mesh: GpuMesh,
    pub environment: TextureHandle,
    pub irradiance: TextureHandle,
    pub prefiltered: TextureHandle,
    pub brdf_lut: TextureHandle,
}

/// 光照 Pass 使用的 IBL 堆索引
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IblIndices {
    pub environment: u32,
    pub irradiance: u32,
    pub prefiltered: u32,
    pub brdf_lut: u32,
}

impl Skybox {
    /// 纯色环境；没有 HDR 资源时使用
    pub fn solid_color(device: &mut Device, color: [f32; 4]) -> Result<Self> {
        let mesh = device.upload_mesh(&MeshData::skybox_cube())?;

        let texel: Vec<u8> = color.iter().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8).collect();
        let face: &[u8] = &texel;
        let faces = [face; 6];

        let environment = device.create_texture(TextureDesc::cube("Environment", 1, Format::Rgba8Unorm), &faces)?;
        let irradiance = device.create_texture(TextureDesc::cube("Irradiance", 1, Format::Rgba8Unorm), &faces)?;
        let prefiltered = device.create_texture(TextureDesc::cube("Prefiltered", 1, Format::Rgba8Unorm), &faces)?;
        // 完全镜面的近似：scale = 1, bias = 0
        let lut_texel = [255u8, 0, 0, 255];
        let brdf_lut = device.create_texture(TextureDesc::new("BRDF LUT", 1, 1, Format::Rgba8Unorm), &[&lut_texel])?;

        Ok(Self { mesh, environment, irradiance, prefiltered, brdf_lut })
    }

    pub fn ibl_indices(&self, device: &Device) -> Result<IblIndices> {
        Ok(IblIndices {
            environment: device.texture(self.environment)?.srv_index(),
            irradiance: device.texture(self.irradiance)?.srv_index(),
            prefiltered: device.texture(self.prefiltered)?.srv_index(),
            brdf_lut: device.texture(self.brdf_lut)?.srv_index(),
        })
    }

    pub fn destroy(self, device: &mut Device) -> Result<()> {
        device.destroy_mesh(self.mesh)?;
        for texture in [self.environment, self.irradiance, self.prefiltered, self.brdf_lut] {
            device.destroy_texture(texture)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::test_device;

    #[test]
    fn test_constant_layouts() {
        assert_eq!(std::mem::size_of::<CameraConstants>(), 288);
        assert_eq!(std::mem::size_of::<LightConstants>(), 160);
        assert_eq!(std::mem::size_of::<SkyConstants>(), 64);
    }

    #[test]
    fn test_light_constants_clamp_point_count() {
        let light = PointLight { position: Vector3::new(1.0, 2.0, 3.0), radius: 5.0, color: [1.0; 3], intensity: 2.0 };
        let set = LightSet { points: vec![light; 6], directional: DirectionalLight::default() };
        let constants = set.constants();
        assert_eq!(constants.point_count, 4);
        assert_eq!(constants.points[3].position, [1.0, 2.0, 3.0]);
        let dir = Vector3::from(constants.direction);
        assert!((dir.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_material_encoding() {
        let material = Material { base_color_texture: Some(7), roughness: 0.25, ..Material::default() };
        let words = material.to_constants();
        assert_eq!(words[0], 7);
        assert_eq!(words[1], NO_TEXTURE);
        assert_eq!(f32::from_bits(words[9]), 0.25);
        assert_eq!(f32::from_bits(words[4]), 1.0);
    }

    #[test]
    fn test_transform_constants_column_major() {
        let item = DrawItem {
            world: Matrix4::new_translation(&Vector3::new(4.0, 5.0, 6.0)),
            vertex_buffer: 0,
            base_vertex: 0,
            index_buffer: IndexBufferView::default(),
            first_index: 0,
            index_count: 0,
            material: Material::default(),
        };
        let words = item.transform_constants();
        assert_eq!(f32::from_bits(words[12]), 4.0);
        assert_eq!(f32::from_bits(words[14]), 6.0);
        assert_eq!(f32::from_bits(words[15]), 1.0);
    }

    #[test]
    fn test_sky_constants_ignore_camera_position() {
        let near = Camera::new(Vector3::new(0.0, 0.0, 5.0), Vector3::zeros(), 1.0);
        let far = Camera::new(Vector3::new(0.0, 0.0, 50.0), Vector3::new(0.0, 0.0, 45.0), 1.0);
        assert_eq!(near.sky_constants().view_projection, far.sky_constants().view_projection);
    }

    #[test]
    fn test_visit_stops_on_error() {
        let mut scene = StaticScene::new();
        let mesh_item = DrawItem {
            world: Matrix4::identity(),
            vertex_buffer: 0,
            base_vertex: 0,
            index_buffer: IndexBufferView::default(),
            first_index: 0,
            index_count: 3,
            material: Material::default(),
        };
        scene.push(mesh_item);
        scene.push(mesh_item);

        let mut visited = 0;
        let result = scene.visit_drawables(&mut |_| {
            visited += 1;
            Err(crate::core::error::RenderError::Runtime("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_upload_mesh_and_skybox() {
        let mut device = test_device(2);
        let mesh = device.upload_mesh(&MeshData::cube("Cube", 1.0)).unwrap();
        assert_eq!(mesh.vertex_srv, 0);
        assert_eq!(mesh.index_count, 36);
        assert_eq!(mesh.index_view.size_bytes, 36 * 4);

        let skybox = Skybox::solid_color(&mut device, [0.2, 0.4, 0.8, 1.0]).unwrap();
        let ibl = skybox.ibl_indices(&device).unwrap();
        assert_eq!(ibl, IblIndices { environment: 2, irradiance: 3, prefiltered: 4, brdf_lut: 5 });

        skybox.destroy(&mut device).unwrap();
        device.destroy_mesh(mesh).unwrap();
        device.flush().unwrap();
        assert_eq!(device.memory().stats().live_resources, 0);
    }
}
