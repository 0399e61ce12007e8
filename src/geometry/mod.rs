//! 几何体
//!
//! 顶点格式与 CPU 侧网格。网格通过 `Device::upload_mesh` 上传到 GPU。

pub mod mesh;
pub mod vertex;

pub use mesh::MeshData;
pub use vertex::Vertex;
