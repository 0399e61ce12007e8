//! CPU 侧网格数据与程序化几何体

use crate::core::error::{AssetError, Result};

use super::vertex::Vertex;

/// CPU 侧网格
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    /// 三角形列表，32 位索引
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.index_count() / 3
    }

    /// 检查索引是否构成完整三角形且不越界
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(AssetError::InvalidData(format!("Mesh '{}' is empty", self.name)).into());
        }
        if self.indices.len() % 3 != 0 {
            return Err(AssetError::InvalidData(format!(
                "Mesh '{}' has {} indices, not a multiple of 3",
                self.name,
                self.indices.len()
            ))
            .into());
        }
        if let Some((i, index)) = self.indices.iter().enumerate().find(|(_, index)| **index >= self.vertex_count()) {
            return Err(AssetError::InvalidData(format!(
                "Mesh '{}' index {} at {} exceeds {} vertices",
                self.name,
                index,
                i,
                self.vertex_count()
            ))
            .into());
        }
        Ok(())
    }

    /// 每个面独立顶点的立方体，逆时针为正面
    pub fn cube(name: impl Into<String>, half_extent: f32) -> Self {
        // (法线, 切线, 副切线方向)
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        const CORNERS: [([f32; 2], [f32; 2]); 4] = [
            ([-1.0, -1.0], [0.0, 1.0]),
            ([1.0, -1.0], [1.0, 1.0]),
            ([1.0, 1.0], [1.0, 0.0]),
            ([-1.0, 1.0], [0.0, 0.0]),
        ];

        let mut mesh = Self::new(name);
        for (normal, tangent, bitangent) in FACES {
            let base = mesh.vertex_count();
            for ([s, t], uv) in CORNERS {
                let position = [0, 1, 2].map(|axis| {
                    (normal[axis] + s * tangent[axis] + t * bitangent[axis]) * half_extent
                });
                mesh.vertices.push(Vertex::new(position, normal, uv, [tangent[0], tangent[1], tangent[2], 1.0]));
            }
            mesh.indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// 天空盒立方体：只有位置，三角形朝内
    pub fn skybox_cube() -> Self {
        let cube = Self::cube("Skybox", 1.0);
        Self {
            name: cube.name,
            vertices: cube.vertices.iter().map(|v| Vertex::position_only(v.position)).collect(),
            indices: cube.indices.chunks(3).flat_map(|tri| [tri[0], tri[2], tri[1]]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_is_valid() {
        let cube = MeshData::cube("Cube", 0.5);
        cube.validate().unwrap();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.iter().all(|c| (c.abs() - 0.5).abs() < 1e-6)));
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = MeshData::cube("Cube", 1.0);
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| nalgebra::Vector3::from(cube.vertices[i as usize].position));
            let face_normal = (b - a).cross(&(c - a));
            let normal = nalgebra::Vector3::from(cube.vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(&normal) > 0.0);
        }
    }

    #[test]
    fn test_skybox_faces_point_inward() {
        let sky = MeshData::skybox_cube();
        sky.validate().unwrap();
        for tri in sky.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| nalgebra::Vector3::from(sky.vertices[i as usize].position));
            let face_normal = (b - a).cross(&(c - a));
            let centroid = (a + b + c) / 3.0;
            assert!(face_normal.dot(&centroid) < 0.0);
        }
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut mesh = MeshData::cube("Broken", 1.0);
        mesh.indices.push(0);
        assert!(mesh.validate().is_err());
        mesh.indices.truncate(36);
        mesh.indices[5] = 99;
        assert!(mesh.validate().is_err());
        assert!(MeshData::new("Empty").validate().is_err());
    }
}
