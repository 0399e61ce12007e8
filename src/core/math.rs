//! 数学类型
//!
//! 基于 `nalgebra` 的类型别名，以及把矩阵打包成着色器常量的辅助函数。

pub use nalgebra::{Matrix4 as Mat4, Point3, Vector3 as Vec3, Vector4 as Vec4};

pub type Vector3 = Vec3<f32>;
pub type Vector4 = Vec4<f32>;
pub type Matrix4 = Mat4<f32>;

/// 按列主序展开为 `[[f32; 4]; 4]`，与 HLSL `column_major float4x4` 的内存布局一致
pub fn matrix_to_array(m: &Matrix4) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (c, column) in out.iter_mut().enumerate() {
        for (r, value) in column.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    out
}

/// 去掉平移分量，天空盒使用
pub fn strip_translation(m: &Matrix4) -> Matrix4 {
    let mut out = *m;
    out[(0, 3)] = 0.0;
    out[(1, 3)] = 0.0;
    out[(2, 3)] = 0.0;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_to_array_is_column_major() {
        let m = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
        let a = matrix_to_array(&m);
        assert_eq!(a[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(a[0], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_strip_translation() {
        let m = Matrix4::new_translation(&Vector3::new(5.0, 6.0, 7.0));
        assert_eq!(strip_translation(&m), Matrix4::identity());
    }
}
