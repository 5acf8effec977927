//! 三维网格重建与二维轮廓提取.
//!
//! 从二值掩码出发: [`reconstruct`] 在 0.5 等值面上提取三角网格
//! (marching tetrahedra, marching-cubes 家族), [`extract_contours`]
//! 对每个含前景的水平切片提取 2D 轮廓 (marching squares).
//! [`export`] 子模块负责 OBJ 与二进制 STL 的持久化.

mod contour;
mod export;
mod marching;

use ndarray::ArrayView3;

use crate::data::Spacing;
use crate::error::{SegError, SegResult};

pub use contour::{extract_contours, SliceContours};
pub use export::{read_obj, read_stl, write_obj, write_stl};
pub use marching::extract_surface;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        pub use contour::par_extract_contours;
    }
}

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 三角网格.
///
/// 空网格是显式合法状态 (全背景掩码的正常产物), 而不是错误.
///
/// # 不变量
///
/// 每个面的三个顶点索引都小于顶点个数. 经由 [`TriMesh::from_parts`]
/// 构建的实体保证该不变量成立.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriMesh {
    vertices: Vec<[f32; 3]>,
    faces: Vec<[u32; 3]>,
    normals: Option<Vec<[f32; 3]>>,
}

impl TriMesh {
    /// 显式的空网格.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            normals: None,
        }
    }

    /// 根据裸数据构建网格, 并校验面索引不变量.
    ///
    /// 若给出法线, 其个数必须与顶点一致. 违反任一条件返回
    /// [`SegError::Geometry`].
    pub fn from_parts(
        vertices: Vec<[f32; 3]>,
        faces: Vec<[u32; 3]>,
        normals: Option<Vec<[f32; 3]>>,
    ) -> SegResult<Self> {
        let n = vertices.len();
        if let Some(bad) = faces
            .iter()
            .flatten()
            .find(|idx| **idx as usize >= n)
        {
            return Err(SegError::Geometry(format!(
                "面索引 {bad} 超出顶点个数 {n}"
            )));
        }
        if let Some(ns) = &normals {
            if ns.len() != n {
                return Err(SegError::Geometry(format!(
                    "法线个数 {} 与顶点个数 {n} 不一致",
                    ns.len()
                )));
            }
        }
        Ok(Self {
            vertices,
            faces,
            normals,
        })
    }

    /// 网格是否为空 (无任何面)?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// 顶点个数.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// 面个数.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// 顶点列表 (物理毫米坐标, 按 `(z, h, w)` 轴序).
    #[inline]
    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    /// 面列表, 每个面为三个顶点索引.
    #[inline]
    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    /// 逐顶点单位法线 (若有).
    #[inline]
    pub fn normals(&self) -> Option<&[[f32; 3]]> {
        self.normals.as_deref()
    }

    /// 顶点坐标的轴对齐物理包围 (每轴 min/max). 空网格返回 `None`.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut it = self.vertices.iter();
        let first = *it.next()?;
        let mut min = first;
        let mut max = first;
        for v in it {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Some((min, max))
    }
}

/// 从二值掩码重建 0.5 等值面三角网格.
///
/// 前置条件在此显式检查: 掩码无任何前景体素时, 直接返回有标记的空网格,
/// 绝不调用等值面算法 (等值面提取在全零输入上是未定义/不稳定的).
/// 其余情况委托给 [`extract_surface`].
pub fn reconstruct(mask: ArrayView3<'_, u8>, spacing: Spacing) -> SegResult<TriMesh> {
    if mask.iter().all(|p| *p == 0) {
        return Ok(TriMesh::empty());
    }
    extract_surface(mask, spacing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_empty_mask_yields_tagged_empty_mesh() {
        let mask = Array3::<u8>::zeros((10, 10, 10));
        let mesh = reconstruct(mask.view(), Spacing::isotropic()).unwrap();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn test_from_parts_rejects_dangling_face_index() {
        let vertices = vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!(TriMesh::from_parts(vertices.clone(), vec![[0, 1, 3]], None).is_err());
        assert!(TriMesh::from_parts(vertices.clone(), vec![[0, 1, 2]], None).is_ok());
        // 法线个数必须与顶点一致.
        assert!(TriMesh::from_parts(vertices, vec![[0, 1, 2]], Some(vec![[0.0; 3]])).is_err());
    }

    #[test]
    fn test_bounds() {
        let mesh = TriMesh::from_parts(
            vec![[0.0, -1.0, 2.0], [3.0, 1.0, -2.0]],
            vec![],
            None,
        )
        .unwrap();
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, [0.0, -1.0, -2.0]);
        assert_eq!(max, [3.0, 1.0, 2.0]);
        assert!(TriMesh::empty().bounds().is_none());
    }
}
