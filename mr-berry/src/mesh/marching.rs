//! 0.5 等值面三角网格提取 (marching tetrahedra).
//!
//! 将每个体素立方胞分解为 6 个 Kuhn 四面体, 在每个四面体内做局部
//! 等值面三角化. 相比查表式 marching cubes, 该家族成员无歧义构型,
//! 产出的表面在二值掩码上总是闭合流形.
//!
//! 掩码在概念上向外补一圈背景, 因此贴边的前景也能得到闭合表面;
//! 顶点坐标为物理毫米, 按 `(z, h, w)` 轴序, 体素 `i` 的中心位于
//! `i × spacing`.

use std::collections::HashMap;

use ndarray::ArrayView3;

use crate::consts::ISO_LEVEL;
use crate::data::Spacing;
use crate::error::{SegError, SegResult};

use super::TriMesh;

/// 立方胞的 6-四面体 Kuhn 分解. 角点编号按 `(z, h, w)` 位编码:
/// bit2 = z, bit1 = h, bit0 = w.
const TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

/// 顶点去重的量化精度: 1e-4 毫米.
const QUANTIZE_SCALE: f32 = 1e4;

/// 将物理坐标量化为去重键.
#[inline]
pub(crate) fn quantize(p: [f32; 3]) -> [i64; 3] {
    p.map(|v| (v * QUANTIZE_SCALE).round() as i64)
}

/// 在二值掩码上提取 0.5 等值面三角网格.
///
/// # 前置条件
///
/// `mask` 必须至少包含一个前景体素. 全零输入应由调用方以
/// [`super::reconstruct`] 的显式检查短路; 本函数在意外的退化输入上
/// 返回 [`SegError::Geometry`], 该错误由流水线失败边界兜底.
pub fn extract_surface(mask: ArrayView3<'_, u8>, spacing: Spacing) -> SegResult<TriMesh> {
    Builder::new(mask, spacing).build()
}

/// `extract_surface` 的实现细节.
struct Builder<'a> {
    mask: ArrayView3<'a, u8>,
    spacing: [f32; 3],
    vertices: Vec<[f32; 3]>,
    faces: Vec<[u32; 3]>,
    dedup: HashMap<[i64; 3], u32>,
}

impl<'a> Builder<'a> {
    fn new(mask: ArrayView3<'a, u8>, spacing: Spacing) -> Self {
        let [z, h, w] = spacing.as_array();
        Self {
            mask,
            spacing: [z as f32, h as f32, w as f32],
            vertices: Vec::with_capacity(1024),
            faces: Vec::with_capacity(2048),
            dedup: HashMap::with_capacity(1024),
        }
    }

    /// 概念补零采样: 越界处视为背景.
    #[inline]
    fn field(&self, pos: [isize; 3]) -> f32 {
        let (z, h, w) = self.mask.dim();
        let [pz, ph, pw] = pos;
        if pz < 0 || ph < 0 || pw < 0 {
            return 0.0;
        }
        let (pz, ph, pw) = (pz as usize, ph as usize, pw as usize);
        if pz >= z || ph >= h || pw >= w {
            0.0
        } else {
            f32::from(self.mask[(pz, ph, pw)].min(1))
        }
    }

    /// 角点的物理坐标.
    #[inline]
    fn position(&self, pos: [isize; 3]) -> [f32; 3] {
        [
            pos[0] as f32 * self.spacing[0],
            pos[1] as f32 * self.spacing[1],
            pos[2] as f32 * self.spacing[2],
        ]
    }

    fn build(mut self) -> SegResult<TriMesh> {
        let (z, h, w) = self.mask.dim();

        // 胞的角点覆盖 -1..=dim, 故胞原点从 -1 起.
        for cz in -1..z as isize {
            for ch in -1..h as isize {
                for cw in -1..w as isize {
                    self.process_cell([cz, ch, cw]);
                }
            }
        }

        if self.faces.is_empty() {
            return Err(SegError::Geometry(
                "等值面提取未产出任何三角形".to_owned(),
            ));
        }

        let normals = vertex_normals(&self.vertices, &self.faces);
        TriMesh::from_parts(self.vertices, self.faces, Some(normals))
    }

    fn process_cell(&mut self, origin: [isize; 3]) {
        let mut corner_pos = [[0isize; 3]; 8];
        let mut corner_val = [0.0f32; 8];
        for (i, (pos, val)) in corner_pos.iter_mut().zip(corner_val.iter_mut()).enumerate() {
            *pos = [
                origin[0] + ((i >> 2) & 1) as isize,
                origin[1] + ((i >> 1) & 1) as isize,
                origin[2] + (i & 1) as isize,
            ];
            *val = self.field(*pos);
        }

        // 全内或全外的胞直接跳过.
        let inside_count = corner_val.iter().filter(|v| **v > ISO_LEVEL).count();
        if inside_count == 0 || inside_count == 8 {
            return;
        }

        for tet in TETS {
            self.process_tet(tet.map(|c| corner_pos[c]), tet.map(|c| corner_val[c]));
        }
    }

    fn process_tet(&mut self, pos: [[isize; 3]; 4], val: [f32; 4]) {
        let mut ins: Vec<usize> = Vec::with_capacity(4);
        let mut outs: Vec<usize> = Vec::with_capacity(4);
        for i in 0..4 {
            if val[i] > ISO_LEVEL {
                ins.push(i);
            } else {
                outs.push(i);
            }
        }

        // 内侧参考点: 所有内侧角点的质心. 用于统一三角形朝向.
        if ins.is_empty() || outs.is_empty() {
            return;
        }
        let inward = centroid(ins.iter().map(|i| self.position(pos[*i])));

        match ins.len() {
            1 => {
                let a = ins[0];
                let tri = [
                    self.edge_point(pos[a], val[a], pos[outs[0]], val[outs[0]]),
                    self.edge_point(pos[a], val[a], pos[outs[1]], val[outs[1]]),
                    self.edge_point(pos[a], val[a], pos[outs[2]], val[outs[2]]),
                ];
                self.emit(tri, inward);
            }
            3 => {
                let o = outs[0];
                let tri = [
                    self.edge_point(pos[ins[0]], val[ins[0]], pos[o], val[o]),
                    self.edge_point(pos[ins[1]], val[ins[1]], pos[o], val[o]),
                    self.edge_point(pos[ins[2]], val[ins[2]], pos[o], val[o]),
                ];
                self.emit(tri, inward);
            }
            2 => {
                let (a, b) = (ins[0], ins[1]);
                let (c, d) = (outs[0], outs[1]);
                let p_ac = self.edge_point(pos[a], val[a], pos[c], val[c]);
                let p_ad = self.edge_point(pos[a], val[a], pos[d], val[d]);
                let p_bc = self.edge_point(pos[b], val[b], pos[c], val[c]);
                let p_bd = self.edge_point(pos[b], val[b], pos[d], val[d]);
                self.emit([p_ac, p_ad, p_bd], inward);
                self.emit([p_ac, p_bd, p_bc], inward);
            }
            _ => unreachable!("ins 与 outs 均非空时只可能为 1/2/3"),
        }
    }

    /// 两角点连线上的等值交点, 线性插值.
    fn edge_point(&mut self, pa: [isize; 3], va: f32, pb: [isize; 3], vb: f32) -> u32 {
        let a = self.position(pa);
        let b = self.position(pb);
        // 二值场中 t 恒为 0.5; 写成通式以兼容非二值输入.
        let t = if (vb - va).abs() < f32::EPSILON {
            0.5
        } else {
            (ISO_LEVEL - va) / (vb - va)
        };
        let p = [
            a[0] + t * (b[0] - a[0]),
            a[1] + t * (b[1] - a[1]),
            a[2] + t * (b[2] - a[2]),
        ];

        let key = quantize(p);
        if let Some(id) = self.dedup.get(&key) {
            return *id;
        }
        let id = self.vertices.len() as u32;
        self.vertices.push(p);
        self.dedup.insert(key, id);
        id
    }

    /// 记录一个三角形, 并按内侧参考点统一为外向法线朝向.
    fn emit(&mut self, tri: [u32; 3], inward: [f32; 3]) {
        let [i0, i1, i2] = tri;
        if i0 == i1 || i1 == i2 || i0 == i2 {
            return;
        }
        let v0 = self.vertices[i0 as usize];
        let v1 = self.vertices[i1 as usize];
        let v2 = self.vertices[i2 as usize];

        let n = cross(sub(v1, v0), sub(v2, v0));
        let center = centroid([v0, v1, v2].into_iter());
        let outward = sub(center, inward);

        if dot(n, outward) < 0.0 {
            self.faces.push([i0, i2, i1]);
        } else {
            self.faces.push([i0, i1, i2]);
        }
    }
}

/// 由面法线面积加权累计逐顶点单位法线.
fn vertex_normals(vertices: &[[f32; 3]], faces: &[[u32; 3]]) -> Vec<[f32; 3]> {
    let mut normals = vec![[0.0f32; 3]; vertices.len()];
    for [a, b, c] in faces {
        let v0 = vertices[*a as usize];
        let v1 = vertices[*b as usize];
        let v2 = vertices[*c as usize];
        // 未归一化的叉积自带面积权重.
        let n = cross(sub(v1, v0), sub(v2, v0));
        for idx in [a, b, c] {
            let acc = &mut normals[*idx as usize];
            acc[0] += n[0];
            acc[1] += n[1];
            acc[2] += n[2];
        }
    }
    for n in normals.iter_mut() {
        let len = dot(*n, *n).sqrt();
        if len > 1e-12 {
            n.iter_mut().for_each(|v| *v /= len);
        }
    }
    normals
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn centroid<I: Iterator<Item = [f32; 3]>>(points: I) -> [f32; 3] {
    let mut acc = [0.0f32; 3];
    let mut n = 0usize;
    for p in points {
        acc[0] += p[0];
        acc[1] += p[1];
        acc[2] += p[2];
        n += 1;
    }
    debug_assert!(n > 0);
    acc.map(|v| v / n as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::collections::HashMap;

    fn cube_mask() -> Array3<u8> {
        let mut mask = Array3::<u8>::zeros((10, 10, 10));
        for z in 4..=6 {
            for h in 4..=6 {
                for w in 4..=6 {
                    mask[[z, h, w]] = 1;
                }
            }
        }
        mask
    }

    /// 每条无向边应恰好被两个面共享 (闭合流形).
    fn assert_watertight(mesh: &TriMesh) {
        let mut edge_count: HashMap<(u32, u32), u32> = HashMap::new();
        for [a, b, c] in mesh.faces() {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let key = (*u.min(v), *u.max(v));
                *edge_count.entry(key).or_insert(0) += 1;
            }
        }
        assert!(edge_count.values().all(|c| *c == 2));
    }

    #[test]
    fn test_empty_mask_is_geometry_error() {
        let mask = Array3::<u8>::zeros((4, 4, 4));
        assert!(matches!(
            extract_surface(mask.view(), Spacing::isotropic()),
            Err(SegError::Geometry(_))
        ));
    }

    #[test]
    fn test_single_voxel_surface() {
        let mut mask = Array3::<u8>::zeros((1, 1, 1));
        mask[[0, 0, 0]] = 1;
        let mesh = extract_surface(mask.view(), Spacing::isotropic()).unwrap();

        assert!(!mesh.is_empty());
        let (min, max) = mesh.bounds().unwrap();
        for axis in 0..3 {
            assert!((min[axis] + 0.5).abs() < 1e-5);
            assert!((max[axis] - 0.5).abs() < 1e-5);
        }
        assert_watertight(&mesh);
    }

    #[test]
    fn test_cube_surface_bounds_and_manifold() {
        let mask = cube_mask();
        let mesh = extract_surface(mask.view(), Spacing::isotropic()).unwrap();

        // 等值交点位于前景体素中心向外半个体素处.
        let (min, max) = mesh.bounds().unwrap();
        for axis in 0..3 {
            assert!((min[axis] - 3.5).abs() < 1e-5);
            assert!((max[axis] - 6.5).abs() < 1e-5);
        }
        assert_watertight(&mesh);

        // 法线与顶点一一对应且为单位向量.
        let normals = mesh.normals().unwrap();
        assert_eq!(normals.len(), mesh.vertex_count());
        for n in normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_surface_scales_with_spacing() {
        let mask = cube_mask();
        let spacing = Spacing::new(2.0, 1.0, 0.5).unwrap();
        let mesh = extract_surface(mask.view(), spacing).unwrap();

        let (min, max) = mesh.bounds().unwrap();
        assert!((min[0] - 7.0).abs() < 1e-5 && (max[0] - 13.0).abs() < 1e-5);
        assert!((min[1] - 3.5).abs() < 1e-5 && (max[1] - 6.5).abs() < 1e-5);
        assert!((min[2] - 1.75).abs() < 1e-5 && (max[2] - 3.25).abs() < 1e-5);
    }

    #[test]
    fn test_boundary_touching_mask_is_still_closed() {
        let mut mask = Array3::<u8>::zeros((3, 3, 3));
        // 前景贴在体积角落.
        mask[[0, 0, 0]] = 1;
        mask[[0, 0, 1]] = 1;
        let mesh = extract_surface(mask.view(), Spacing::isotropic()).unwrap();
        assert_watertight(&mesh);
    }
}
