//! 体数据基础结构.

use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView, ArrayView2, ArrayViewMut, Axis, Ix3};

use crate::consts::label::*;
use crate::error::{SegError, SegResult};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 体素间距 (毫米), 按 `(z, h, w)` 轴序存放.
///
/// 三个分量分别代表空间 (相邻切片方向)、高 (自然图像的垂直方向)、
/// 宽 (自然图像的水平方向). 该结构是只读的, 若要修改间距, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spacing([f64; 3]);

impl Spacing {
    /// 构建体素间距. 三个分量必须均为正的有限值, 否则返回 `Err`.
    pub fn new(z_mm: f64, height_mm: f64, width_mm: f64) -> SegResult<Self> {
        let dim = [z_mm, height_mm, width_mm];
        if dim.iter().all(|v| v.is_finite() && *v > 0.0) {
            Ok(Self(dim))
        } else {
            Err(SegError::Degenerate(format!("非正体素间距: {dim:?}")))
        }
    }

    /// 构建各向同性的 1 mm 间距.
    #[inline]
    pub const fn isotropic() -> Self {
        Self([1.0; 3])
    }

    /// 获取空间方向 (相邻切片的方向) 体素间距, 以毫米为单位.
    #[inline]
    pub fn z_mm(&self) -> f64 {
        self.0[0]
    }

    /// 获取 height 方向 (自然 2D 图像的垂直方向) 体素间距, 以毫米为单位.
    #[inline]
    pub fn height_mm(&self) -> f64 {
        self.0[1]
    }

    /// 获取 width 方向 (自然 2D 图像的水平方向) 体素间距, 以毫米为单位.
    #[inline]
    pub fn width_mm(&self) -> f64 {
        self.0[2]
    }

    /// 按 `(z, h, w)` 轴序获取三个分量.
    #[inline]
    pub fn as_array(&self) -> [f64; 3] {
        self.0
    }

    /// 获取单个体素的实际体积值, 以立方毫米为单位.
    #[inline]
    pub fn voxel(&self) -> f64 {
        self.0.iter().product()
    }

    /// 体素间距在三个维度上是否是各向同的?
    #[inline]
    pub fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.0;
        z == h && z == w
    }
}

impl Default for Spacing {
    #[inline]
    fn default() -> Self {
        Self::isotropic()
    }
}

/// 体数据共用属性.
///
/// 该 trait 扮演 nifti 文件头在本 crate 内的角色, 但不依赖任何文件格式:
/// 形状与间距由上游解码协作方直接给出.
pub trait VolumeAttr {
    /// 获取数据形状大小, 按 `(z, h, w)` 轴序.
    fn shape3(&self) -> Idx3d;

    /// 获取体素间距.
    fn spacing(&self) -> Spacing;

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> crate::Idx2d {
        let (_, h, w) = self.shape3();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape3().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape3();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape3();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel_mm3(&self) -> f64 {
        self.spacing().voxel()
    }
}

/// 规范化后的 3D MRI 体积. 体素以 `f32` 保存, 取值位于 \[0, 1\]
/// (或全零哨兵, 见 [`crate::preproc`]).
#[derive(Debug, Clone)]
pub struct MriVolume {
    data: Array3<f32>,
    spacing: Spacing,
}

impl VolumeAttr for MriVolume {
    #[inline]
    fn shape3(&self) -> Idx3d {
        self.data.dim()
    }

    #[inline]
    fn spacing(&self) -> Spacing {
        self.spacing
    }
}

impl Index<Idx3d> for MriVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MriVolume {
    /// 根据裸数据和体素间距直接创建实体.
    ///
    /// 数据的取值约定 (位于 \[0, 1\]) 由调用方保证, 本方法不做检查.
    #[inline]
    pub fn new(data: Array3<f32>, spacing: Spacing) -> Self {
        Self { data, spacing }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 消费自我, 直接获得内部数据的所有权.
    #[inline]
    pub fn into_raw(self) -> (Array3<f32>, Spacing) {
        (self.data, self.spacing)
    }
}

/// 3D 肿瘤标签. 体素以 `u8` 保存, `0` 为背景, `1..K` 为肿瘤子区域.
#[derive(Debug, Clone)]
pub struct TumorLabel {
    data: Array3<u8>,
    spacing: Spacing,
}

impl VolumeAttr for TumorLabel {
    #[inline]
    fn shape3(&self) -> Idx3d {
        self.data.dim()
    }

    #[inline]
    fn spacing(&self) -> Spacing {
        self.spacing
    }
}

impl Index<Idx3d> for TumorLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for TumorLabel {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl TumorLabel {
    /// 根据裸标签数据和体素间距直接创建实体.
    ///
    /// 体素值必须为合法类别 id (背景 0 或配置类集内的值),
    /// 否则上层度量的行为未定义.
    #[inline]
    pub fn new(data: Array3<u8>, spacing: Spacing) -> Self {
        Self { data, spacing }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取 3D 标注中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取 3D 标注中所有非背景体素的个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| is_tumor(**p)).count()
    }

    /// 获取标签的基本统计信息.
    ///
    /// 统计信息格式为: \[背景体素数, 水肿体素数, 强化肿瘤体素数\].
    /// 该操作不会统计任何其他体素信息.
    pub fn numeric_statistics(&self) -> [usize; 3] {
        let mut ans = [0; 3];
        for pixel in self.data.iter().filter(|p| **p <= BRATS_ENHANCING) {
            ans[*pixel as usize] += 1;
        }
        ans
    }

    /// 收集满足谓词 `pred` 的所有体素对应的下标, 结果按行优先存储.
    pub fn filter_pos(&self, pred: fn(u8) -> bool) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(ref pos, pixel)| pred(*pixel).then_some(*pos))
            .collect()
    }

    /// 收集所有肿瘤 (非背景) 体素对应的下标. 结果按行优先存储.
    #[inline]
    pub fn tumor_pos(&self) -> Vec<Idx3d> {
        self.filter_pos(is_tumor)
    }

    /// 提取聚合肿瘤 (非背景) 二值掩码. 前景为 1, 背景为 0.
    pub fn foreground_mask(&self) -> Array3<u8> {
        self.data.mapv(|p| u8::from(is_tumor(p)))
    }

    /// 提取值为 `label` 的单类二值掩码. 前景为 1, 背景为 0.
    pub fn class_mask(&self, label: u8) -> Array3<u8> {
        self.data.mapv(|p| u8::from(p == label))
    }

    /// 获取 3D 标注 z 空间的第 `z_index` 层不可变切片.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代 3D 标注水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, u8>> {
        self.data.axis_iter(Axis(0))
    }
}
