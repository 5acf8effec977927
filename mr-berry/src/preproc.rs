//! 原始图像预处理: 灰度化、升维、强度归一化与规范形状重采样.
//!
//! 输入是上游解码协作方给出的裸数组 (秩 2 的灰度切片、末轴为 3 的秩 3
//! RGB 切片, 或秩 3 的 3D 体积), 输出是推理适配器期望的规范形状体积,
//! 体素取值位于 \[0, 1\].
//!
//! # 注意
//!
//! 末轴长度恰为 3 的秩 3 输入一律按 RGB 切片处理.
//! 该约定与上游解码协作方一致, 由调用方保证.

use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Ix2, Ix3, Zip};

use crate::consts::CANONICAL_SHAPE;
use crate::data::{MriVolume, Spacing};
use crate::error::{SegError, SegResult};
use crate::Idx3d;

/// ITU-R BT.601 亮度权重 (R 分量). 三个权重之和恰为 1.0.
pub const LUMA_R: f32 = 0.299;

/// ITU-R BT.601 亮度权重 (G 分量).
pub const LUMA_G: f32 = 0.587;

/// ITU-R BT.601 亮度权重 (B 分量).
pub const LUMA_B: f32 = 0.114;

/// 预处理参数.
#[derive(Copy, Clone, Debug)]
pub struct PreprocSpec {
    /// 重采样的目标形状, 按 `(z, h, w)` 轴序.
    pub target_shape: Idx3d,
}

impl Default for PreprocSpec {
    #[inline]
    fn default() -> Self {
        Self {
            target_shape: CANONICAL_SHAPE,
        }
    }
}

/// 预处理产物.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// 规范形状的归一化体积 (或全零哨兵).
    pub volume: MriVolume,

    /// 输入是否退化 (强度均一, `max == min`).
    ///
    /// 退化输入以全零哨兵体积继续向下游流动, 而不是报错.
    pub degenerate: bool,
}

/// 对裸输入数组执行完整预处理.
///
/// 流程依次为:
///
/// 1. RGB 切片按 BT.601 亮度权重转为灰度;
/// 2. 秩 2 输入在前部插入单位轴升为秩 3;
/// 3. `(x - min) / (max - min)` 强度归一化. 若 `max == min`, 则产出
///   全零哨兵并置 `degenerate` 标记, 绝不触发除零;
/// 4. 逐轴可分线性插值重采样到 `spec.target_shape`.
///
/// 重采样是近似操作而非物理精确的重采样; 产物的体素间距按
/// `原间距 × 原维长 / 目标维长` 折算.
///
/// 不受支持的秩返回 [`SegError::Rank`].
pub fn preprocess(raw: &ArrayD<f32>, spacing: Spacing, spec: &PreprocSpec) -> SegResult<Preprocessed> {
    let vol = canonical_rank3(raw)?;
    let src_shape = vol.dim();

    let (normed, degenerate) = normalize(vol);
    let resampled = if degenerate {
        Array3::zeros(spec.target_shape)
    } else {
        resample_to(&normed, spec.target_shape)
    };

    let spacing = effective_spacing(spacing, src_shape, spec.target_shape)?;
    Ok(Preprocessed {
        volume: MriVolume::new(resampled, spacing),
        degenerate,
    })
}

/// 将裸输入整形为秩 3 的 `(z, h, w)` 体积.
fn canonical_rank3(raw: &ArrayD<f32>) -> SegResult<Array3<f32>> {
    match raw.ndim() {
        2 => {
            // 秩 2 -> 秩 3: 插入前导单位轴.
            let v = raw.view().into_dimensionality::<Ix2>().unwrap();
            Ok(v.to_owned().insert_axis(Axis(0)))
        }
        3 => {
            let v = raw.view().into_dimensionality::<Ix3>().unwrap();
            if v.dim().2 == 3 {
                Ok(rgb_to_gray(v).insert_axis(Axis(0)))
            } else {
                Ok(v.to_owned())
            }
        }
        ndim => Err(SegError::Rank { ndim }),
    }
}

/// 将 `(h, w, 3)` 的 RGB 切片按 BT.601 亮度权重转为 `(h, w)` 灰度.
fn rgb_to_gray(rgb: ArrayView3<'_, f32>) -> Array2<f32> {
    let (h, w, _) = rgb.dim();
    Array2::from_shape_fn((h, w), |(i, j)| {
        LUMA_R * rgb[[i, j, 0]] + LUMA_G * rgb[[i, j, 1]] + LUMA_B * rgb[[i, j, 2]]
    })
}

/// 原地执行 `(x - min) / (max - min)` 归一化.
///
/// 当 `max == min` (含空数组、全 NaN 等无法建立有效范围的情况) 时,
/// 返回全零数组并置退化标记.
fn normalize(mut a: Array3<f32>) -> (Array3<f32>, bool) {
    let mut mn = f32::INFINITY;
    let mut mx = f32::NEG_INFINITY;
    for &v in a.iter() {
        mn = mn.min(v);
        mx = mx.max(v);
    }

    if !(mx > mn) || !mx.is_finite() || !mn.is_finite() {
        a.fill(0.0);
        return (a, true);
    }

    let range = mx - mn;
    a.mapv_inplace(|v| (v - mn) / range);
    (a, false)
}

/// 逐轴可分线性插值重采样.
fn resample_to(a: &Array3<f32>, target: Idx3d) -> Array3<f32> {
    let mut cur = a.clone();
    let target = [target.0, target.1, target.2];
    for axis in 0..3 {
        let (z, h, w) = cur.dim();
        if [z, h, w][axis] != target[axis] {
            cur = resample_axis(&cur, axis, target[axis]);
        }
    }
    cur
}

/// 沿单一轴做线性插值重采样.
fn resample_axis(a: &Array3<f32>, axis: usize, new_len: usize) -> Array3<f32> {
    let (z, h, w) = a.dim();
    let mut dims = [z, h, w];
    dims[axis] = new_len;

    let mut out = Array3::<f32>::zeros((dims[0], dims[1], dims[2]));
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(a.lanes(Axis(axis)))
        .for_each(|dst, src| resample_lane(src, dst));
    out
}

/// 单条 lane 的中心对齐线性插值.
fn resample_lane(src: ArrayView1<'_, f32>, mut dst: ArrayViewMut1<'_, f32>) {
    let n_src = src.len();
    let n_dst = dst.len();
    debug_assert!(n_src > 0 && n_dst > 0);

    if n_src == n_dst {
        dst.assign(&src);
        return;
    }

    let ratio = n_src as f64 / n_dst as f64;
    for (i, d) in dst.iter_mut().enumerate() {
        let pos = ((i as f64 + 0.5) * ratio - 0.5).clamp(0.0, (n_src - 1) as f64);
        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(n_src - 1);
        let t = (pos - i0 as f64) as f32;
        *d = src[i0] * (1.0 - t) + src[i1] * t;
    }
}

/// 折算重采样后的有效体素间距.
fn effective_spacing(orig: Spacing, src: Idx3d, target: Idx3d) -> SegResult<Spacing> {
    let [sz, sh, sw] = orig.as_array();
    Spacing::new(
        sz * src.0 as f64 / target.0 as f64,
        sh * src.1 as f64 / target.1 as f64,
        sw * src.2 as f64 / target.2 as f64,
    )
}
