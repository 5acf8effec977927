//! 概率体积的离散化 (阈值器).
//!
//! 二值与多类两种推理管线在这里汇聚为同一个接口: 模式由
//! [`ProbVolume`] 的变体标记, 下游的度量与重建不再区分两者.

use ndarray::{Array3, Array4};

use crate::consts::ISO_LEVEL;
use crate::data::{Spacing, TumorLabel};
use crate::Idx3d;

/// 分割模式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SegMode {
    /// 单通道前景概率, `p > 0.5` 即前景.
    Binary,

    /// 逐类概率, 按类轴取 argmax.
    MultiClass,
}

/// 推理适配器产出的概率体积.
#[derive(Debug, Clone)]
pub enum ProbVolume {
    /// 单通道前景概率, 形状按 `(z, h, w)`.
    Binary(Array3<f32>),

    /// 逐类概率, 形状按 `(类数, z, h, w)` (channel-first).
    MultiClass(Array4<f32>),
}

impl ProbVolume {
    /// 获取空间形状, 按 `(z, h, w)`.
    #[inline]
    pub fn spatial_shape(&self) -> Idx3d {
        match self {
            ProbVolume::Binary(p) => p.dim(),
            ProbVolume::MultiClass(p) => {
                let (_, z, h, w) = p.dim();
                (z, h, w)
            }
        }
    }

    /// 获取该体积对应的分割模式.
    #[inline]
    pub fn mode(&self) -> SegMode {
        match self {
            ProbVolume::Binary(_) => SegMode::Binary,
            ProbVolume::MultiClass(_) => SegMode::MultiClass,
        }
    }

    /// 获取类别数. 二值模式视为 2 类 (背景 + 前景).
    #[inline]
    pub fn num_classes(&self) -> usize {
        match self {
            ProbVolume::Binary(_) => 2,
            ProbVolume::MultiClass(p) => p.dim().0,
        }
    }
}

/// 以统一接口将概率体积离散化为整数标签体积.
///
/// - 二值模式: `p > 0.5` 的体素标记为 1, 其余为 0;
/// - 多类模式: 沿类轴取 argmax, 并列时取较小的类 id.
///
/// 多类模式的类别数必须位于 `1..=255`, 否则程序 panic.
pub fn discretize(prob: &ProbVolume, spacing: Spacing) -> TumorLabel {
    let data = match prob {
        ProbVolume::Binary(p) => p.mapv(|v| u8::from(v > ISO_LEVEL)),
        ProbVolume::MultiClass(p) => {
            let (classes, z, h, w) = p.dim();
            assert!(
                (1..=255).contains(&classes),
                "多类模式的类别数必须位于 1..=255, 实际为 {classes}"
            );
            Array3::from_shape_fn((z, h, w), |(i, j, k)| {
                let mut best = 0usize;
                let mut best_val = p[[0, i, j, k]];
                for c in 1..classes {
                    let v = p[[c, i, j, k]];
                    if v > best_val {
                        best_val = v;
                        best = c;
                    }
                }
                best as u8
            })
        }
    };
    TumorLabel::new(data, spacing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::label::*;

    #[test]
    fn test_binary_threshold() {
        let mut p = Array3::<f32>::zeros((2, 2, 2));
        p[[0, 0, 0]] = 0.9;
        p[[1, 1, 1]] = 0.5; // 恰为阈值, 不属于前景.
        let label = discretize(&ProbVolume::Binary(p), Spacing::isotropic());

        assert_eq!(label.foreground_count(), 1);
        assert_eq!(label[(0, 0, 0)], 1);
        assert_eq!(label[(1, 1, 1)], BRATS_BACKGROUND);
    }

    #[test]
    fn test_multiclass_argmax() {
        let mut p = Array4::<f32>::zeros((3, 1, 2, 2));
        // 背景占优的体素.
        p[[0, 0, 0, 0]] = 0.8;
        // 水肿占优.
        p[[1, 0, 0, 1]] = 0.7;
        // 强化占优.
        p[[2, 0, 1, 0]] = 0.9;
        // 并列时取较小类 id.
        p[[0, 0, 1, 1]] = 0.5;
        p[[2, 0, 1, 1]] = 0.5;

        let label = discretize(&ProbVolume::MultiClass(p), Spacing::isotropic());
        assert_eq!(label[(0, 0, 0)], BRATS_BACKGROUND);
        assert_eq!(label[(0, 0, 1)], BRATS_EDEMA);
        assert_eq!(label[(0, 1, 0)], BRATS_ENHANCING);
        assert_eq!(label[(0, 1, 1)], BRATS_BACKGROUND);
    }

    #[test]
    fn test_mode_and_shape_accessors() {
        let b = ProbVolume::Binary(Array3::zeros((2, 3, 4)));
        assert_eq!(b.mode(), SegMode::Binary);
        assert_eq!(b.spatial_shape(), (2, 3, 4));
        assert_eq!(b.num_classes(), 2);

        let m = ProbVolume::MultiClass(Array4::zeros((3, 2, 3, 4)));
        assert_eq!(m.mode(), SegMode::MultiClass);
        assert_eq!(m.spatial_shape(), (2, 3, 4));
        assert_eq!(m.num_classes(), 3);
    }
}
