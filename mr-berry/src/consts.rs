//! 通用常量.

use crate::Idx3d;

/// 标签体素值.
pub mod label {
    /// 背景体素值.
    pub const BRATS_BACKGROUND: u8 = 0;

    /// 水肿 (peritumoral edema) 体素值.
    pub const BRATS_EDEMA: u8 = 1;

    /// 强化肿瘤 (enhancing tumor) 体素值.
    pub const BRATS_ENHANCING: u8 = 2;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BRATS_BACKGROUND)
    }

    /// 体素是否是水肿?
    #[inline]
    pub const fn is_edema(p: u8) -> bool {
        matches!(p, BRATS_EDEMA)
    }

    /// 体素是否是强化肿瘤?
    #[inline]
    pub const fn is_enhancing(p: u8) -> bool {
        matches!(p, BRATS_ENHANCING)
    }

    /// 体素是否属于肿瘤 (任意非背景类)?
    #[inline]
    pub const fn is_tumor(p: u8) -> bool {
        !is_background(p)
    }
}

/// 推理模型期望的规范体积形状, 按 `(z, h, w)` 轴序.
pub const CANONICAL_SHAPE: Idx3d = (64, 128, 128);

/// 判定 "检出" 所需的最少聚合肿瘤体素数.
pub const MIN_TUMOR_VOXELS: usize = 100;

/// 置信度下限. 只要存在肿瘤体素, 置信度就不低于该值.
pub const CONFIDENCE_FLOOR: f64 = 0.7;

/// 置信度上限.
pub const CONFIDENCE_CEIL: f64 = 0.95;

/// 置信度公式中总体积 (cm³) 的除数.
pub const CONFIDENCE_SCALE_CM3: f64 = 50.0;

/// 等值面与 2D 轮廓的提取阈值.
pub const ISO_LEVEL: f32 = 0.5;
