//! 运行时错误.

use crate::Idx3d;
use thiserror::Error;

/// 分割后处理流水线的运行时错误.
///
/// 其中 [`SegError::Rank`] 与 [`SegError::Degenerate`]
/// 在存在良定义安全默认值的位置会被就地恢复 (零体积、零包围盒),
/// 其余变体由 [`crate::pipeline::Pipeline`] 的失败边界统一捕获并转换为
/// fallback 报告, 绝不向调用方传播.
#[derive(Debug, Clone, Error)]
pub enum SegError {
    /// 输入数组的秩不受支持. 仅支持秩 2、秩 3, 以及末轴为 3 通道的秩 3 RGB 输入.
    #[error("不支持的数组秩: {ndim} (仅支持 2 或 3)")]
    Rank {
        /// 实际输入的秩.
        ndim: usize,
    },

    /// 输入参数退化, 无法构成合法实体 (如非正的体素间距).
    #[error("退化输入: {0}")]
    Degenerate(String),

    /// 推理适配器执行失败.
    #[error("推理适配器执行失败: {0}")]
    Inference(String),

    /// 推理适配器返回的空间形状与规范形状不符.
    #[error("推理输出空间形状 {actual:?} 与期望 {expected:?} 不符")]
    ShapeMismatch {
        /// 期望的空间形状.
        expected: Idx3d,
        /// 实际返回的空间形状.
        actual: Idx3d,
    },

    /// 等值面/轮廓提取在近退化输入上失败.
    ///
    /// 空掩码的短路由调用方以显式前置条件完成 (见
    /// [`crate::mesh::reconstruct`]), 因此该变体只代表真正非预期的几何错误.
    #[error("几何提取失败: {0}")]
    Geometry(String),
}

/// 流水线统一 `Result` 别名.
pub type SegResult<T> = Result<T, SegError>;
