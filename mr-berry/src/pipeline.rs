//! 端到端分割后处理流水线.
//!
//! 将预处理, 推理适配, 离散化, 度量评估与三维重建串联起来, 并提供
//! 统一的失败边界: 流水线任何阶段出错都不向调用方传播, 而是记录
//! 告警日志并产出与成功路径同构的降级结果.
//!
//! 推理本身不在本 crate 范围内, 经 [`InferenceAdapter`] 注入.

use ndarray::{ArrayD, ArrayView3};

use crate::consts::{label, CANONICAL_SHAPE, MIN_TUMOR_VOXELS};
use crate::data::{Spacing, VolumeAttr};
use crate::error::{SegError, SegResult};
use crate::mesh::{extract_contours, reconstruct, SliceContours, TriMesh};
use crate::metrics::{AnalysisReport, AxisTerms, MetricsEngine};
use crate::preproc::{preprocess, PreprocSpec};
use crate::threshold::{discretize, ProbVolume, SegMode};
use crate::Idx3d;

/// 推理后端的注入点.
///
/// 实现方接收规范形状的归一化体积, 返回概率体. 返回的概率体必须与
/// 流水线配置的模式与空间形状一致, 否则整次运行走降级路径.
pub trait InferenceAdapter {
    /// 对单个体积执行推理.
    fn infer(&self, volume: ArrayView3<'_, f32>) -> SegResult<ProbVolume>;
}

/// 流水线配置.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// 期望的概率体模式.
    pub mode: SegMode,

    /// 参与度量的前景类别, 不含背景.
    pub classes: Vec<u8>,

    /// 预处理的目标形状, 亦即对推理输出的空间形状要求.
    pub target_shape: Idx3d,

    /// 方位描述词表.
    pub axis_terms: AxisTerms,

    /// 判定 "检出" 的总前景体素数下限 (不含).
    pub min_tumor_voxels: usize,
}

impl Default for PipelineConfig {
    /// BraTS 风格的多类配置: 水肿与增强肿瘤两个前景类.
    fn default() -> Self {
        Self {
            mode: SegMode::MultiClass,
            classes: vec![label::BRATS_EDEMA, label::BRATS_ENHANCING],
            target_shape: CANONICAL_SHAPE,
            axis_terms: AxisTerms::default(),
            min_tumor_voxels: MIN_TUMOR_VOXELS,
        }
    }
}

impl PipelineConfig {
    /// 单通道二值配置: 唯一前景类取 1.
    pub fn binary() -> Self {
        Self {
            mode: SegMode::Binary,
            classes: vec![1],
            ..Self::default()
        }
    }

    /// 校验类集: 非空且不含背景 0.
    ///
    /// 字段是公开的, 调用方可能拼出非法配置; 该检查在失败边界内执行,
    /// 非法配置走降级路径而不是 panic.
    fn validate(&self) -> SegResult<()> {
        if self.classes.is_empty() {
            return Err(SegError::Degenerate("配置类集为空".to_owned()));
        }
        if self.classes.iter().any(|c| label::is_background(*c)) {
            return Err(SegError::Degenerate(format!(
                "配置类集包含背景 0: {:?}",
                self.classes
            )));
        }
        Ok(())
    }
}

/// 一次流水线运行的完整产物.
#[derive(Clone, Debug)]
pub struct Analysis {
    /// 量化度量报告.
    pub report: AnalysisReport,

    /// 全前景的三维表面网格. 未检出前景时为空网格.
    pub mesh: TriMesh,

    /// 逐切片的二维轮廓.
    pub contours: Vec<SliceContours>,
}

impl Analysis {
    /// 失败边界产物: 降级报告 + 空网格 + 空轮廓集.
    fn fallback(classes: &[u8]) -> Self {
        Self {
            report: AnalysisReport::fallback(classes),
            mesh: TriMesh::empty(),
            contours: Vec::new(),
        }
    }
}

/// 后处理流水线.
pub struct Pipeline<A> {
    adapter: A,
    config: PipelineConfig,
}

impl<A: InferenceAdapter> Pipeline<A> {
    /// 以给定适配器与配置构建流水线.
    pub fn new(adapter: A, config: PipelineConfig) -> Self {
        Self { adapter, config }
    }

    /// 当前配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 执行一次完整运行.
    ///
    /// 本方法从不失败: 任何阶段出错都记录 `warn` 日志并返回降级
    /// 产物, 其报告带 [`crate::metrics::Provenance::Fallback`] 标记.
    pub fn run(&self, raw: &ArrayD<f32>, spacing: Spacing) -> Analysis {
        match self.try_run(raw, spacing) {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!(
                    "流水线运行失败, 返回降级结果: {e} (输入形状 {:?})",
                    raw.shape()
                );
                Analysis::fallback(&self.config.classes)
            }
        }
    }

    fn try_run(&self, raw: &ArrayD<f32>, spacing: Spacing) -> SegResult<Analysis> {
        self.config.validate()?;
        let spec = PreprocSpec {
            target_shape: self.config.target_shape,
        };
        let pre = preprocess(raw, spacing, &spec)?;
        if pre.degenerate {
            log::warn!("输入强度均一, 以全零哨兵体积继续");
        }

        let prob = self.adapter.infer(pre.volume.data())?;
        if prob.mode() != self.config.mode {
            return Err(SegError::Inference(format!(
                "推理输出模式 {:?} 与配置的 {:?} 不符",
                prob.mode(),
                self.config.mode
            )));
        }
        let actual = prob.spatial_shape();
        if actual != self.config.target_shape {
            return Err(SegError::ShapeMismatch {
                expected: self.config.target_shape,
                actual,
            });
        }

        let tumor_label = discretize(&prob, pre.volume.spacing());
        let engine = MetricsEngine::new(
            &self.config.classes,
            self.config.axis_terms.clone(),
            self.config.min_tumor_voxels,
        );
        let report = engine.evaluate(&tumor_label);

        let mask = tumor_label.foreground_mask();
        let mesh = reconstruct(mask.view(), tumor_label.spacing())?;
        if !mesh.is_empty() {
            log::info!(
                "表面重建完成: {} 顶点, {} 三角形",
                mesh.vertex_count(),
                mesh.face_count()
            );
        }
        let contours = extract_contours(mask.view());

        Ok(Analysis {
            report,
            mesh,
            contours,
        })
    }
}
