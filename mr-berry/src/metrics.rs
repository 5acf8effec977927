//! 逐类体素统计与临床标量指标.
//!
//! 对离散标签体积做单次遍历, 为配置类集中的每个非背景类累计体素数、
//! 物理体积、质心与包围盒, 再聚合出检出状态、解剖方位与置信度.
//!
//! 置信度是总肿瘤体积的确定性函数 (不引入任何随机性),
//! 同一输入永远产出同一报告.

use itertools::Itertools;
use once_cell::sync::Lazy;

use crate::consts::{
    label::*, CONFIDENCE_CEIL, CONFIDENCE_FLOOR, CONFIDENCE_SCALE_CM3, MIN_TUMOR_VOXELS,
};
use crate::data::{TumorLabel, VolumeAttr};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 体素索引空间中的轴对齐包围盒 (闭区间端点).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    /// 各轴最小索引, 按 `(z, h, w)`.
    pub min: [usize; 3],

    /// 各轴最大索引, 按 `(z, h, w)`.
    pub max: [usize; 3],
}

impl BoundingBox {
    /// 显式的零退化盒. 体素数为 0 时的安全默认值.
    pub const ZERO: Self = Self {
        min: [0; 3],
        max: [0; 3],
    };

    /// 合并两个包围盒. 仅对非空体素集产生的盒有意义.
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }
}

/// 单个非背景类的统计指标.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassMetrics {
    /// 类别 id.
    pub class: u8,

    /// 该类体素个数.
    pub voxel_count: usize,

    /// 物理体积 (立方毫米).
    pub volume_mm3: f64,

    /// 物理体积 (立方厘米).
    pub volume_cm3: f64,

    /// 索引空间质心, 按 `(z, h, w)`. 体素数为 0 时为 `None`.
    pub center_of_mass: Option<[f64; 3]>,

    /// 包围盒. 体素数为 0 时为显式零退化盒, 而不是缺省字段.
    pub bounding_box: BoundingBox,
}

impl ClassMetrics {
    /// 某个类的空指标 (体素数为 0).
    fn empty(class: u8) -> Self {
        Self {
            class,
            voxel_count: 0,
            volume_mm3: 0.0,
            volume_cm3: 0.0,
            center_of_mass: None,
            bounding_box: BoundingBox::ZERO,
        }
    }
}

/// 轴 → 解剖方位术语查找表.
///
/// 每一轴给出一对术语: 质心位于该轴中点之前取第一个, 否则取第二个.
/// 术语顺序必须与标签体积的 `(z, h, w)` 轴序一致 —— 轴序是调用方契约,
/// 本表只负责把这一契约显式化, 不做内置假设.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisTerms {
    terms: [[String; 2]; 3],
}

/// 默认方位术语, 对应上游加载器的 `(z, h, w)` 惯例.
static DEFAULT_TERMS: Lazy<AxisTerms> = Lazy::new(|| {
    AxisTerms::new([
        ["Anterior", "Posterior"],
        ["Superior", "Inferior"],
        ["Left", "Right"],
    ])
});

impl AxisTerms {
    /// 按 `(z, h, w)` 轴序构建术语表. 每轴依次给出 (前半, 后半) 两个术语.
    pub fn new(terms: [[&str; 2]; 3]) -> Self {
        Self {
            terms: terms.map(|[a, b]| [a.to_owned(), b.to_owned()]),
        }
    }

    /// 根据质心与体积形状产出方位描述, 形如 `"Anterior, Superior, Left"`.
    pub fn describe(&self, center: [f64; 3], shape: Idx3d) -> String {
        let shape = [shape.0, shape.1, shape.2];
        (0..3)
            .map(|axis| {
                let half = shape[axis] as f64 / 2.0;
                if center[axis] < half {
                    self.terms[axis][0].as_str()
                } else {
                    self.terms[axis][1].as_str()
                }
            })
            .join(", ")
    }
}

impl Default for AxisTerms {
    #[inline]
    fn default() -> Self {
        DEFAULT_TERMS.clone()
    }
}

/// 报告的溯源标记.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Provenance {
    /// 来自真实计算.
    Real,

    /// 来自失败边界的 fallback.
    Fallback,
}

/// 汇总分析报告.
///
/// 无论流水线成功与否, 调用方拿到的报告在结构上总是完整的;
/// 区别仅体现在 [`AnalysisReport::provenance`] 与各字段的取值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisReport {
    /// 逐类指标, 按类 id 升序.
    pub per_class: Vec<ClassMetrics>,

    /// 聚合肿瘤体素总数 (全部非背景类).
    pub total_voxels: usize,

    /// 聚合肿瘤总体积 (立方厘米).
    pub total_volume_cm3: f64,

    /// 聚合包围盒. 无肿瘤体素时为零退化盒.
    pub bounding_box: BoundingBox,

    /// 聚合质心. 无肿瘤体素时为 `None`.
    pub center_of_mass: Option<[f64; 3]>,

    /// 检出状态: `"Detected"` / `"Not detected"` / `"Analysis Failed"`.
    pub detection_status: String,

    /// 解剖方位描述. 无肿瘤体素时为 `"N/A"`.
    pub location: String,

    /// 置信度, 位于 \[0, 1\].
    pub confidence_score: f64,

    /// 溯源标记.
    pub provenance: Provenance,
}

impl AnalysisReport {
    /// 固定形状的 fallback 报告: 全零指标、`"Analysis Failed"` 状态.
    ///
    /// `classes` 为配置类集, fallback 报告为其中每个类给出空指标,
    /// 以保证结构与真实报告一致.
    pub fn fallback(classes: &[u8]) -> Self {
        Self {
            per_class: classes
                .iter()
                .sorted()
                .map(|c| ClassMetrics::empty(*c))
                .collect(),
            total_voxels: 0,
            total_volume_cm3: 0.0,
            bounding_box: BoundingBox::ZERO,
            center_of_mass: None,
            detection_status: "Analysis Failed".to_owned(),
            location: "Unknown".to_owned(),
            confidence_score: 0.0,
            provenance: Provenance::Fallback,
        }
    }
}

/// 由总肿瘤体积导出确定性置信度: `min(0.95, 0.7 + volume_cm3 / 50)`.
///
/// 仅当存在肿瘤体素时调用; 无体素的情况由调用方直接给 0.0.
#[inline]
pub fn confidence_from_volume(volume_cm3: f64) -> f64 {
    (CONFIDENCE_FLOOR + volume_cm3 / CONFIDENCE_SCALE_CM3).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEIL)
}

/// 指标引擎.
///
/// 对同一标签体积与间距, `evaluate` 永远产出相同的报告 (幂等).
#[derive(Clone, Debug)]
pub struct MetricsEngine {
    classes: Vec<u8>,
    axis_terms: AxisTerms,
    min_tumor_voxels: usize,
}

/// 单个类的遍历累加器.
#[derive(Copy, Clone)]
struct ClassAccum {
    count: usize,
    idx_sum: [f64; 3],
    min: [usize; 3],
    max: [usize; 3],
}

impl ClassAccum {
    fn new() -> Self {
        Self {
            count: 0,
            idx_sum: [0.0; 3],
            min: [usize::MAX; 3],
            max: [0; 3],
        }
    }

    #[inline]
    fn push(&mut self, (z, h, w): Idx3d) {
        self.count += 1;
        let idx = [z, h, w];
        for axis in 0..3 {
            self.idx_sum[axis] += idx[axis] as f64;
            self.min[axis] = self.min[axis].min(idx[axis]);
            self.max[axis] = self.max[axis].max(idx[axis]);
        }
    }

    fn finish(&self, class: u8, voxel_mm3: f64) -> ClassMetrics {
        if self.count == 0 {
            return ClassMetrics::empty(class);
        }
        let n = self.count as f64;
        let volume_mm3 = n * voxel_mm3;
        ClassMetrics {
            class,
            voxel_count: self.count,
            volume_mm3,
            volume_cm3: volume_mm3 / 1000.0,
            center_of_mass: Some(self.idx_sum.map(|s| s / n)),
            bounding_box: BoundingBox {
                min: self.min,
                max: self.max,
            },
        }
    }
}

impl MetricsEngine {
    /// 构建指标引擎.
    ///
    /// `classes` 为非背景类集 (重复项会被去重, 背景 0 不允许出现, 否则 panic);
    /// `axis_terms` 为方位术语表; `min_tumor_voxels` 为检出门限.
    pub fn new(classes: &[u8], axis_terms: AxisTerms, min_tumor_voxels: usize) -> Self {
        assert!(
            classes.iter().all(|c| !is_background(*c)),
            "类集不允许包含背景 0"
        );
        let classes: Vec<u8> = classes.iter().copied().sorted().dedup().collect();
        assert!(!classes.is_empty(), "类集不允许为空");
        Self {
            classes,
            axis_terms,
            min_tumor_voxels,
        }
    }

    /// 获取配置类集 (升序, 无重复).
    #[inline]
    pub fn classes(&self) -> &[u8] {
        &self.classes
    }

    /// 对标签体积计算完整分析报告. 溯源标记为 [`Provenance::Real`].
    ///
    /// 不属于配置类集的非背景体素会被忽略, 不参与任何统计.
    pub fn evaluate(&self, label: &TumorLabel) -> AnalysisReport {
        let voxel_mm3 = label.voxel_mm3();
        let shape = label.shape3();

        let mut accums: Vec<ClassAccum> = vec![ClassAccum::new(); self.classes.len()];
        let mut aggregate = ClassAccum::new();

        for (pos, &pixel) in label.data().indexed_iter() {
            if is_background(pixel) {
                continue;
            }
            if let Ok(slot) = self.classes.binary_search(&pixel) {
                accums[slot].push(pos);
                aggregate.push(pos);
            }
        }

        let per_class: Vec<ClassMetrics> = self
            .classes
            .iter()
            .zip(accums.iter())
            .map(|(c, acc)| acc.finish(*c, voxel_mm3))
            .collect();

        let total = aggregate.finish(0, voxel_mm3);
        let detected = total.voxel_count > self.min_tumor_voxels;

        let (confidence, location) = match total.center_of_mass {
            Some(center) => (
                confidence_from_volume(total.volume_cm3),
                self.axis_terms.describe(center, shape),
            ),
            None => (0.0, "N/A".to_owned()),
        };

        AnalysisReport {
            per_class,
            total_voxels: total.voxel_count,
            total_volume_cm3: total.volume_cm3,
            bounding_box: total.bounding_box,
            center_of_mass: total.center_of_mass,
            detection_status: if detected { "Detected" } else { "Not detected" }.to_owned(),
            location,
            confidence_score: confidence,
            provenance: Provenance::Real,
        }
    }
}

impl Default for MetricsEngine {
    /// 默认引擎: BraTS 风格的 {水肿, 强化肿瘤} 类集与默认方位术语.
    fn default() -> Self {
        Self::new(
            &[BRATS_EDEMA, BRATS_ENHANCING],
            AxisTerms::default(),
            MIN_TUMOR_VOXELS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Spacing;
    use ndarray::Array3;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// (10, 10, 10) 体积中, 以 (5, 5, 5) 为中心的 3x3x3 实心立方体.
    fn cube_label(spacing: Spacing) -> TumorLabel {
        let mut data = Array3::<u8>::zeros((10, 10, 10));
        for z in 4..=6 {
            for h in 4..=6 {
                for w in 4..=6 {
                    data[[z, h, w]] = BRATS_EDEMA;
                }
            }
        }
        TumorLabel::new(data, spacing)
    }

    #[test]
    fn test_cube_metrics_exact() {
        let engine = MetricsEngine::default();
        let report = engine.evaluate(&cube_label(Spacing::isotropic()));

        assert_eq!(report.total_voxels, 27);
        let edema = &report.per_class[0];
        assert_eq!(edema.class, BRATS_EDEMA);
        assert_eq!(edema.voxel_count, 27);
        assert!(float_eq(edema.volume_mm3, 27.0));
        assert!(float_eq(edema.volume_cm3, 0.027));
        assert_eq!(edema.center_of_mass, Some([5.0, 5.0, 5.0]));
        assert_eq!(edema.bounding_box.min, [4, 4, 4]);
        assert_eq!(edema.bounding_box.max, [6, 6, 6]);

        // 27 <= 100, 不足检出门限.
        assert_eq!(report.detection_status, "Not detected");
        assert!(float_eq(report.confidence_score, 0.7 + 0.027 / 50.0));
        assert_eq!(report.provenance, Provenance::Real);
    }

    #[test]
    fn test_volume_formula_with_anisotropic_spacing() {
        let spacing = Spacing::new(2.0, 0.5, 0.25).unwrap();
        let engine = MetricsEngine::default();
        let report = engine.evaluate(&cube_label(spacing));

        let expected_mm3 = 27.0 * 2.0 * 0.5 * 0.25;
        assert!(float_eq(report.per_class[0].volume_mm3, expected_mm3));
        assert!(float_eq(report.total_volume_cm3, expected_mm3 / 1000.0));
    }

    #[test]
    fn test_all_background_volume() {
        let label = TumorLabel::new(Array3::zeros((10, 10, 10)), Spacing::isotropic());
        let engine = MetricsEngine::default();
        let report = engine.evaluate(&label);

        assert_eq!(report.total_voxels, 0);
        assert!(float_eq(report.confidence_score, 0.0));
        assert_eq!(report.detection_status, "Not detected");
        assert_eq!(report.center_of_mass, None);
        assert_eq!(report.bounding_box, BoundingBox::ZERO);
        for m in &report.per_class {
            assert_eq!(m.voxel_count, 0);
            assert_eq!(m.center_of_mass, None);
            assert_eq!(m.bounding_box, BoundingBox::ZERO);
        }
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let label = cube_label(Spacing::new(1.5, 1.0, 0.75).unwrap());
        let engine = MetricsEngine::default();
        assert_eq!(engine.evaluate(&label), engine.evaluate(&label));
    }

    #[test]
    fn test_detection_threshold() {
        // 5x5x5 = 125 > 100 体素.
        let mut data = Array3::<u8>::zeros((10, 10, 10));
        for z in 0..5 {
            for h in 0..5 {
                for w in 0..5 {
                    data[[z, h, w]] = BRATS_ENHANCING;
                }
            }
        }
        let label = TumorLabel::new(data, Spacing::isotropic());
        let report = MetricsEngine::default().evaluate(&label);

        assert_eq!(report.detection_status, "Detected");
        assert_eq!(report.total_voxels, 125);
        // 质心 (2, 2, 2) 位于三轴前半.
        assert_eq!(report.location, "Anterior, Superior, Left");
    }

    #[test]
    fn test_confidence_clamped() {
        assert!(float_eq(confidence_from_volume(0.0), 0.7));
        assert!(float_eq(confidence_from_volume(5.0), 0.8));
        assert!(float_eq(confidence_from_volume(1000.0), 0.95));
    }

    #[test]
    fn test_axis_terms_injectable() {
        let terms = AxisTerms::new([["头", "脚"], ["上", "下"], ["左", "右"]]);
        assert_eq!(terms.describe([1.0, 9.0, 5.0], (10, 10, 10)), "头, 下, 右");
    }

    #[test]
    fn test_unconfigured_class_is_ignored() {
        let mut data = Array3::<u8>::zeros((4, 4, 4));
        data[[0, 0, 0]] = BRATS_EDEMA;
        data[[1, 1, 1]] = 9; // 不在类集中.
        let label = TumorLabel::new(data, Spacing::isotropic());
        let report = MetricsEngine::default().evaluate(&label);
        assert_eq!(report.total_voxels, 1);
    }

    #[test]
    fn test_fallback_report_shape() {
        let report = AnalysisReport::fallback(&[BRATS_EDEMA, BRATS_ENHANCING]);
        assert_eq!(report.per_class.len(), 2);
        assert_eq!(report.detection_status, "Analysis Failed");
        assert_eq!(report.provenance, Provenance::Fallback);
        assert!(float_eq(report.confidence_score, 0.0));
    }
}
