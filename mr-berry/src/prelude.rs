//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{MriVolume, Spacing, TumorLabel, VolumeAttr};

pub use crate::consts::label::{BRATS_BACKGROUND, BRATS_EDEMA, BRATS_ENHANCING};
pub use crate::consts::{CANONICAL_SHAPE, ISO_LEVEL, MIN_TUMOR_VOXELS};

pub use crate::error::{SegError, SegResult};

pub use crate::preproc::{preprocess, PreprocSpec, Preprocessed};

pub use crate::threshold::{discretize, ProbVolume, SegMode};

pub use crate::metrics::{
    AnalysisReport, AxisTerms, ClassMetrics, MetricsEngine, Provenance,
};

pub use crate::mesh::{reconstruct, SliceContours, TriMesh};

pub use crate::pipeline::{Analysis, InferenceAdapter, Pipeline, PipelineConfig};
