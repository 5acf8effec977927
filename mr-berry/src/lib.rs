#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供脑部 MRI 肿瘤语义分割结果的结构化后处理:
//! 预处理、离散化、逐类度量、等值面重建与 2D 轮廓提取.
//!
//! 推理模型本身 (网络结构、权重加载) 以及医学影像文件的解码
//! (DICOM / nii) 均不属于本 crate 的职责; 调用方以 [`pipeline::InferenceAdapter`]
//! 注入推理能力, 并以裸 `ndarray` 数组 + 体素间距提供输入.
//!
//! # 数据流
//!
//! 裸数组 → [`preproc`] → 规范体积 → 推理适配器 (外部) → 概率体积 →
//! [`threshold`] → 标签体积 → {[`metrics`], [`mesh`]} →
//! 分析报告 + 网格 + 轮廓. 整条链路由 [`pipeline::Pipeline`] 包裹,
//! 任何阶段失败都会被转换为结构完整的 fallback 报告, 绝不向调用方抛出.
//!
//! # 注意
//!
//! 1. 所有三维数据均按 `(z, h, w)` 轴序组织. 解剖方位术语与轴序的对应关系
//!   是调用方契约, 通过 [`metrics::AxisTerms`] 显式注入, 不做内置假设.
//! 2. 在索引越界等非期望情况下, 程序会直接 panic, 而不会导致内存错误.
//!   As what Rust promises.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 体数据基础结构.
mod data;

pub use data::{MriVolume, Spacing, TumorLabel, VolumeAttr};

pub mod consts;

pub mod error;

pub mod preproc;

pub mod threshold;

pub mod metrics;

pub mod mesh;

pub mod pipeline;

pub mod prelude;
