//! 逐层 0.5 等值线提取 (marching squares).
//!
//! 对每个 z 切片在像素网格上提取闭合轮廓折线, 用于二维叠加显示.
//! 输出坐标为 `(h, w)` 像素坐标 (可含 0.5 的半像素), 与切片视图
//! [`crate::TumorLabel::slice_at`] 的索引约定一致.

use std::collections::HashMap;

use ndarray::{ArrayView2, ArrayView3, Axis};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;
    }
}

/// 单个 z 切片的全部闭合轮廓.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceContours {
    /// 切片在体数据中的 z 下标.
    pub slice_index: usize,
    /// 闭合折线集合. 闭合时首尾点相同.
    pub contours: Vec<Vec<[f64; 2]>>,
}

/// 提取掩码中每个含前景切片的 0.5 等值轮廓.
///
/// 全背景切片被跳过, 不在结果中占位.
pub fn extract_contours(mask: ArrayView3<'_, u8>) -> Vec<SliceContours> {
    mask.axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(z, slice)| slice_contours(z, slice))
        .collect()
}

/// [`extract_contours`] 的逐切片并行版本.
#[cfg(feature = "rayon")]
pub fn par_extract_contours(mask: ArrayView3<'_, u8>) -> Vec<SliceContours> {
    let slices: Vec<_> = mask.axis_iter(Axis(0)).enumerate().collect();
    slices
        .into_par_iter()
        .filter_map(|(z, slice)| slice_contours(z, slice))
        .collect()
}

fn slice_contours(z: usize, slice: ArrayView2<'_, u8>) -> Option<SliceContours> {
    if slice.iter().all(|v| *v == 0) {
        return None;
    }
    let segments = collect_segments(slice);
    let contours = chain_segments(segments);
    Some(SliceContours {
        slice_index: z,
        contours,
    })
}

/// 无向等值线段, 端点为 `(h, w)` 像素坐标.
type Segment = ([f64; 2], [f64; 2]);

/// 遍历补零后的 2x2 像素胞, 按 16 种构型产出线段.
fn collect_segments(slice: ArrayView2<'_, u8>) -> Vec<Segment> {
    let (height, width) = slice.dim();
    let at = |h: isize, w: isize| -> bool {
        if h < 0 || w < 0 || h >= height as isize || w >= width as isize {
            false
        } else {
            slice[(h as usize, w as usize)] > 0
        }
    };

    let mut segments = Vec::new();
    for ch in -1..height as isize {
        for cw in -1..width as isize {
            let (fh, fw) = (ch as f64, cw as f64);
            // 四角: tl=(h,w), tr=(h,w+1), br=(h+1,w+1), bl=(h+1,w).
            let case = usize::from(at(ch, cw))
                | usize::from(at(ch, cw + 1)) << 1
                | usize::from(at(ch + 1, cw + 1)) << 2
                | usize::from(at(ch + 1, cw)) << 3;

            // 四边中点.
            let top = [fh, fw + 0.5];
            let right = [fh + 0.5, fw + 1.0];
            let bottom = [fh + 1.0, fw + 0.5];
            let left = [fh + 0.5, fw];

            match case {
                0 | 15 => {}
                1 | 14 => segments.push((left, top)),
                2 | 13 => segments.push((top, right)),
                3 | 12 => segments.push((left, right)),
                4 | 11 => segments.push((right, bottom)),
                6 | 9 => segments.push((top, bottom)),
                7 | 8 => segments.push((bottom, left)),
                // 二值场上的鞍点构型, 取两条分离线段.
                5 => {
                    segments.push((left, top));
                    segments.push((right, bottom));
                }
                10 => {
                    segments.push((top, right));
                    segments.push((bottom, left));
                }
                _ => unreachable!(),
            }
        }
    }
    segments
}

/// 端点坐标的精确键. 所有坐标都是半整数, 乘 2 后取整无损.
#[inline]
fn endpoint_key(p: [f64; 2]) -> (i64, i64) {
    ((p[0] * 2.0).round() as i64, (p[1] * 2.0).round() as i64)
}

/// 将无向线段串接为闭合折线.
fn chain_segments(segments: Vec<Segment>) -> Vec<Vec<[f64; 2]>> {
    // 端点 -> 关联线段下标. 闭合等值线上每个端点恰有两条线段.
    let mut incidence: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, (a, b)) in segments.iter().enumerate() {
        incidence.entry(endpoint_key(*a)).or_default().push(i);
        incidence.entry(endpoint_key(*b)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut contours = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (first, mut cursor) = segments[start];
        let mut polyline = vec![first, cursor];

        loop {
            let key = endpoint_key(cursor);
            let next = incidence
                .get(&key)
                .and_then(|ids| ids.iter().copied().find(|i| !used[*i]));
            let Some(next) = next else {
                break;
            };
            used[next] = true;
            let (a, b) = segments[next];
            cursor = if endpoint_key(a) == key { b } else { a };
            polyline.push(cursor);
            if endpoint_key(cursor) == endpoint_key(first) {
                break;
            }
        }
        contours.push(polyline);
    }
    contours
}
