// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/rank.rs - Top-K 类别排序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Labels;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
  pub class_index: usize,
  pub label: String,
  /// 模型输出的原始概率，不在 Top-K 内重新归一化
  pub confidence: f32,
}

/// 概率降序，概率相同（含 -0.0 与 0.0）时下标小者在前；NaN 视为最小
fn rank_order(probs: &[f32], a: usize, b: usize) -> Ordering {
  let key = |i: usize| {
    let p = probs[i];
    if p.is_nan() {
      f32::NEG_INFINITY
    } else if p == 0.0 {
      // -0.0 与 0.0 相等，按下标排序
      0.0
    } else {
      p
    }
  };
  key(b).total_cmp(&key(a)).then(a.cmp(&b))
}

/// 返回概率最高的 k 个类别下标（k 超过类别数时返回全部）
pub fn top_k_indices(probs: &[f32], k: usize) -> Vec<usize> {
  let k = k.min(probs.len());
  if k == 0 {
    return Vec::new();
  }

  let mut indices: Vec<usize> = (0..probs.len()).collect();
  if k < indices.len() {
    indices.select_nth_unstable_by(k - 1, |&a, &b| rank_order(probs, a, b));
    indices.truncate(k);
  }
  indices.sort_unstable_by(|&a, &b| rank_order(probs, a, b));
  indices
}

pub fn top_k(probs: &[f32], k: usize, labels: &Labels) -> Vec<RankedPrediction> {
  if k > probs.len() {
    warn!("k={} 超过类别数 {}，返回全部类别", k, probs.len());
  }

  top_k_indices(probs, k)
    .into_iter()
    .map(|class_index| RankedPrediction {
      class_index,
      label: labels
        .get(class_index)
        .map(str::to_string)
        .unwrap_or_else(|| format!("class_{}", class_index)),
      confidence: probs[class_index],
    })
    .collect()
}
