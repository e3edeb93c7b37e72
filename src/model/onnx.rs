// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::{path::Path, sync::Mutex};

use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  feature::{FeatureShape, FeatureTensor},
  frame::InputTensor,
  input::AsNhwcTensor,
  model::{Model, ModelError, ModelOutput, ModelShape},
  url_path,
};

const ONNX_NUM_INPUTS: usize = 1;
const ONNX_NUM_OUTPUTS: usize = 2;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理会话锁已失效")]
  LockPoisoned,
}

pub struct OnnxModel {
  session: Mutex<Session>,
  output_names: [String; ONNX_NUM_OUTPUTS],
  shape: ModelShape,
}

impl FromUrlWithScheme for OnnxModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::SchemeMismatch.into());
    }

    let shape = ModelShape::from_query(url)?;
    Ok(Self::open(url_path(url), shape)?)
  }
}

impl OnnxModel {
  pub fn open(path: impl AsRef<Path>, shape: ModelShape) -> Result<Self, OnnxModelError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());
    let session = Session::builder()?.commit_from_file(path)?;
    info!("模型加载完成");

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != ONNX_NUM_INPUTS || num_outputs != ONNX_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        ONNX_NUM_INPUTS, ONNX_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(OnnxModelError::ModelInvalid(msg));
    }

    let output_names = [
      session.outputs[0].name.clone(),
      session.outputs[1].name.clone(),
    ];

    Ok(Self {
      session: Mutex::new(session),
      output_names,
      shape,
    })
  }
}

/// 根据元素数量区分概率输出与特征图输出，模型导出时两者的顺序并不固定
fn match_prob_feature_tensors<'a>(
  tensor1: (&'a [i64], &'a [f32]),
  tensor2: (&'a [i64], &'a [f32]),
  shape: &ModelShape,
) -> Option<((&'a [i64], &'a [f32]), (&'a [i64], &'a [f32]))> {
  let prob_expected = shape.class_count;
  let feature_expected = shape.feature.len();
  if tensor1.1.len() == prob_expected && tensor2.1.len() == feature_expected {
    debug!("输出顺序正常: 第 0 个是概率, 第 1 个是特征图");
    Some((tensor1, tensor2))
  } else if tensor1.1.len() == feature_expected && tensor2.1.len() == prob_expected {
    debug!("输出顺序交换: 第 0 个是特征图, 第 1 个是概率");
    Some((tensor2, tensor1))
  } else {
    error!(
      "输出大小不匹配 - 张量1: {}, 张量2: {}, 期望概率: {}, 期望特征图: {}",
      tensor1.1.len(),
      tensor2.1.len(),
      prob_expected,
      feature_expected
    );
    None
  }
}

/// 特征图可能以 NCHW 导出，统一转换为 [H][W][C]
fn to_hwc(dims: &[i64], data: &[f32], shape: FeatureShape) -> Vec<f32> {
  let FeatureShape {
    height,
    width,
    channels,
  } = shape;
  let nchw = [1, channels as i64, height as i64, width as i64];
  let nhwc = [1, height as i64, width as i64, channels as i64];
  if dims == nchw && nchw != nhwc {
    debug!("特征图为 NCHW 布局，转换为 NHWC");
    let mut out = vec![0f32; data.len()];
    for c in 0..channels {
      for h in 0..height {
        for w in 0..width {
          out[(h * width + w) * channels + c] = data[(c * height + h) * width + w];
        }
      }
    }
    out
  } else {
    data.to_vec()
  }
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn shape(&self) -> &ModelShape {
    &self.shape
  }

  fn infer(&self, input: &InputTensor) -> Result<ModelOutput, Self::Error> {
    debug!("设置模型输入");
    let [h, w, c] = input.shape();
    let value = Tensor::from_array(([1usize, h, w, c], input.as_nhwc().to_vec()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxModelError::LockPoisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![value])?;

    debug!("获取模型输出");
    let (dims1, data1) = outputs[self.output_names[0].as_str()].try_extract_tensor::<f32>()?;
    let (dims2, data2) = outputs[self.output_names[1].as_str()].try_extract_tensor::<f32>()?;
    let dims1: Vec<i64> = dims1.iter().copied().collect();
    let dims2: Vec<i64> = dims2.iter().copied().collect();

    let ((_, probs), (feature_dims, features)) =
      match_prob_feature_tensors((&dims1[..], data1), (&dims2[..], data2), &self.shape).ok_or_else(
        || OnnxModelError::ModelInvalid("无法识别模型输出".to_string()),
      )?;

    let features = FeatureTensor::from_vec(
      self.shape.feature,
      to_hwc(feature_dims, features, self.shape.feature),
    )
    .map_err(|e| OnnxModelError::ModelInvalid(e.to_string()))?;

    Ok(ModelOutput {
      probabilities: probs.to_vec().into_boxed_slice(),
      features,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nchw_features_are_transposed() {
    let shape = FeatureShape::new(1, 2, 3);
    // c0: [0, 1], c1: [2, 3], c2: [4, 5]
    let data = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let out = to_hwc(&[1, 3, 1, 2], &data, shape);
    assert_eq!(out, vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
  }

  #[test]
  fn nhwc_features_are_kept() {
    let shape = FeatureShape::new(1, 2, 3);
    let data = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    assert_eq!(to_hwc(&[1, 1, 2, 3], &data, shape), data.to_vec());
  }

  #[test]
  fn outputs_are_matched_by_size() {
    let shape = ModelShape {
      class_count: 2,
      feature: FeatureShape::new(1, 1, 3),
      ..ModelShape::default()
    };
    let probs = [0.3f32, 0.7];
    let feats = [1.0f32, 2.0, 3.0];
    let (p, f) = match_prob_feature_tensors(
      (&[1i64, 3][..], &feats[..]),
      (&[1i64, 2][..], &probs[..]),
      &shape,
    )
    .unwrap();
    assert_eq!(p.1, &probs[..]);
    assert_eq!(f.1, &feats[..]);
    assert!(
      match_prob_feature_tensors((&[1i64][..], &feats[..]), (&[1i64][..], &feats[..]), &shape)
        .is_none()
    );
  }
}
