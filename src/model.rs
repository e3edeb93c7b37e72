// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model.rs - 模型网关
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

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl,
  feature::{FeatureShape, FeatureTensor},
  frame::{InputTensor, RGB_CHANNELS},
};

/// 一次推理同时产出的两个结果：类别概率与卷积特征图
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn shape(&self) -> &ModelShape;
  fn infer(&self, input: &InputTensor) -> Result<ModelOutput, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct ModelOutput {
  pub probabilities: Box<[f32]>,
  pub features: FeatureTensor,
}

pub const DEFAULT_INPUT_SIZE: usize = 224;
pub const DEFAULT_CLASS_NUM: usize = 38;
pub const DEFAULT_FEATURE_SHAPE: FeatureShape = FeatureShape::new(7, 7, 1280);

/// 模型声明的输入输出形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
  pub input_height: usize,
  pub input_width: usize,
  pub class_count: usize,
  pub feature: FeatureShape,
}

impl Default for ModelShape {
  fn default() -> Self {
    Self {
      input_height: DEFAULT_INPUT_SIZE,
      input_width: DEFAULT_INPUT_SIZE,
      class_count: DEFAULT_CLASS_NUM,
      feature: DEFAULT_FEATURE_SHAPE,
    }
  }
}

impl ModelShape {
  /// 从 URL 查询参数中读取形状，例如 `?input=224x224&classes=38&feature=7x7x1280`
  pub fn from_query(url: &Url) -> Result<Self, ModelError> {
    let mut shape = Self::default();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "input" => {
          let [h, w] = parse_dims::<2>(&v)?;
          h.checked_mul(w)
            .and_then(|n| n.checked_mul(RGB_CHANNELS * std::mem::size_of::<f32>()))
            .ok_or_else(|| ModelError::InvalidQuery(format!("input={} 过大", v)))?;
          shape.input_height = h;
          shape.input_width = w;
        }
        "classes" => {
          shape.class_count = v
            .parse()
            .map_err(|_| ModelError::InvalidQuery(format!("classes={}", v)))?;
        }
        "feature" => {
          let [h, w, c] = parse_dims::<3>(&v)?;
          let feature = FeatureShape::new(h, w, c);
          feature
            .checked_byte_len()
            .ok_or_else(|| ModelError::InvalidQuery(format!("feature={} 过大", v)))?;
          shape.feature = feature;
        }
        _ => {}
      }
    }
    debug!("模型形状: {:?}", shape);
    Ok(shape)
  }
}

fn parse_dims<const N: usize>(value: &str) -> Result<[usize; N], ModelError> {
  let parts: Vec<usize> = value
    .split('x')
    .map(|p| p.trim().parse::<usize>())
    .collect::<Result<_, _>>()
    .map_err(|_| ModelError::InvalidQuery(value.to_string()))?;
  parts
    .try_into()
    .map_err(|_| ModelError::InvalidQuery(value.to_string()))
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("{what} 形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    what: &'static str,
    expected: String,
    actual: String,
  },
  #[error("模型参数错误: {0}")]
  InvalidQuery(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("回放模型错误: {0}")]
  ReplayModelError(#[from] ReplayModelError),
  #[cfg(feature = "onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxModelError(#[from] OnnxModelError),
  #[error("推理后端错误: {0}")]
  Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl ModelError {
  pub fn shape_mismatch(
    what: &'static str,
    expected: impl std::fmt::Debug,
    actual: impl std::fmt::Debug,
  ) -> Self {
    let err = ModelError::ShapeMismatch {
      what,
      expected: format!("{:?}", expected),
      actual: format!("{:?}", actual),
    };
    error!("{}", err);
    err
  }
}

/// 在推理前后校验张量形状，任何不一致都视为配置错误
pub fn checked_infer<M: Model>(model: &M, input: &InputTensor) -> Result<ModelOutput, ModelError> {
  let shape = model.shape();
  let expected_input = [shape.input_height, shape.input_width, 3];
  if input.shape() != expected_input {
    return Err(ModelError::shape_mismatch(
      "输入张量",
      expected_input,
      input.shape(),
    ));
  }

  let output = model
    .infer(input)
    .map_err(|e| ModelError::Backend(Box::new(e)))?;

  if output.probabilities.len() != shape.class_count {
    return Err(ModelError::shape_mismatch(
      "概率向量",
      shape.class_count,
      output.probabilities.len(),
    ));
  }
  if output.features.shape() != shape.feature {
    return Err(ModelError::shape_mismatch(
      "特征图",
      shape.feature,
      output.features.shape(),
    ));
  }

  Ok(output)
}

mod labels;
pub use self::labels::{Labels, LabelsError};

mod replay;
pub use self::replay::{FEATURE_MAP_FILE, PROBABILITIES_FILE, ReplayModel, ReplayModelError};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelError};

pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ReplayModel::SCHEME => Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?)),
      #[cfg(feature = "onnx")]
      OnnxModel::SCHEME => Ok(ModelWrapper::Onnx(OnnxModel::from_url(url)?)),
      other => {
        error!("不支持的模型方案: {}", other);
        Err(ModelError::SchemeMismatch)
      }
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn shape(&self) -> &ModelShape {
    match self {
      ModelWrapper::Replay(model) => model.shape(),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model.shape(),
    }
  }

  fn infer(&self, input: &InputTensor) -> Result<ModelOutput, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
