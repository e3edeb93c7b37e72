// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model/replay.rs - 回放已保存的推理结果
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  feature::{FeatureMapError, FeatureTensor, ShortReadPolicy},
  frame::InputTensor,
  model::{Model, ModelError, ModelOutput, ModelShape},
  url_path,
};

pub const PROBABILITIES_FILE: &str = "probabilities.json";
pub const FEATURE_MAP_FILE: &str = "featuremap.raw";

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("概率文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("特征图错误: {0}")]
  FeatureMapError(#[from] FeatureMapError),
}

/// 从转储目录读取概率向量与特征图，作为一次固定的推理结果反复返回
pub struct ReplayModel {
  shape: ModelShape,
  output: ModelOutput,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch.into());
    }

    let shape = ModelShape::from_query(url)?;
    let policy = match url.query_pairs().find(|(k, _)| k == "short_read") {
      Some((_, v)) => v.parse().map_err(ModelError::InvalidQuery)?,
      None => ShortReadPolicy::default(),
    };

    Ok(Self::open(url_path(url), shape, policy)?)
  }
}

impl ReplayModel {
  pub fn open(
    directory: impl AsRef<Path>,
    shape: ModelShape,
    policy: ShortReadPolicy,
  ) -> Result<Self, ReplayModelError> {
    let directory = directory.as_ref();
    info!("加载回放目录: {}", directory.display());

    let content = std::fs::read_to_string(directory.join(PROBABILITIES_FILE))?;
    let probabilities: Vec<f32> = serde_json::from_str(&content)?;
    let features = FeatureTensor::load(directory.join(FEATURE_MAP_FILE), shape.feature, policy)?;
    debug!(
      "回放数据: {} 个类别概率, 特征图 {:?}",
      probabilities.len(),
      features.shape()
    );

    Ok(Self {
      shape,
      output: ModelOutput {
        probabilities: probabilities.into_boxed_slice(),
        features,
      },
    })
  }

  /// 将一次推理结果写入转储目录，格式与 [`ReplayModel::open`] 读取的一致
  pub fn dump(directory: impl AsRef<Path>, output: &ModelOutput) -> Result<(), ReplayModelError> {
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)?;
    let json = serde_json::to_vec(&output.probabilities)?;
    crate::write_atomically(&directory.join(PROBABILITIES_FILE), &json)?;
    output.features.save(directory.join(FEATURE_MAP_FILE))?;
    Ok(())
  }
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn shape(&self) -> &ModelShape {
    &self.shape
  }

  fn infer(&self, input: &InputTensor) -> Result<ModelOutput, Self::Error> {
    debug!("回放推理结果，忽略输入张量 {:?}", input.shape());
    Ok(self.output.clone())
  }
}
