// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model/labels.rs - 类别标签列表
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
use tracing::info;

use super::{ModelError, ModelShape};

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

/// 与概率向量下标一一对应的类别名称，启动时加载一次，之后只读
#[derive(Debug, Clone)]
pub struct Labels {
  names: Box<[String]>,
}

impl Labels {
  /// 每行一个类别名称
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let labels = Self::parse(&content)?;
    info!("从 {} 加载 {} 个类别标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn parse(content: &str) -> Result<Self, LabelsError> {
    let names: Vec<String> = content
      .lines()
      .map(|line| line.trim_end().to_string())
      .filter(|line| !line.is_empty())
      .collect();
    if names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  /// 标签数量必须与模型输出的类别数一致
  pub fn check(&self, shape: &ModelShape) -> Result<(), ModelError> {
    if self.len() != shape.class_count {
      return Err(ModelError::shape_mismatch(
        "标签列表",
        shape.class_count,
        self.len(),
      ));
    }
    Ok(())
  }
}

impl<S: Into<String>> FromIterator<S> for Labels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_one_label_per_line() {
    let labels = Labels::parse("Apple___Apple_scab\r\nApple___healthy\n\n").unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get(0), Some("Apple___Apple_scab"));
    assert_eq!(labels.get(1), Some("Apple___healthy"));
    assert_eq!(labels.get(2), None);
  }

  #[test]
  fn empty_file_is_rejected() {
    assert!(matches!(Labels::parse("\n\n"), Err(LabelsError::Empty)));
  }

  #[test]
  fn count_must_match_model_classes() {
    let labels: Labels = ["a", "b", "c"].into_iter().collect();
    let shape = ModelShape {
      class_count: 3,
      ..ModelShape::default()
    };
    assert!(labels.check(&shape).is_ok());
    assert!(matches!(
      labels.check(&ModelShape::default()),
      Err(ModelError::ShapeMismatch { .. })
    ));
  }
}
