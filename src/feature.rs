// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/feature.rs - 特征图张量及其二进制旁路文件
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

//! 特征图旁路文件格式：无文件头、无校验，按 行 -> 列 -> 通道 的顺序
//! 依次写入小端 f32，总长度为 `Hf * Wf * C * 4` 字节。读取方需要事先知道形状。

use std::{fmt, io::ErrorKind, path::Path, str::FromStr};

use thiserror::Error;
use tracing::{debug, warn};

use crate::write_atomically;

const F32_BYTES: usize = 4;

#[derive(Error, Debug)]
pub enum FeatureMapError {
  #[error("特征图 I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("特征图文件长度错误: 期望 {expected} 字节, 实际 {actual} 字节")]
  FormatError { expected: usize, actual: usize },
  #[error("特征图数据长度不匹配: 期望 {expected} 个元素, 实际 {actual} 个")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 特征图形状 [Hf][Wf][C]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl FeatureShape {
  pub const fn new(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
    }
  }

  pub fn len(&self) -> usize {
    self.height * self.width * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn byte_len(&self) -> usize {
    self.len() * F32_BYTES
  }

  /// 元素或字节数溢出 `usize` 时返回 `None`
  pub fn checked_byte_len(&self) -> Option<usize> {
    self
      .height
      .checked_mul(self.width)?
      .checked_mul(self.channels)?
      .checked_mul(F32_BYTES)
  }
}

/// 文件长度不足时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortReadPolicy {
  /// 文件缺失报 I/O 错误，长度不符报格式错误
  #[default]
  Strict,
  /// 缺失或不足的部分以 0 填充
  ZeroFill,
}

impl ShortReadPolicy {
  /// URL 查询参数与命令行使用的名称
  pub fn as_str(&self) -> &'static str {
    match self {
      ShortReadPolicy::Strict => "strict",
      ShortReadPolicy::ZeroFill => "zero-fill",
    }
  }
}

impl fmt::Display for ShortReadPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ShortReadPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "strict" => Ok(ShortReadPolicy::Strict),
      "zero-fill" => Ok(ShortReadPolicy::ZeroFill),
      other => Err(format!("未知的读取策略 '{}'，可选 strict 或 zero-fill", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
  shape: FeatureShape,
  data: Box<[f32]>,
}

impl FeatureTensor {
  pub fn zeros(shape: FeatureShape) -> Self {
    Self {
      shape,
      data: vec![0f32; shape.len()].into_boxed_slice(),
    }
  }

  pub fn from_vec(shape: FeatureShape, data: Vec<f32>) -> Result<Self, FeatureMapError> {
    if data.len() != shape.len() {
      return Err(FeatureMapError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> FeatureShape {
    self.shape
  }

  pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
    self.data[(row * self.shape.width + col) * self.shape.channels + channel]
  }

  /// 某个空间位置上全部通道的激活值
  pub fn cell(&self, row: usize, col: usize) -> &[f32] {
    let start = (row * self.shape.width + col) * self.shape.channels;
    &self.data[start..start + self.shape.channels]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FeatureMapError> {
    let path = path.as_ref();
    let mut bytes = Vec::with_capacity(self.shape.byte_len());
    for value in self.data.iter() {
      bytes.extend_from_slice(&value.to_le_bytes());
    }
    write_atomically(path, &bytes)?;
    debug!(
      "特征图已写入 {} ({} 字节)",
      path.display(),
      bytes.len()
    );
    Ok(())
  }

  pub fn load(
    path: impl AsRef<Path>,
    shape: FeatureShape,
    policy: ShortReadPolicy,
  ) -> Result<Self, FeatureMapError> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound && policy == ShortReadPolicy::ZeroFill => {
        warn!("特征图文件 {} 不存在，使用全零特征图", path.display());
        return Ok(Self::zeros(shape));
      }
      Err(e) => return Err(e.into()),
    };

    let expected = shape.byte_len();
    if bytes.len() != expected {
      match policy {
        ShortReadPolicy::Strict => {
          return Err(FeatureMapError::FormatError {
            expected,
            actual: bytes.len(),
          });
        }
        ShortReadPolicy::ZeroFill => warn!(
          "特征图文件 {} 长度为 {} 字节, 期望 {} 字节, 不足部分以 0 填充",
          path.display(),
          bytes.len(),
          expected
        ),
      }
    }

    let mut data: Vec<f32> = bytes
      .chunks_exact(F32_BYTES)
      .take(shape.len())
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect();
    data.resize(shape.len(), 0.0);

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }
}
