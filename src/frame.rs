// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/frame.rs - NHWC 输入张量定义
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

use crate::input::AsNhwcTensor;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 归一化后的 RGB 输入张量，布局为 [H][W][C]，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * height * width;
    Self {
      height,
      width,
      data: vec![0f32; size].into_boxed_slice(),
    }
  }

  pub fn from_vec(height: usize, width: usize, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * height * width;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 返回 [H, W, C]
  pub fn shape(&self) -> [usize; 3] {
    [self.height, self.width, RGB_CHANNELS]
  }

  pub fn get(&self, h: usize, w: usize, c: usize) -> f32 {
    self.data[(h * self.width + w) * RGB_CHANNELS + c]
  }
}

impl AsMut<[f32]> for InputTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl AsNhwcTensor for InputTensor {
  fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_vec_rejects_wrong_length() {
    let err = InputTensor::from_vec(2, 2, vec![0.0; 11]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    ));
  }

  #[test]
  fn indexing_is_row_column_channel() {
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let tensor = InputTensor::from_vec(2, 2, data).unwrap();
    assert_eq!(tensor.shape(), [2, 2, 3]);
    assert_eq!(tensor.get(0, 1, 2), 5.0);
    assert_eq!(tensor.get(1, 0, 0), 6.0);
  }
}
