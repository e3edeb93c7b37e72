// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/input.rs - 图像输入与输入张量编码
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{InputTensor, RGB_CHANNELS};

pub trait AsNhwcTensor {
  fn as_nhwc(&self) -> &[f32];
}

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("图像无法栅格化: 尺寸 {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
}

/// 将图像拉伸缩放到模型输入尺寸（不裁剪），并按 [H][W][RGB] 写入 0~1 的浮点值
pub fn encode_input(
  image: &RgbImage,
  height: usize,
  width: usize,
) -> Result<InputTensor, InputError> {
  let (src_w, src_h) = image.dimensions();
  if src_w == 0 || src_h == 0 || height == 0 || width == 0 {
    return Err(InputError::EmptyImage {
      width: src_w,
      height: src_h,
    });
  }

  let resized;
  let image = if (src_w as usize, src_h as usize) == (width, height) {
    image
  } else {
    debug!("缩放输入图像: {}x{} -> {}x{}", src_w, src_h, width, height);
    resized = image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle);
    &resized
  };

  let mut tensor = InputTensor::with_shape(height, width);
  let slice = tensor.as_mut();
  for (x, y, pixel) in image.enumerate_pixels() {
    let index = (y as usize * width + x as usize) * RGB_CHANNELS;
    for c in 0..RGB_CHANNELS {
      slice[index + c] = pixel.0[c] as f32 / 255.0;
    }
  }

  Ok(tensor)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn encoded_tensor_has_model_shape_and_unit_range() {
    let image = RgbImage::from_fn(37, 19, |x, y| Rgb([(x * 7) as u8, (y * 13) as u8, 255]));
    let tensor = encode_input(&image, 16, 24).unwrap();

    assert_eq!(tensor.shape(), [16, 24, 3]);
    assert!(tensor.as_nhwc().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn channels_are_written_in_rgb_order() {
    let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
    let tensor = encode_input(&image, 4, 4).unwrap();

    assert_eq!(tensor.get(2, 3, 0), 1.0);
    assert_eq!(tensor.get(2, 3, 1), 0.0);
    assert_eq!(tensor.get(2, 3, 2), 51.0 / 255.0);
  }

  #[test]
  fn stretch_keeps_uniform_colour() {
    let image = RgbImage::from_pixel(3, 3, Rgb([255, 0, 0]));
    let tensor = encode_input(&image, 8, 5).unwrap();

    for h in 0..8 {
      for w in 0..5 {
        assert_eq!(tensor.get(h, w, 0), 1.0);
        assert_eq!(tensor.get(h, w, 1), 0.0);
      }
    }
  }

  #[test]
  fn empty_image_is_rejected() {
    let image = RgbImage::new(0, 0);
    assert!(matches!(
      encode_input(&image, 4, 4),
      Err(InputError::EmptyImage { .. })
    ));
  }
}
