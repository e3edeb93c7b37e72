// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/explain.rs - 类激活热力图生成与叠加
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

//! Grad-CAM 风格的热力图。模型只有一个输出头，无法取得真实梯度，
//! 因此通道权重取特征图在空间上的全局平均值。整个过程只依赖已经取得的
//! 特征图，不会触发推理。

use image::{Rgb, RgbImage, Rgba, RgbaImage, imageops::FilterType};
use tracing::{debug, warn};

use crate::feature::FeatureTensor;

/// 热力图整体透明度（约 40%）
pub const DEFAULT_OVERLAY_OPACITY: f32 = 100.0 / 255.0;
/// 热力图颜色（红色）
pub const HEATMAP_COLOR: [u8; 3] = [255, 0, 0];

/// 每个通道在空间网格上的平均激活值
pub fn channel_weights(features: &FeatureTensor) -> Vec<f32> {
  let shape = features.shape();
  let cells = (shape.height * shape.width) as f32;
  let mut weights = vec![0f32; shape.channels];
  if cells == 0.0 {
    return weights;
  }

  for row in 0..shape.height {
    for col in 0..shape.width {
      for (w, v) in weights.iter_mut().zip(features.cell(row, col)) {
        *w += v;
      }
    }
  }
  for w in weights.iter_mut() {
    *w /= cells;
  }
  weights
}

/// 与特征图空间网格同形状的非负热力图
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl Heatmap {
  /// 加权求和后经过 ReLU 的原始热力图（未归一化）
  pub fn from_features(features: &FeatureTensor) -> Self {
    let shape = features.shape();
    let weights = channel_weights(features);

    let mut data = Vec::with_capacity(shape.height * shape.width);
    for row in 0..shape.height {
      for col in 0..shape.width {
        let raw: f32 = features
          .cell(row, col)
          .iter()
          .zip(&weights)
          .map(|(a, w)| a * w)
          .sum();
        data.push(raw.max(0.0));
      }
    }

    Self {
      height: shape.height,
      width: shape.width,
      data: data.into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn get(&self, row: usize, col: usize) -> f32 {
    self.data[row * self.width + col]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn max(&self) -> f32 {
    self.data.iter().copied().fold(0.0, f32::max)
  }

  pub fn is_blank(&self) -> bool {
    self.data.iter().all(|v| *v == 0.0)
  }

  /// 除以网格最大值映射到 [0, 1]；最大值为 0（或非有限值）时得到空白热力图
  pub fn normalized(&self) -> Self {
    let max = self.max();
    if max <= 0.0 || !max.is_finite() {
      if max != 0.0 {
        warn!("热力图最大值异常: {}，按空白热力图处理", max);
      } else {
        debug!("激活全部为零，生成空白热力图");
      }
      return Self {
        height: self.height,
        width: self.width,
        data: vec![0f32; self.data.len()].into_boxed_slice(),
      };
    }

    Self {
      height: self.height,
      width: self.width,
      data: self.data.iter().map(|v| v / max).collect(),
    }
  }

  /// 在网格分辨率下着色，透明度与强度成正比
  pub fn colorize(&self, color: [u8; 3]) -> RgbaImage {
    let [r, g, b] = color;
    RgbaImage::from_fn(self.width as u32, self.height as u32, |x, y| {
      let intensity = self.get(y as usize, x as usize).clamp(0.0, 1.0);
      Rgba([r, g, b, (intensity * 255.0) as u8])
    })
  }
}

#[derive(Debug, Clone)]
pub struct GradCam {
  opacity: f32,
  color: [u8; 3],
}

impl Default for GradCam {
  fn default() -> Self {
    Self {
      opacity: DEFAULT_OVERLAY_OPACITY,
      color: HEATMAP_COLOR,
    }
  }
}

impl GradCam {
  pub fn with_opacity(mut self, opacity: f32) -> Self {
    self.opacity = opacity.clamp(0.0, 1.0);
    self
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn opacity(&self) -> f32 {
    self.opacity
  }

  /// 归一化后的热力图
  pub fn heatmap(&self, features: &FeatureTensor) -> Heatmap {
    Heatmap::from_features(features).normalized()
  }

  /// 着色、双线性放大到原图尺寸，再以固定透明度叠加到原图上
  pub fn overlay(&self, original: &RgbImage, heatmap: &Heatmap) -> RgbImage {
    let (width, height) = original.dimensions();
    if heatmap.is_blank() || width == 0 || height == 0 {
      return original.clone();
    }

    let colored = heatmap.colorize(self.color);
    let upsampled = if colored.dimensions() == (width, height) {
      colored
    } else {
      image::imageops::resize(&colored, width, height, FilterType::Triangle)
    };

    let mut overlay = original.clone();
    for (x, y, pixel) in overlay.enumerate_pixels_mut() {
      let heat = upsampled.get_pixel(x, y);
      let alpha = heat.0[3] as f32 / 255.0 * self.opacity;
      let blend = |base: u8, top: u8| {
        (base as f32 * (1.0 - alpha) + top as f32 * alpha)
          .round()
          .clamp(0.0, 255.0) as u8
      };
      *pixel = Rgb([
        blend(pixel.0[0], heat.0[0]),
        blend(pixel.0[1], heat.0[1]),
        blend(pixel.0[2], heat.0[2]),
      ]);
    }
    overlay
  }

  pub fn explain(&self, original: &RgbImage, features: &FeatureTensor) -> (Heatmap, RgbImage) {
    let heatmap = self.heatmap(features);
    debug!(
      "热力图 {}x{}, 空白: {}",
      heatmap.width(),
      heatmap.height(),
      heatmap.is_blank()
    );
    let overlay = self.overlay(original, &heatmap);
    (heatmap, overlay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feature::FeatureShape;
  use approx::assert_relative_eq;

  fn tensor(shape: FeatureShape, f: impl Fn(usize, usize, usize) -> f32) -> FeatureTensor {
    let mut data = Vec::with_capacity(shape.len());
    for row in 0..shape.height {
      for col in 0..shape.width {
        for c in 0..shape.channels {
          data.push(f(row, col, c));
        }
      }
    }
    FeatureTensor::from_vec(shape, data).unwrap()
  }

  #[test]
  fn weights_are_spatial_means() {
    let shape = FeatureShape::new(2, 2, 2);
    let features = tensor(shape, |r, c, ch| if ch == 0 { (r * 2 + c) as f32 } else { 1.0 });
    assert_eq!(channel_weights(&features), vec![1.5, 1.0]);
  }

  #[test]
  fn raw_heatmap_is_rectified_weighted_sum() {
    let shape = FeatureShape::new(1, 2, 2);
    // 权重为 [0, 1]: 单元 0 = -1, 单元 1 = 3
    let data = vec![1.0, -1.0, -1.0, 3.0];
    let features = FeatureTensor::from_vec(shape, data).unwrap();
    let heatmap = Heatmap::from_features(&features);
    assert_eq!(heatmap.as_slice(), &[0.0, 3.0]);
  }

  #[test]
  fn all_zero_features_give_blank_heatmap() {
    let features = FeatureTensor::zeros(FeatureShape::new(7, 7, 16));
    let heatmap = GradCam::default().heatmap(&features);
    assert!(heatmap.is_blank());
    assert!(heatmap.as_slice().iter().all(|v| v.is_finite()));
  }

  #[test]
  fn normalized_heatmap_is_scale_invariant() {
    let shape = FeatureShape::new(3, 4, 5);
    let features = tensor(shape, |r, c, ch| ((r * 7 + c * 3 + ch) % 5) as f32 - 1.3);
    let scaled = tensor(shape, |r, c, ch| 3.7 * features.get(r, c, ch));

    let cam = GradCam::default();
    let a = cam.heatmap(&features);
    let b = cam.heatmap(&scaled);
    for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
      assert_relative_eq!(*x, *y, epsilon = 1e-5);
    }
    assert_relative_eq!(a.max(), 1.0);
  }

  #[test]
  fn uniform_activation_gives_uniform_full_heatmap() {
    let features = tensor(FeatureShape::new(2, 2, 4), |_, _, _| 1.0);
    let heatmap = GradCam::default().heatmap(&features);
    assert!(heatmap.as_slice().iter().all(|v| *v == 1.0));
  }

  #[test]
  fn colorize_maps_intensity_to_alpha() {
    let features = FeatureTensor::from_vec(FeatureShape::new(1, 2, 1), vec![1.0, 2.0]).unwrap();
    let heatmap = GradCam::default().heatmap(&features);
    let colored = heatmap.colorize(HEATMAP_COLOR);
    assert_eq!(colored.dimensions(), (2, 1));
    assert_eq!(colored.get_pixel(0, 0), &Rgba([255, 0, 0, 127]));
    assert_eq!(colored.get_pixel(1, 0), &Rgba([255, 0, 0, 255]));
  }

  #[test]
  fn overlay_matches_original_size() {
    let original = RgbImage::from_pixel(31, 17, Rgb([0, 128, 0]));
    let features = tensor(FeatureShape::new(7, 7, 3), |r, c, _| (r + c) as f32);
    let (_, overlay) = GradCam::default().explain(&original, &features);
    assert_eq!(overlay.dimensions(), (31, 17));
    // 热点处偏红，冷点处保持原色
    assert!(overlay.get_pixel(30, 16).0[0] > overlay.get_pixel(0, 0).0[0]);
    assert_eq!(overlay.get_pixel(0, 0), &Rgb([0, 128, 0]));
  }

  #[test]
  fn blank_heatmap_leaves_photo_untouched() {
    let original = RgbImage::from_fn(5, 4, |x, y| Rgb([x as u8 * 40, y as u8 * 50, 7]));
    let features = FeatureTensor::zeros(FeatureShape::new(2, 2, 3));
    let (heatmap, overlay) = GradCam::default().explain(&original, &features);
    assert!(heatmap.is_blank());
    assert_eq!(overlay, original);
  }

  #[test]
  fn full_heat_blends_at_fixed_opacity() {
    let original = RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]));
    let features = tensor(FeatureShape::new(2, 2, 1), |_, _, _| 2.0);
    let cam = GradCam::default().with_opacity(0.5);
    let (_, overlay) = cam.explain(&original, &features);
    assert_eq!(overlay.get_pixel(2, 1), &Rgb([128, 0, 128]));
  }
}
