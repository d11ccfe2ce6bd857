// 该文件是 Tianmu （天目） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use std::fmt;

use image::{DynamicImage, imageops::FilterType};
use tracing::debug;

/// 预处理：输入一张图像，输出变换后的图像，不依赖任何外部状态。
pub trait Preprocess {
  fn process(&self, image: DynamicImage) -> DynamicImage;
}

// 默认尺寸上限
pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_MAX_HEIGHT: u32 = 600;

/// 等比缩小到给定范围之内，不放大小图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitWithin {
  pub max_width: u32,
  pub max_height: u32,
}

impl Default for FitWithin {
  fn default() -> Self {
    Self {
      max_width: DEFAULT_MAX_WIDTH,
      max_height: DEFAULT_MAX_HEIGHT,
    }
  }
}

impl Preprocess for FitWithin {
  fn process(&self, image: DynamicImage) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    if w <= self.max_width && h <= self.max_height {
      return image;
    }

    let ratio = (self.max_width as f64 / w as f64).min(self.max_height as f64 / h as f64);
    let new_w = ((w as f64 * ratio) as u32).max(1);
    let new_h = ((h as f64 * ratio) as u32).max(1);
    debug!("缩放图像: {}x{} -> {}x{}", w, h, new_w, new_h);
    image.resize_exact(new_w, new_h, FilterType::Lanczos3)
  }
}

/// 按比例缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale(pub f32);

impl Preprocess for Scale {
  fn process(&self, image: DynamicImage) -> DynamicImage {
    if !self.0.is_finite() || self.0 <= 0.0 {
      return image;
    }
    let new_w = ((image.width() as f32 * self.0).round() as u32).max(1);
    let new_h = ((image.height() as f32 * self.0).round() as u32).max(1);
    image.resize_exact(new_w, new_h, FilterType::Lanczos3)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grayscale;

impl Preprocess for Grayscale {
  fn process(&self, image: DynamicImage) -> DynamicImage {
    DynamicImage::ImageLuma8(image.to_luma8())
  }
}

/// 场景配置中可用的预处理步骤
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preprocessor {
  FitWithin(FitWithin),
  Scale(f32),
  Grayscale,
}

impl Preprocessor {
  pub fn fit_within(max_width: u32, max_height: u32) -> Self {
    Preprocessor::FitWithin(FitWithin {
      max_width,
      max_height,
    })
  }
}

impl Default for Preprocessor {
  fn default() -> Self {
    Preprocessor::FitWithin(FitWithin::default())
  }
}

impl Preprocess for Preprocessor {
  fn process(&self, image: DynamicImage) -> DynamicImage {
    match self {
      Preprocessor::FitWithin(fit) => fit.process(image),
      Preprocessor::Scale(factor) => Scale(*factor).process(image),
      Preprocessor::Grayscale => Grayscale.process(image),
    }
  }
}

impl fmt::Display for Preprocessor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Preprocessor::FitWithin(fit) => write!(f, "fit({}x{})", fit.max_width, fit.max_height),
      Preprocessor::Scale(factor) => write!(f, "scale({})", factor),
      Preprocessor::Grayscale => write!(f, "grayscale"),
    }
  }
}
