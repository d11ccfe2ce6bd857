// 该文件是 Tianmu （天目） 项目的一部分。
// src/frame.rs - 待分析图像帧
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

use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::preprocess::{Preprocess, Preprocessor};

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 一帧待分析的图像，以及已经作用在它上面的预处理步骤。
#[derive(Debug, Clone)]
pub struct Frame {
  image: DynamicImage,
  trail: Vec<String>,
}

impl From<DynamicImage> for Frame {
  fn from(image: DynamicImage) -> Self {
    Self {
      image,
      trail: Vec::new(),
    }
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self::from(DynamicImage::ImageRgb8(image))
  }
}

impl Frame {
  /// 读取图像文件，并按照 EXIF 方向信息摆正。
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameError> {
    let mut decoder = ImageReader::open(path.as_ref())?
      .with_guessed_format()?
      .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    debug!(
      "读取图像 {}: {}x{}",
      path.as_ref().display(),
      image.width(),
      image.height()
    );
    Ok(Self::from(image))
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FrameError> {
    self.image.save(path)?;
    Ok(())
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &DynamicImage {
    &self.image
  }

  /// 已执行的预处理步骤，按执行顺序排列
  pub fn trail(&self) -> &[String] {
    &self.trail
  }

  pub fn apply(self, step: &Preprocessor) -> Self {
    let Frame { image, mut trail } = self;
    let image = step.process(image);
    trail.push(step.to_string());
    Frame { image, trail }
  }

  pub fn apply_all(self, steps: &[Preprocessor]) -> Self {
    steps.iter().fold(self, |frame, step| frame.apply(step))
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    self.image.to_rgb8()
  }
}
