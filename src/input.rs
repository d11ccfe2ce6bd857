// 该文件是 Tianmu （天目） 项目的一部分。
// src/input.rs - 上传图像输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::error;

mod metadata;
pub use self::metadata::{GpsPosition, MetadataOptions, PhotoMetadata, dms_to_decimal, extract_metadata};

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("不支持的文件类型 `{0}`，请上传 JPG、PNG 或 WEBP 图像")]
  UnsupportedExtension(String),
  #[error("上传的文件不是有效的图像: {0}")]
  InvalidImage(image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 取出小写扩展名并检查是否允许上传
pub fn upload_extension<P: AsRef<Path>>(path: P) -> Result<String, UploadError> {
  let path = path.as_ref();
  let ext = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_lowercase)
    .unwrap_or_default();

  if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
    Ok(ext)
  } else {
    Err(UploadError::UnsupportedExtension(
      path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
    ))
  }
}

/// 完整解码一次，确认文件确实是图像，返回尺寸
pub fn verify_image<P: AsRef<Path>>(path: P) -> Result<(u32, u32), UploadError> {
  let image = ImageReader::open(path.as_ref())?
    .with_guessed_format()?
    .decode()
    .map_err(|e| {
      error!("图像校验失败 {}: {}", path.as_ref().display(), e);
      UploadError::InvalidImage(e)
    })?;
  Ok((image.width(), image.height()))
}
