// 该文件是 Tianmu （天目） 项目的一部分。
// src/input/metadata.rs - 照片 EXIF 元数据
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

use std::{fs::File, io::BufReader, path::Path};

use exif::{Exif, In, Reader, Tag, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::output::ResultRow;

#[derive(Error, Debug)]
enum MetadataError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("EXIF 错误: {0}")]
  Exif(#[from] exif::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsPosition {
  pub latitude: f64,
  pub longitude: f64,
}

/// 从 EXIF 中提取的拍摄信息，任何字段都可能缺失
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhotoMetadata {
  pub datetime: Option<String>,
  pub gps: Option<GpsPosition>,
  pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataOptions {
  /// 通过 OpenStreetMap Nominatim 反查地址
  pub reverse_geocode: bool,
}

impl PhotoMetadata {
  pub fn is_empty(&self) -> bool {
    self.datetime.is_none() && self.gps.is_none() && self.location.is_none()
  }

  /// 附加到结果表末尾的元数据行
  pub fn rows(&self) -> Vec<ResultRow> {
    let mut rows = Vec::new();
    if let Some(location) = &self.location {
      rows.push(ResultRow::metadata("📍 Photo location", location));
    }
    if let Some(datetime) = &self.datetime {
      rows.push(ResultRow::metadata("📷 Photo date/time", datetime));
    }
    rows
  }
}

/// 度分秒转十进制度，南纬与西经取负
pub fn dms_to_decimal(dms: [f64; 3], reference: &str) -> f64 {
  let decimal = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
  match reference.trim() {
    "S" | "W" => -decimal,
    _ => decimal,
  }
}

fn round6(value: f64) -> f64 {
  (value * 1e6).round() / 1e6
}

/// 读取拍摄时间与 GPS 位置。必须在任何预处理之前调用，缩放后的文件不再包含 EXIF。
///
/// 读取失败不会中断请求，只返回已经取得的部分。
pub fn extract_metadata<P: AsRef<Path>>(path: P, options: MetadataOptions) -> PhotoMetadata {
  let mut metadata = match read_exif(path.as_ref()) {
    Ok(exif) => from_exif(&exif),
    Err(MetadataError::Exif(exif::Error::NotFound(_))) => {
      debug!("图像不含 EXIF: {}", path.as_ref().display());
      PhotoMetadata::default()
    }
    Err(e) => {
      warn!("读取 EXIF 失败 {}: {}", path.as_ref().display(), e);
      PhotoMetadata::default()
    }
  };

  if options.reverse_geocode
    && let Some(gps) = metadata.gps
  {
    metadata.location = reverse_geocode(gps);
  }

  metadata
}

fn read_exif(path: &Path) -> Result<Exif, MetadataError> {
  let mut reader = BufReader::new(File::open(path)?);
  Ok(Reader::new().read_from_container(&mut reader)?)
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
  match &exif.get_field(tag, In::PRIMARY)?.value {
    Value::Ascii(values) => values
      .first()
      .map(|v| String::from_utf8_lossy(v).trim().to_string())
      .filter(|s| !s.is_empty()),
    _ => None,
  }
}

fn dms_field(exif: &Exif, tag: Tag) -> Option<[f64; 3]> {
  match &exif.get_field(tag, In::PRIMARY)?.value {
    Value::Rational(values) if values.len() >= 3 => {
      let mut dms = [0.0; 3];
      for (slot, r) in dms.iter_mut().zip(values) {
        // 分母为零的分量按零处理
        *slot = if r.denom == 0 { 0.0 } else { r.to_f64() };
      }
      Some(dms)
    }
    _ => None,
  }
}

fn from_exif(exif: &Exif) -> PhotoMetadata {
  let datetime =
    ascii_field(exif, Tag::DateTimeOriginal).or_else(|| ascii_field(exif, Tag::DateTime));

  let gps = (|| {
    let lat = dms_field(exif, Tag::GPSLatitude)?;
    let lat_ref = ascii_field(exif, Tag::GPSLatitudeRef)?;
    let lon = dms_field(exif, Tag::GPSLongitude)?;
    let lon_ref = ascii_field(exif, Tag::GPSLongitudeRef)?;
    Some(GpsPosition {
      latitude: round6(dms_to_decimal(lat, &lat_ref)),
      longitude: round6(dms_to_decimal(lon, &lon_ref)),
    })
  })();

  PhotoMetadata {
    datetime,
    gps,
    location: None,
  }
}

#[cfg(feature = "reverse_geocode")]
fn reverse_geocode(gps: GpsPosition) -> Option<String> {
  use std::time::Duration;

  const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";
  const USER_AGENT: &str = concat!("tianmu/", env!("CARGO_PKG_VERSION"), " (non-commercial demo)");

  let client = reqwest::blocking::Client::builder()
    .timeout(Duration::from_secs(5))
    .user_agent(USER_AGENT)
    .build()
    .ok()?;

  let response = client
    .get(NOMINATIM_URL)
    .query(&[
      ("format", "jsonv2".to_string()),
      ("lat", format!("{:.6}", gps.latitude)),
      ("lon", format!("{:.6}", gps.longitude)),
    ])
    .send()
    .and_then(|r| r.error_for_status())
    .and_then(|r| r.json::<serde_json::Value>());

  match response {
    Ok(body) => body
      .get("display_name")
      .and_then(serde_json::Value::as_str)
      .filter(|s| !s.is_empty())
      .map(str::to_string),
    Err(e) => {
      warn!("反查地址失败: {}", e);
      None
    }
  }
}

#[cfg(not(feature = "reverse_geocode"))]
fn reverse_geocode(_gps: GpsPosition) -> Option<String> {
  warn!("未启用 reverse_geocode 特性，跳过地址反查");
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn test_dms_to_decimal() {
    let north = dms_to_decimal([48.0, 51.0, 29.5], "N");
    assert!((north - 48.858194).abs() < 1e-6);
    assert!((dms_to_decimal([2.0, 17.0, 40.2], "W") + 2.294500).abs() < 1e-6);
    assert_eq!(dms_to_decimal([10.0, 30.0, 0.0], "S"), -10.5);
  }

  #[test]
  fn test_rows_order_and_kind() {
    let metadata = PhotoMetadata {
      datetime: Some("2024:05:01 10:00:00".into()),
      gps: Some(GpsPosition {
        latitude: 1.0,
        longitude: 2.0,
      }),
      location: Some("Paris, France".into()),
    };
    let rows = metadata.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, "Paris, France");
    assert_eq!(rows[1].value, "2024:05:01 10:00:00");
    assert!(rows.iter().all(ResultRow::is_metadata));
  }

  #[test]
  fn test_image_without_exif_yields_empty_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.png");
    RgbImage::new(8, 8).save(&path).unwrap();

    let metadata = extract_metadata(&path, MetadataOptions::default());
    assert!(metadata.is_empty());
    assert!(metadata.rows().is_empty());
  }

  #[test]
  fn test_missing_file_does_not_fail() {
    let metadata = extract_metadata("/nonexistent/photo.jpg", MetadataOptions::default());
    assert!(metadata.is_empty());
  }
}
