// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/car.rs - 车辆估价
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

use image::Rgb;
use serde::Deserialize;

use super::{AnalysisHandler, BoxItem, DASH, or_dash};
use crate::{
  model::{Detection, Schema},
  output::{ResultRow, draw::ColorMap},
  scenario::ScenarioConfig,
};

const VEHICLE_COLOR: Rgb<u8> = Rgb([0x29, 0x79, 0xFF]);
const PLATE_COLOR: Rgb<u8> = Rgb([0xFF, 0x91, 0x00]);
const OTHER_COLOR: Rgb<u8> = Rgb([0x99, 0x99, 0x99]);

pub struct CarValuation;

#[derive(Debug, Deserialize)]
pub struct Violation {
  #[serde(rename = "type")]
  kind: String,
  probability: f64,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<BoxItem>,
  make: String,
  model: String,
  color: String,
  plate_text: String,
  country: String,
  confidence: f64,
  violations: Vec<Violation>,
  value_usd_from: u64,
  value_usd_to: u64,
  value_note: String,
}

/// 千位分隔，例如 `12,500`
fn with_thousands(value: u64) -> String {
  let digits = value.to_string();
  let mut out = String::with_capacity(digits.len() + digits.len() / 3);
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      out.push(',');
    }
    out.push(ch);
  }
  out
}

fn value_range(from: u64, to: u64) -> String {
  match (from, to) {
    (0, 0) => DASH.to_string(),
    (0, v) | (v, 0) => format!("~${}", with_thousands(v)),
    (a, b) => format!("${} – ${}", with_thousands(a), with_thousands(b)),
  }
}

impl AnalysisHandler for CarValuation {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Find the MAIN vehicle (car, truck or motorcycle) in this image.\n\n\
       objects: items to annotate\n\
       - label: exactly \"vehicle\" or \"license_plate\"\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: plate text or a short vehicle description\n\
       - confidence: float 0.0 to 1.0\n\n\
       make, model, color: manufacturer, model name and body color (empty string if unknown)\n\
       plate_text: license plate number (empty string if unreadable)\n\
       country: country or region inferred from the plate format (empty string if unknown)\n\
       confidence: overall confidence, float 0.0 to 1.0\n\n\
       violations: possible traffic violations visible in the image\n\
       - type: short description (e.g. \"double parking\", \"blocking fire lane\")\n\
       - probability: float 0.0 to 1.0, only include when at least {:.2}\n\n\
       value_usd_from, value_usd_to: estimated current market value range in USD (integers, 0 if unknown)\n\
       value_note: one sentence explaining the estimate\n\n\
       Use empty lists and empty strings when nothing is found.",
      config.confidence_threshold
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      ("objects", Schema::array_of(BoxItem::schema())),
      ("make", Schema::String),
      ("model", Schema::String),
      ("color", Schema::String),
      ("plate_text", Schema::String),
      ("country", Schema::String),
      ("confidence", Schema::Number),
      (
        "violations",
        Schema::array_of(Schema::object([
          ("type", Schema::String),
          ("probability", Schema::Number),
        ])),
      ),
      ("value_usd_from", Schema::Integer),
      ("value_usd_to", Schema::Integer),
      ("value_note", Schema::String),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response.objects.iter().map(BoxItem::to_detection).collect()
  }

  fn colors(&self, _detections: &[Detection]) -> ColorMap {
    ColorMap::from_pairs(&[("vehicle", VEHICLE_COLOR), ("license_plate", PLATE_COLOR)])
  }

  fn default_color(&self) -> Rgb<u8> {
    OTHER_COLOR
  }

  fn table(&self, r: &Response, _kept: &[Detection], config: &ScenarioConfig) -> Vec<ResultRow> {
    let mut rows = vec![
      ResultRow::new("Make", or_dash(&r.make)),
      ResultRow::new("Model", or_dash(&r.model)),
      ResultRow::new("Color", or_dash(&r.color)),
      ResultRow::new("Plate", or_dash(&r.plate_text)),
      ResultRow::new("Country", or_dash(&r.country)),
      ResultRow::new("Confidence", format!("{}%", (r.confidence * 100.0) as u32)),
      ResultRow::new("💰 Est. Value", value_range(r.value_usd_from, r.value_usd_to)),
    ];
    if !r.value_note.trim().is_empty() {
      rows.push(ResultRow::new("Value note", r.value_note.trim()));
    }

    rows.extend(
      r.violations
        .iter()
        .filter(|v| v.probability >= config.confidence_threshold)
        .map(|v| {
          ResultRow::new(
            "⚠ Possible violation",
            format!("{} ({}%)", or_dash(&v.kind), (v.probability * 100.0) as u32),
          )
        }),
    );
    rows
  }
}
