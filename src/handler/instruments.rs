// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/instruments.rs - 仪表读数
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

use serde::Deserialize;

use super::{AnalysisHandler, or_dash};
use crate::{
  model::{Detection, Schema},
  output::ResultRow,
  scenario::ScenarioConfig,
};

pub struct Instruments;

#[derive(Debug, Deserialize)]
pub struct Instrument {
  label: String,
  bbox: Vec<f64>,
  reading: String,
  unit: String,
  confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct Reading {
  parameter: String,
  value: String,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<Instrument>,
  readings: Vec<Reading>,
}

impl AnalysisHandler for Instruments {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Identify the instruments, gauges, meters or dashboard displays in this image.\n\n\
       Only include instruments you can read with at least {}% confidence.\n\n\
       objects: one entry per instrument\n\
       - label: instrument type (e.g. \"speedometer\", \"odometer\", \"gas meter\", \"fuel gauge\")\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - reading: value currently shown, as a string\n\
       - unit: unit of measurement if known, otherwise an empty string\n\
       - confidence: float 0.0 to 1.0\n\n\
       readings: summary rows\n\
       - parameter: descriptive name (e.g. \"Speed\", \"Distance\"); use \"Value\" if unclear\n\
       - value: value with unit (e.g. \"120 km/h\")\n\n\
       Return empty lists if there are no instruments.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      (
        "objects",
        Schema::array_of(Schema::detection_item([
          ("reading", Schema::String),
          ("unit", Schema::String),
        ])),
      ),
      (
        "readings",
        Schema::array_of(Schema::object([
          ("parameter", Schema::String),
          ("value", Schema::String),
        ])),
      ),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response
      .objects
      .iter()
      .map(|i| {
        let label = match (i.reading.trim(), i.unit.trim()) {
          ("", _) => i.label.clone(),
          (reading, "") => format!("{}: {}", i.label, reading),
          (reading, unit) => format!("{}: {} {}", i.label, reading, unit),
        };
        // 颜色按仪表类型区分，不受读数影响
        Detection::new(label, i.bbox.clone())
          .with_group(&i.label)
          .with_confidence(i.confidence)
      })
      .collect()
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    if r.readings.is_empty() {
      return vec![ResultRow::new("Result", "No instruments detected")];
    }
    r.readings
      .iter()
      .map(|reading| ResultRow::new(or_dash(&reading.parameter), or_dash(&reading.value)))
      .collect()
  }
}
