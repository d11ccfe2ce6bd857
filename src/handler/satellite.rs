// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/satellite.rs - 卫星图像分析
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

const MAX_OBJECTS: usize = 15;

pub struct Satellite;

#[derive(Debug, Deserialize)]
pub struct Zone {
  label: String,
  bbox: Vec<f64>,
  confidence: f64,
  count: u32,
}

#[derive(Debug, Deserialize)]
pub struct Analysis {
  landscape_type: String,
  area_type: String,
  classification: String,
  country_region: String,
  description: String,
  notable_objects: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<Zone>,
  analysis: Analysis,
}

impl AnalysisHandler for Satellite {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "This is a satellite or aerial photograph. Analyze it thoroughly.\n\n\
       Only include detections with confidence of at least {}%. \
       Return at most {} objects, the most significant first.\n\n\
       objects: notable objects or zones\n\
       - label: concise name (e.g. \"aircraft\", \"runway\", \"ship\", \"fuel tank\", \"building cluster\")\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: at most 8 words\n\
       - confidence: float 0.0 to 1.0\n\
       - count: number of individual items inside the box (1 for a single object)\n\n\
       analysis:\n\
       - landscape_type: dominant terrain (e.g. \"urban\", \"coastal\", \"arid\", \"forested\")\n\
       - area_type: main function (e.g. \"international airport\", \"commercial seaport\")\n\
       - classification: one of \"civilian\", \"military\", \"industrial\", \"residential\", \
       \"nature\", \"agricultural\", \"mixed\"\n\
       - country_region: likely country or region, empty string if unknown\n\
       - description: 2-3 sentence factual overview\n\
       - notable_objects: list of key findings as short sentences\n\n\
       Use an empty objects list and empty strings if the image is not an aerial view.",
      config.threshold_percent(),
      MAX_OBJECTS
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      (
        "objects",
        Schema::array_of(Schema::detection_item([
          ("description", Schema::String),
          ("count", Schema::Integer),
        ])),
      ),
      (
        "analysis",
        Schema::object([
          ("landscape_type", Schema::String),
          ("area_type", Schema::String),
          ("classification", Schema::String),
          ("country_region", Schema::String),
          ("description", Schema::String),
          ("notable_objects", Schema::array_of(Schema::String)),
        ]),
      ),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response
      .objects
      .iter()
      .take(MAX_OBJECTS)
      .map(|zone| {
        let label = if zone.count > 1 {
          format!("{} ×{}", zone.label, zone.count)
        } else {
          zone.label.clone()
        };
        Detection::new(label, zone.bbox.clone()).with_confidence(zone.confidence)
      })
      .collect()
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    let a = &r.analysis;
    let mut rows = vec![
      ResultRow::new("🌍 Landscape", or_dash(&a.landscape_type)),
      ResultRow::new("🏭 Area type", or_dash(&a.area_type)),
      ResultRow::new("🔖 Classification", or_dash(&a.classification)),
      ResultRow::new("📍 Region", or_dash(&a.country_region)),
      ResultRow::new("📝 Overview", or_dash(&a.description)),
    ];

    let findings: Vec<&String> = a
      .notable_objects
      .iter()
      .filter(|s| !s.trim().is_empty())
      .collect();
    if !findings.is_empty() {
      rows.push(ResultRow::section("Key findings"));
      rows.extend(findings.into_iter().map(|s| ResultRow::new("🔍", s.trim())));
    }
    rows
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_count_suffix() {
    let response: Response = serde_json::from_value(json!({
      "objects": [
        {"label": "aircraft", "bbox": [1, 1, 50, 50], "description": "", "confidence": 0.9, "count": 8},
        {"label": "runway", "bbox": [60, 0, 90, 1000], "description": "", "confidence": 0.9, "count": 1}
      ],
      "analysis": {
        "landscape_type": "arid", "area_type": "airbase", "classification": "military",
        "country_region": "", "description": "An airfield.", "notable_objects": ["8 aircraft on apron"]
      }
    }))
    .unwrap();

    let config = ScenarioConfig::new(crate::handler::HandlerKind::Satellite, "s", "");
    let labels: Vec<String> = Satellite
      .detections(&response, &config)
      .into_iter()
      .map(|d| d.label)
      .collect();
    assert_eq!(labels, ["aircraft ×8", "runway"]);

    let rows = Satellite.table(&response, &[], &config);
    assert_eq!(rows[3].value, "—");
    assert_eq!(rows[5].field, "─── Key findings ───");
    assert_eq!(rows[6].value, "8 aircraft on apron");
  }
}
