// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/person.rs - 人物描述
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

use super::{AnalysisHandler, or_dash};
use crate::{
  model::{Detection, Schema},
  output::{ResultRow, draw::ColorMap},
  scenario::ScenarioConfig,
};

const PERSON_COLOR: Rgb<u8> = Rgb([0x00, 0xC8, 0x53]);

pub struct PersonDescription;

#[derive(Debug, Deserialize)]
pub struct PersonBox {
  bbox: Vec<f64>,
  confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct Attributes {
  gender: String,
  age_estimate: String,
  hair_color: String,
  eye_color: String,
  height_estimate: String,
  weight_estimate: String,
  skin_tone: String,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  person: PersonBox,
  attributes: Attributes,
}

impl AnalysisHandler for PersonDescription {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Find the MAIN person in the image and describe what is visible.\n\n\
       Only proceed if you can identify the person with at least {}% confidence.\n\n\
       person:\n\
       - label: \"person\"\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - confidence: float 0.0 to 1.0\n\n\
       attributes:\n\
       - gender: \"male\", \"female\" or \"unknown\"\n\
       - age_estimate: age range, e.g. \"25-35 years old\"\n\
       - hair_color, eye_color: color or \"not visible\"\n\
       - height_estimate: e.g. \"average, ~175 cm\"\n\
       - weight_estimate: build, e.g. \"medium build, ~75 kg\"\n\
       - skin_tone: short description\n\n\
       If nobody is visible return an empty bbox [] and empty strings.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      (
        "person",
        Schema::object([
          ("label", Schema::String),
          ("bbox", Schema::array_of(Schema::Integer)),
          ("confidence", Schema::Number),
        ]),
      ),
      (
        "attributes",
        Schema::object([
          ("gender", Schema::String),
          ("age_estimate", Schema::String),
          ("hair_color", Schema::String),
          ("eye_color", Schema::String),
          ("height_estimate", Schema::String),
          ("weight_estimate", Schema::String),
          ("skin_tone", Schema::String),
        ]),
      ),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    // 未找到人物时边界框为空
    if response.person.bbox.len() != 4 {
      return Vec::new();
    }
    vec![Detection::new("person", response.person.bbox.clone()).with_confidence(response.person.confidence)]
  }

  fn colors(&self, _detections: &[Detection]) -> ColorMap {
    ColorMap::from_pairs(&[("person", PERSON_COLOR)])
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    let a = &r.attributes;
    let values = [
      &a.gender,
      &a.age_estimate,
      &a.hair_color,
      &a.eye_color,
      &a.height_estimate,
      &a.weight_estimate,
      &a.skin_tone,
    ];
    if r.person.bbox.is_empty() && values.iter().all(|v| v.trim().is_empty()) {
      return vec![ResultRow::new("Result", "No person detected")];
    }

    vec![
      ResultRow::new("Gender", or_dash(&a.gender)),
      ResultRow::new("Age", or_dash(&a.age_estimate)),
      ResultRow::new("Hair", or_dash(&a.hair_color)),
      ResultRow::new("Eyes", or_dash(&a.eye_color)),
      ResultRow::new("Height", or_dash(&a.height_estimate)),
      ResultRow::new("Build", or_dash(&a.weight_estimate)),
      ResultRow::new("Skin tone", or_dash(&a.skin_tone)),
    ]
  }
}
