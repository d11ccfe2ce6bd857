// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/medicine.rs - 药品识别
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

use super::{AnalysisHandler, BoxItem, or_dash};
use crate::{
  model::{Detection, Schema},
  output::{ResultRow, draw::ColorMap},
  scenario::ScenarioConfig,
};

pub struct Medicine;

#[derive(Debug, Deserialize)]
pub struct MedicineInfo {
  name: String,
  generic_name: String,
  category: String,
  purpose: String,
  dosage: String,
  instructions: String,
  warnings: String,
  price_estimate: String,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<BoxItem>,
  medicine: MedicineInfo,
}

impl AnalysisHandler for Medicine {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Identify the medicine or pharmaceutical product shown in this image.\n\n\
       Only proceed if you can identify it with at least {}% confidence.\n\n\
       objects: key areas\n\
       - label: \"package\" (box, blister or bottle), \"label\" (text area) or \"barcode\"\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: short description of the area\n\
       - confidence: float 0.0 to 1.0\n\n\
       medicine:\n\
       - name: brand or trade name\n\
       - generic_name: active ingredient\n\
       - category: drug class (e.g. \"antibiotic\", \"antihistamine\")\n\
       - purpose: what it treats, 2-3 sentences\n\
       - dosage: standard adult dosage\n\
       - instructions: how to take it\n\
       - warnings: the most important warnings and side effects\n\
       - price_estimate: approximate retail price range, in USD if the country is unknown\n\n\
       Use an empty objects list and empty strings if no medicine is visible.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      ("objects", Schema::array_of(BoxItem::schema())),
      (
        "medicine",
        Schema::object([
          ("name", Schema::String),
          ("generic_name", Schema::String),
          ("category", Schema::String),
          ("purpose", Schema::String),
          ("dosage", Schema::String),
          ("instructions", Schema::String),
          ("warnings", Schema::String),
          ("price_estimate", Schema::String),
        ]),
      ),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response.objects.iter().map(BoxItem::to_detection).collect()
  }

  fn colors(&self, _detections: &[Detection]) -> ColorMap {
    ColorMap::from_pairs(&[
      ("package", Rgb([0x9B, 0x59, 0xB6])),
      ("label", Rgb([0x34, 0x98, 0xDB])),
      ("barcode", Rgb([0x95, 0xA5, 0xA6])),
    ])
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    let m = &r.medicine;
    vec![
      ResultRow::new("💊 Name", or_dash(&m.name)),
      ResultRow::new("🧪 Active ingredient", or_dash(&m.generic_name)),
      ResultRow::new("📂 Category", or_dash(&m.category)),
      ResultRow::new("🩺 Used for", or_dash(&m.purpose)),
      ResultRow::new("📏 Dosage", or_dash(&m.dosage)),
      ResultRow::new("📋 Instructions", or_dash(&m.instructions)),
      ResultRow::new("⚠ Warnings", or_dash(&m.warnings)),
      ResultRow::new("💰 Price estimate", or_dash(&m.price_estimate)),
    ]
  }
}
