// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/recipe.rs - 冰箱食谱
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

use super::{AnalysisHandler, BoxItem, DASH, or_dash};
use crate::{
  model::{Detection, Schema},
  output::ResultRow,
  scenario::ScenarioConfig,
};

pub struct FridgeRecipe;

#[derive(Debug, Deserialize)]
pub struct Ingredient {
  name: String,
  quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  items: Vec<BoxItem>,
  dish_name: String,
  cooking_time: String,
  recipe: String,
  ingredients: Vec<Ingredient>,
}

impl AnalysisHandler for FridgeRecipe {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Identify the food products, ingredients and drinks visible in this photo \
       (in a fridge, on a table or anywhere else).\n\n\
       Only include items you can identify with at least {}% confidence.\n\n\
       Then suggest ONE dish that can be cooked from them, assuming basic staples \
       such as salt, oil and water are available.\n\n\
       items: detected products\n\
       - label: product name (e.g. \"tomato\", \"milk\")\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: color, visible quantity or condition\n\
       - confidence: float 0.0 to 1.0\n\n\
       dish_name: suggested dish, empty string if no food was found\n\
       cooking_time: e.g. \"25 minutes\"\n\
       recipe: step-by-step instructions as one text block\n\
       ingredients: full list for the dish, each with name and quantity (e.g. \"200 g\")\n\n\
       Use an empty items list and empty strings if no food is visible.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      ("items", Schema::array_of(BoxItem::schema())),
      ("dish_name", Schema::String),
      ("cooking_time", Schema::String),
      ("recipe", Schema::String),
      (
        "ingredients",
        Schema::array_of(Schema::object([
          ("name", Schema::String),
          ("quantity", Schema::String),
        ])),
      ),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response.items.iter().map(BoxItem::to_detection).collect()
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    let mut rows = vec![
      ResultRow::new("🍽 Suggested Dish", or_dash(&r.dish_name)),
      ResultRow::new("⏱ Cooking Time", or_dash(&r.cooking_time)),
      ResultRow::new("📋 Recipe", or_dash(&r.recipe)),
      ResultRow::section("Ingredients"),
    ];
    if r.ingredients.is_empty() {
      rows.push(ResultRow::new("Ingredients", DASH));
    }
    rows.extend(
      r.ingredients
        .iter()
        .map(|i| ResultRow::new(or_dash(&i.name), or_dash(&i.quantity))),
    );
    rows
  }
}
