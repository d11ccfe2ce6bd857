// 该文件是 Tianmu （天目） 项目的一部分。
// src/scenario.rs - 场景注册表
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

use crate::{handler::HandlerKind, preprocess::Preprocessor};

/// 未指定场景时使用的默认场景
pub const DEFAULT_SCENARIO: &str = "vehicles";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.70;

const RULER_JOKE: &str = "😄 This is a joke — I was just curious how many people would try to measure \
                          something with AI. Please use a ruler for actual measurements!";

/// 单个场景的配置，启动时创建，之后只读
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
  pub handler: HandlerKind,
  pub name: String,
  pub description: String,
  /// 取值 0-1，低于该置信度的检测项会被丢弃
  pub confidence_threshold: f64,
  pub show_annotated_image: bool,
  pub show_result_table: bool,
  /// 显示在图像与表格之间的固定文字
  pub constant_text: Option<String>,
  /// 为 false 时处理器不得调用 AI
  pub send_image_to_ai: bool,
  /// 按顺序执行的预处理步骤
  pub preprocessors: Vec<Preprocessor>,
  /// 批改作业时的标准答案
  pub answer_key: Option<Vec<String>>,
}

impl ScenarioConfig {
  pub fn new(handler: HandlerKind, name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      handler,
      name: name.into(),
      description: description.into(),
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      show_annotated_image: true,
      show_result_table: true,
      constant_text: None,
      send_image_to_ai: true,
      preprocessors: vec![Preprocessor::default()],
      answer_key: None,
    }
  }

  pub fn with_threshold(mut self, threshold: f64) -> Self {
    self.confidence_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn with_annotated_image(mut self, show: bool) -> Self {
    self.show_annotated_image = show;
    self
  }

  pub fn with_result_table(mut self, show: bool) -> Self {
    self.show_result_table = show;
    self
  }

  pub fn with_constant_text(mut self, text: impl Into<String>) -> Self {
    let text = text.into();
    self.constant_text = (!text.is_empty()).then_some(text);
    self
  }

  pub fn with_send_image_to_ai(mut self, send: bool) -> Self {
    self.send_image_to_ai = send;
    self
  }

  pub fn with_preprocessors(mut self, preprocessors: Vec<Preprocessor>) -> Self {
    self.preprocessors = preprocessors;
    self
  }

  pub fn with_answer_key(mut self, answer_key: Vec<String>) -> Self {
    self.answer_key = Some(answer_key);
    self
  }

  /// 阈值的百分比形式，用于提示词
  pub fn threshold_percent(&self) -> u32 {
    (self.confidence_threshold * 100.0).round() as u32
  }
}

/// 按插入顺序保存的场景表
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
  entries: Vec<(String, ScenarioConfig)>,
}

impl ScenarioRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册场景，同名场景会被替换但保留原位置
  pub fn register(mut self, id: impl Into<String>, config: ScenarioConfig) -> Self {
    let id = id.into();
    match self.entries.iter_mut().find(|(k, _)| *k == id) {
      Some((_, slot)) => *slot = config,
      None => self.entries.push((id, config)),
    }
    self
  }

  /// 为某个场景设置标准答案，场景不存在时忽略
  pub fn with_answer_key(mut self, id: &str, answer_key: Vec<String>) -> Self {
    if let Some((_, config)) = self.entries.iter_mut().find(|(k, _)| k == id) {
      config.answer_key = Some(answer_key);
    }
    self
  }

  pub fn get(&self, id: &str) -> Option<&ScenarioConfig> {
    self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ScenarioConfig)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 内置场景，按展示顺序排列
  pub fn builtin() -> Self {
    Self::new()
      .register(
        "vehicles",
        ScenarioConfig::new(
          HandlerKind::Vehicles,
          "Vehicle Counting",
          "Count cars, trucks, buses, motorcycles and bicycles by type.",
        ),
      )
      .register(
        "car",
        ScenarioConfig::new(
          HandlerKind::Car,
          "Car Valuation",
          "Identify the car, read the plate, detect violations, and get an estimated market value in USD.",
        ),
      )
      .register(
        "objects",
        ScenarioConfig::new(
          HandlerKind::Objects,
          "Object Detection",
          "Detect and label all large objects in the image.",
        ),
      )
      .register(
        "person",
        ScenarioConfig::new(
          HandlerKind::Person,
          "Person Description",
          "Describe the main person: gender, age, hair, eyes, build, and skin tone.",
        ),
      )
      .register(
        "instruments",
        ScenarioConfig::new(
          HandlerKind::Instruments,
          "Instrument Reading",
          "Read values from gauges, meters, speedometers, and dashboards.",
        ),
      )
      .register(
        "receipt",
        ScenarioConfig::new(
          HandlerKind::Receipt,
          "Receipt Reading",
          "Extract category, items, prices, seller, date/time, and total from a receipt.",
        ),
      )
      .register(
        "satellite",
        ScenarioConfig::new(
          HandlerKind::Satellite,
          "Satellite Image Analysis",
          "Analyze aerial or satellite imagery: landscape, area type, classification, and notable objects.",
        ),
      )
      .register(
        "medicine",
        ScenarioConfig::new(
          HandlerKind::Medicine,
          "Medicine Check",
          "Photo a medicine pack — get the drug name, purpose, dosage, warnings, and price estimate.",
        ),
      )
      .register(
        "recipe",
        ScenarioConfig::new(
          HandlerKind::Recipe,
          "Fridge Recipe",
          "Photo your fridge or table — AI spots the ingredients and suggests a dish with a full recipe.",
        ),
      )
      .register(
        "homework",
        ScenarioConfig::new(
          HandlerKind::Homework,
          "Homework Grading",
          "Photo a worksheet — answers are checked against the answer key and graded.",
        ),
      )
      .register(
        "ruler",
        ScenarioConfig::new(
          HandlerKind::Ruler,
          "Measure Length (cm)",
          "Upload a photo — AI will measure the object length in centimetres.",
        )
        .with_annotated_image(false)
        .with_send_image_to_ai(false)
        .with_preprocessors(Vec::new())
        .with_constant_text(RULER_JOKE),
      )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = ScenarioConfig::new(HandlerKind::Objects, "n", "d");
    assert_eq!(config.confidence_threshold, 0.70);
    assert!(config.show_annotated_image);
    assert!(config.show_result_table);
    assert!(config.send_image_to_ai);
    assert_eq!(config.constant_text, None);
    assert_eq!(config.preprocessors, vec![Preprocessor::default()]);
    assert_eq!(config.threshold_percent(), 70);
  }

  #[test]
  fn test_builtin_order_and_lookup() {
    let registry = ScenarioRegistry::builtin();
    let ids: Vec<&str> = registry.iter().map(|(id, _)| id).collect();
    assert_eq!(ids.first(), Some(&DEFAULT_SCENARIO));
    assert_eq!(ids.last(), Some(&"ruler"));
    assert_eq!(registry.len(), HandlerKind::ALL.len());
    assert!(registry.get("nope").is_none());

    for kind in HandlerKind::ALL {
      assert!(registry.iter().any(|(_, config)| config.handler == kind));
    }
  }

  #[test]
  fn test_ruler_is_offline() {
    let registry = ScenarioRegistry::builtin();
    let ruler = registry.get("ruler").unwrap();
    assert!(!ruler.send_image_to_ai);
    assert!(!ruler.show_annotated_image);
    assert!(ruler.preprocessors.is_empty());
    assert!(ruler.constant_text.is_some());
  }

  #[test]
  fn test_register_replaces_in_place() {
    let registry = ScenarioRegistry::builtin()
      .register(
        "car",
        ScenarioConfig::new(HandlerKind::Car, "Car", "").with_threshold(1.5),
      )
      .with_answer_key("homework", vec!["4".into()]);
    let ids: Vec<&str> = registry.iter().map(|(id, _)| id).collect();
    assert_eq!(ids[1], "car");
    assert_eq!(registry.get("car").unwrap().confidence_threshold, 1.0);
    assert_eq!(
      registry.get("homework").unwrap().answer_key,
      Some(vec!["4".to_string()])
    );
  }
}
