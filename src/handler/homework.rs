// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/homework.rs - 作业批改
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

use super::{AnalysisHandler, DASH, HandlerError};
use crate::{
  model::{Detection, Schema},
  output::{ResultRow, draw::ColorMap},
  scenario::ScenarioConfig,
};

const CORRECT: &str = "correct";
const INCORRECT: &str = "incorrect";

pub struct Homework;

#[derive(Debug, Deserialize)]
pub struct Answer {
  question: u32,
  answer: String,
  bbox: Vec<f64>,
  confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  answers: Vec<Answer>,
}

/// 忽略大小写与多余空白
fn normalize(answer: &str) -> String {
  answer
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn answer_key(config: &ScenarioConfig) -> &[String] {
  config.answer_key.as_deref().unwrap_or_default()
}

/// 题号从 1 开始
fn expected_for<'a>(key: &'a [String], question: u32) -> Option<&'a str> {
  let index = (question as usize).checked_sub(1)?;
  key.get(index).map(String::as_str)
}

pub fn letter_grade(percent: f64) -> char {
  match percent {
    p if p >= 90.0 => 'A',
    p if p >= 80.0 => 'B',
    p if p >= 70.0 => 'C',
    p if p >= 60.0 => 'D',
    _ => 'F',
  }
}

impl AnalysisHandler for Homework {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "This is a photo of a homework sheet with {} numbered questions.\n\n\
       Read the answer written for each question. Only include answers you can read \
       with at least {}% confidence.\n\n\
       answers: one entry per answered question\n\
       - question: question number, starting at 1\n\
       - answer: the written answer exactly as it appears\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000 around the answer\n\
       - confidence: float 0.0 to 1.0\n\n\
       Do not correct or judge the answers. Return an empty list if nothing is readable.",
      answer_key(config).len(),
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([(
      "answers",
      Schema::array_of(Schema::object([
        ("question", Schema::Integer),
        ("answer", Schema::String),
        ("bbox", Schema::array_of(Schema::Integer)),
        ("confidence", Schema::Number),
      ])),
    )])
  }

  fn prepare(&self, config: &ScenarioConfig) -> Result<(), HandlerError> {
    if answer_key(config).is_empty() {
      return Err(HandlerError::Domain("未提供标准答案，无法批改作业".to_string()));
    }
    Ok(())
  }

  /// 按正误着色，题号不在标准答案中的使用默认颜色
  fn detections(&self, response: &Response, config: &ScenarioConfig) -> Vec<Detection> {
    let key = answer_key(config);
    response
      .answers
      .iter()
      .map(|a| {
        let detection = Detection::new(format!("Q{}: {}", a.question, a.answer.trim()), a.bbox.clone())
          .with_confidence(a.confidence);
        match expected_for(key, a.question) {
          Some(expected) if normalize(&a.answer) == normalize(expected) => detection.with_group(CORRECT),
          Some(_) => detection.with_group(INCORRECT),
          None => detection,
        }
      })
      .collect()
  }

  fn colors(&self, _detections: &[Detection]) -> ColorMap {
    ColorMap::from_pairs(&[
      (CORRECT, Rgb([0x00, 0xC8, 0x53])),
      (INCORRECT, Rgb([0xFF, 0x17, 0x44])),
    ])
  }

  fn table(&self, r: &Response, _kept: &[Detection], config: &ScenarioConfig) -> Vec<ResultRow> {
    let key = answer_key(config);
    let threshold = config.confidence_threshold;

    let mut correct = 0usize;
    let mut rows = Vec::with_capacity(key.len() + 2);
    for (i, expected) in key.iter().enumerate() {
      let question = i as u32 + 1;
      // 低于阈值的答案按未作答处理
      let answer = r
        .answers
        .iter()
        .find(|a| a.question == question && a.confidence >= threshold);
      let value = match answer {
        Some(a) if normalize(&a.answer) == normalize(expected) => {
          correct += 1;
          format!("{} ✓", a.answer.trim())
        }
        Some(a) => format!("{} ✗ (expected {})", a.answer.trim(), expected),
        None => format!("{} ✗ (expected {})", DASH, expected),
      };
      rows.push(ResultRow::new(format!("Q{}", question), value));
    }

    let percent = correct as f64 * 100.0 / key.len().max(1) as f64;
    rows.push(ResultRow::new(
      "Score",
      format!("{}/{} ({}%)", correct, key.len(), percent.round() as u32),
    ));
    rows.push(ResultRow::new("Grade", letter_grade(percent).to_string()));
    rows
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::{FailureKind, HandlerKind, testing::*};
  use serde_json::json;

  fn key() -> Vec<String> {
    vec!["4".into(), "9".into(), "Paris".into()]
  }

  #[test]
  fn test_missing_key_fails_before_ai_call() {
    let ws = Workspace::new();
    let backend = ScriptedBackend::replying(json!({"answers": []}));
    let config = ScenarioConfig::new(HandlerKind::Homework, "h", "");
    let result = HandlerKind::Homework.process(&ws.context(&config), &backend);

    assert_eq!(backend.calls(), 0);
    assert_eq!(result.error().unwrap().kind, FailureKind::Domain);
    assert!(result.result_table().is_none());
  }

  #[test]
  fn test_grading() {
    let ws = Workspace::new();
    let backend = ScriptedBackend::replying(json!({
      "answers": [
        {"question": 1, "answer": "4", "bbox": [100, 100, 150, 200], "confidence": 0.95},
        {"question": 2, "answer": "8", "bbox": [200, 100, 250, 200], "confidence": 0.9},
        {"question": 3, "answer": " paris ", "bbox": [300, 100, 350, 200], "confidence": 0.4}
      ]
    }));
    let config = ScenarioConfig::new(HandlerKind::Homework, "h", "").with_answer_key(key());
    let result = HandlerKind::Homework.process(&ws.context(&config), &backend);
    let table = result.result_table().unwrap();

    assert_eq!(value_of(table, "Q1"), Some("4 ✓"));
    assert_eq!(value_of(table, "Q2"), Some("8 ✗ (expected 9)"));
    assert_eq!(value_of(table, "Q3"), Some("— ✗ (expected Paris)"));
    assert_eq!(value_of(table, "Score"), Some("1/3 (33%)"));
    assert_eq!(value_of(table, "Grade"), Some("F"));
  }

  #[test]
  fn test_detection_groups() {
    let config = ScenarioConfig::new(HandlerKind::Homework, "h", "").with_answer_key(key());
    let response: Response = serde_json::from_value(json!({
      "answers": [
        {"question": 3, "answer": "PARIS", "bbox": [0, 0, 10, 10], "confidence": 0.9},
        {"question": 1, "answer": "5", "bbox": [0, 0, 10, 10], "confidence": 0.9},
        {"question": 7, "answer": "x", "bbox": [0, 0, 10, 10], "confidence": 0.9}
      ]
    }))
    .unwrap();
    let groups: Vec<Option<String>> = Homework
      .detections(&response, &config)
      .into_iter()
      .map(|d| d.group)
      .collect();
    assert_eq!(
      groups,
      [Some(CORRECT.to_string()), Some(INCORRECT.to_string()), None]
    );
  }

  #[test]
  fn test_letter_grade() {
    assert_eq!(letter_grade(100.0), 'A');
    assert_eq!(letter_grade(90.0), 'A');
    assert_eq!(letter_grade(85.0), 'B');
    assert_eq!(letter_grade(70.0), 'C');
    assert_eq!(letter_grade(60.0), 'D');
    assert_eq!(letter_grade(59.9), 'F');
  }
}
