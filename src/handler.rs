// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler.rs - 场景处理器
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

use std::{
  fmt,
  path::{Path, PathBuf},
};

use image::Rgb;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{Frame, FrameError},
  model::{AiBackend, AiError, Detection, Schema},
  output::{
    ResultRow,
    draw::{ColorMap, DEFAULT_COLOR, Draw, PALETTE, build_color_map},
  },
  scenario::ScenarioConfig,
};

mod car;
mod homework;
mod instruments;
mod medicine;
mod objects;
mod person;
mod recipe;
mod receipt;
mod ruler;
mod satellite;
mod vehicles;

/// 表格中的空值占位
pub const DASH: &str = "—";

/// 处理器一次调用所需的全部输入
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
  /// 已经过预处理的图像
  pub original_path: &'a Path,
  /// 本次请求的临时目录
  pub scratch_dir: &'a Path,
  pub stem: &'a str,
  pub ext: &'a str,
  pub config: &'a ScenarioConfig,
}

impl HandlerContext<'_> {
  pub fn annotated_path(&self) -> PathBuf {
    self
      .scratch_dir
      .join(format!("{}_annotated.{}", self.stem, self.ext))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Configuration,
  Transport,
  Rejected,
  SchemaViolation,
  Domain,
  Image,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerFailure {
  pub kind: FailureKind,
  pub message: String,
}

impl fmt::Display for HandlerFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

#[derive(Error, Debug)]
pub enum HandlerError {
  #[error(transparent)]
  Ai(#[from] AiError),
  #[error("图像处理失败: {0}")]
  Frame(#[from] FrameError),
  #[error("{0}")]
  Domain(String),
}

impl HandlerError {
  pub fn kind(&self) -> FailureKind {
    match self {
      HandlerError::Ai(e) => match e {
        AiError::NotConfigured(_) | AiError::UnknownBackend(_) => FailureKind::Configuration,
        AiError::Transport(_) => FailureKind::Transport,
        AiError::Rejected { .. } => FailureKind::Rejected,
        AiError::SchemaViolation(_) => FailureKind::SchemaViolation,
        AiError::Io(_) => FailureKind::Image,
      },
      HandlerError::Frame(_) => FailureKind::Image,
      HandlerError::Domain(_) => FailureKind::Domain,
    }
  }
}

/// 处理器的返回值。出错时不会带有标注图像与结果表。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResult {
  annotated_path: Option<PathBuf>,
  error: Option<HandlerFailure>,
  result_table: Option<Vec<ResultRow>>,
  ai_raw: Value,
  prompt: String,
}

impl HandlerResult {
  pub fn success(
    annotated_path: Option<PathBuf>,
    result_table: Option<Vec<ResultRow>>,
    ai_raw: Value,
    prompt: impl Into<String>,
  ) -> Self {
    Self {
      annotated_path,
      error: None,
      result_table,
      ai_raw,
      prompt: prompt.into(),
    }
  }

  pub fn failure(err: &HandlerError, prompt: impl Into<String>) -> Self {
    Self {
      annotated_path: None,
      error: Some(HandlerFailure {
        kind: err.kind(),
        message: err.to_string(),
      }),
      result_table: None,
      ai_raw: Value::Object(Map::new()),
      prompt: prompt.into(),
    }
  }

  pub fn annotated_path(&self) -> Option<&Path> {
    self.annotated_path.as_deref()
  }

  pub fn error(&self) -> Option<&HandlerFailure> {
    self.error.as_ref()
  }

  pub fn result_table(&self) -> Option<&[ResultRow]> {
    self.result_table.as_deref()
  }

  pub fn ai_raw(&self) -> &Value {
    &self.ai_raw
  }

  pub fn prompt(&self) -> &str {
    &self.prompt
  }
}

/// 调用 AI 的场景：提示词、返回结构与结果表整形
pub trait AnalysisHandler {
  type Response: DeserializeOwned;

  fn prompt(&self, config: &ScenarioConfig) -> String;

  fn schema(&self) -> Schema;

  /// 需要绘制的检测项，置信度过滤由调用方完成
  fn detections(&self, response: &Self::Response, config: &ScenarioConfig) -> Vec<Detection>;

  fn table(&self, response: &Self::Response, kept: &[Detection], config: &ScenarioConfig) -> Vec<ResultRow>;

  fn colors(&self, detections: &[Detection]) -> ColorMap {
    build_color_map(detections, &PALETTE)
  }

  fn default_color(&self) -> Rgb<u8> {
    DEFAULT_COLOR
  }

  /// 调用 AI 之前的检查
  fn prepare(&self, _config: &ScenarioConfig) -> Result<(), HandlerError> {
    Ok(())
  }

  /// 场景关闭 AI 时的结果表
  fn offline_table(&self, _config: &ScenarioConfig) -> Vec<ResultRow> {
    vec![ResultRow::new("Result", "AI analysis is disabled for this scenario")]
  }
}

/// 执行一次场景处理，所有错误都转换为 [`HandlerResult`] 中的 `error`
pub fn run<H: AnalysisHandler>(handler: &H, ctx: &HandlerContext, ai: &dyn AiBackend) -> HandlerResult {
  let prompt = handler.prompt(ctx.config);
  match analyze(handler, ctx, ai, &prompt) {
    Ok((annotated_path, table, ai_raw)) => {
      let table = ctx.config.show_result_table.then_some(table);
      HandlerResult::success(annotated_path, table, ai_raw, prompt)
    }
    Err(e) => {
      error!("场景处理失败 ({:?}): {}", e.kind(), e);
      HandlerResult::failure(&e, prompt)
    }
  }
}

type Analysis = (Option<PathBuf>, Vec<ResultRow>, Value);

fn analyze<H: AnalysisHandler>(
  handler: &H,
  ctx: &HandlerContext,
  ai: &dyn AiBackend,
  prompt: &str,
) -> Result<Analysis, HandlerError> {
  handler.prepare(ctx.config)?;

  if !ctx.config.send_image_to_ai {
    info!("场景未启用 AI，跳过调用");
    return Ok((None, handler.offline_table(ctx.config), Value::Object(Map::new())));
  }

  let reply = ai.call(ctx.original_path, prompt, &handler.schema())?;
  let response: H::Response = reply.parse()?;

  let threshold = ctx.config.confidence_threshold;
  let all = handler.detections(&response, ctx.config);
  let total = all.len();
  let kept: Vec<Detection> = all.into_iter().filter(|d| d.passes(threshold)).collect();
  debug!("置信度阈值 {:.2}，保留检测项 {}/{}", threshold, kept.len(), total);

  let table = handler.table(&response, &kept, ctx.config);

  let annotated_path = if ctx.config.show_annotated_image {
    Some(annotate(handler, ctx, &kept, reply.model())?)
  } else {
    None
  };

  Ok((annotated_path, table, reply.into_value()))
}

fn annotate<H: AnalysisHandler>(
  handler: &H,
  ctx: &HandlerContext,
  detections: &[Detection],
  model_name: &str,
) -> Result<PathBuf, HandlerError> {
  let mut image = Frame::open(ctx.original_path)?.to_rgb_image();

  let draw = Draw::default();
  draw.draw_boxes(&mut image, detections, &handler.colors(detections), handler.default_color());
  draw.draw_model_label(&mut image, model_name);

  let path = ctx.annotated_path();
  Frame::from(image).save(&path)?;
  info!("标注图像已保存: {}", path.display());
  Ok(path)
}

/// 全部内置处理器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
  Vehicles,
  Car,
  Objects,
  Person,
  Instruments,
  Receipt,
  Satellite,
  Medicine,
  Recipe,
  Homework,
  Ruler,
}

impl HandlerKind {
  pub const ALL: [HandlerKind; 11] = [
    HandlerKind::Vehicles,
    HandlerKind::Car,
    HandlerKind::Objects,
    HandlerKind::Person,
    HandlerKind::Instruments,
    HandlerKind::Receipt,
    HandlerKind::Satellite,
    HandlerKind::Medicine,
    HandlerKind::Recipe,
    HandlerKind::Homework,
    HandlerKind::Ruler,
  ];

  pub fn process(&self, ctx: &HandlerContext, ai: &dyn AiBackend) -> HandlerResult {
    debug!("处理器: {:?}", self);
    match self {
      HandlerKind::Vehicles => run(&vehicles::Vehicles, ctx, ai),
      HandlerKind::Car => run(&car::CarValuation, ctx, ai),
      HandlerKind::Objects => run(&objects::Objects, ctx, ai),
      HandlerKind::Person => run(&person::PersonDescription, ctx, ai),
      HandlerKind::Instruments => run(&instruments::Instruments, ctx, ai),
      HandlerKind::Receipt => run(&receipt::Receipt, ctx, ai),
      HandlerKind::Satellite => run(&satellite::Satellite, ctx, ai),
      HandlerKind::Medicine => run(&medicine::Medicine, ctx, ai),
      HandlerKind::Recipe => run(&recipe::FridgeRecipe, ctx, ai),
      HandlerKind::Homework => run(&homework::Homework, ctx, ai),
      HandlerKind::Ruler => ruler::process(ctx),
    }
  }
}

/// 多数场景共用的检测项结构
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BoxItem {
  pub label: String,
  pub bbox: Vec<f64>,
  pub confidence: f64,
}

impl BoxItem {
  pub fn schema() -> Schema {
    Schema::detection_item([("description", Schema::String)])
  }

  pub fn to_detection(&self) -> Detection {
    Detection::new(&self.label, self.bbox.clone()).with_confidence(self.confidence)
  }
}

pub(crate) fn or_dash(value: &str) -> String {
  let value = value.trim();
  if value.is_empty() { DASH.to_string() } else { value.to_string() }
}

pub(crate) fn capitalize(value: &str) -> String {
  let mut chars = value.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

/// 按首次出现顺序统计每个类别的数量，最后附加总数
pub(crate) fn class_count_rows(detections: &[Detection], total_field: &str) -> Vec<ResultRow> {
  let mut counts: Vec<(String, usize)> = Vec::new();
  for d in detections {
    let key = d.label.trim().to_lowercase();
    match counts.iter_mut().find(|(label, _)| *label == key) {
      Some((_, count)) => *count += 1,
      None => counts.push((key, 1)),
    }
  }

  let mut rows: Vec<ResultRow> = counts
    .into_iter()
    .map(|(label, count)| ResultRow::new(capitalize(&label), count.to_string()))
    .collect();
  rows.push(ResultRow::new(total_field, detections.len().to_string()));
  rows
}
