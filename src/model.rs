// 该文件是 Tianmu （天目） 项目的一部分。
// src/model.rs - AI 模型后端
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

use std::{path::Path, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::output::draw::NormalizedBox;

mod schema;
pub use self::schema::{Schema, SchemaViolation};

#[cfg(feature = "gemini_backend")]
mod gemini;
#[cfg(feature = "gemini_backend")]
pub use self::gemini::{GeminiBackend, GeminiBuilder};

/// AI 返回结果中记录模型名称的保留字段
pub const MODEL_KEY: &str = "_model";

pub const DEFAULT_BACKEND: &str = "gemini://gemini-2.5-flash-lite";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AiError {
  #[error("AI 后端未配置: {0}")]
  NotConfigured(String),
  #[error("未知的 AI 后端: {0}")]
  UnknownBackend(String),
  #[error("网络传输失败: {0}")]
  Transport(String),
  #[error("AI 服务拒绝了请求 (HTTP {status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("AI 返回的数据不符合预期结构: {0}")]
  SchemaViolation(String),
  #[error("读取图像失败: {0}")]
  Io(String),
}

impl From<SchemaViolation> for AiError {
  fn from(err: SchemaViolation) -> Self {
    AiError::SchemaViolation(err.to_string())
  }
}

impl AiError {
  /// 配置类错误：调用方应展示配置说明而不是普通错误页
  pub fn is_configuration(&self) -> bool {
    matches!(self, AiError::NotConfigured(_) | AiError::UnknownBackend(_))
  }
}

/// AI 后端返回的结构化结果，包含 [`MODEL_KEY`] 字段
#[derive(Debug, Clone, PartialEq)]
pub struct AiReply {
  payload: Map<String, Value>,
}

impl AiReply {
  pub fn new(model: &str, mut payload: Map<String, Value>) -> Self {
    payload.insert(MODEL_KEY.to_string(), Value::String(model.to_string()));
    Self { payload }
  }

  pub fn model(&self) -> &str {
    self
      .payload
      .get(MODEL_KEY)
      .and_then(Value::as_str)
      .unwrap_or_default()
  }

  /// 解析为场景的强类型结构，失败即视为违反结构
  pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AiError> {
    serde_json::from_value(Value::Object(self.payload.clone()))
      .map_err(|e| AiError::SchemaViolation(e.to_string()))
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.payload)
  }
}

/// AI 后端：输入图像与提示词，按给定结构返回结果
pub trait AiBackend {
  fn call(&self, image_path: &Path, prompt: &str, schema: &Schema) -> Result<AiReply, AiError>;
}

/// 单个检测目标，边界框为 `[y_min, x_min, y_max, x_max]`，范围 0-1000
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub bbox: Vec<f64>,
  pub confidence: Option<f64>,
  /// 颜色分组，缺省时按标签着色
  pub group: Option<String>,
}

impl Detection {
  pub fn new(label: impl Into<String>, bbox: Vec<f64>) -> Self {
    Self {
      label: label.into(),
      bbox,
      confidence: None,
      group: None,
    }
  }

  pub fn with_confidence(mut self, confidence: f64) -> Self {
    self.confidence = Some(confidence);
    self
  }

  pub fn with_group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }

  pub fn normalized_box(&self) -> Option<NormalizedBox> {
    NormalizedBox::from_slice(&self.bbox)
  }

  pub fn color_key(&self) -> String {
    self.group.as_deref().unwrap_or(&self.label).to_lowercase()
  }

  /// 标注文字，置信度大于零时附加百分比
  pub fn caption(&self) -> String {
    match self.confidence {
      Some(c) if c > 0.0 => format!("{} {}%", self.label, (c * 100.0) as u32),
      _ => self.label.clone(),
    }
  }

  /// 未给出置信度的检测项总是保留
  pub fn passes(&self, threshold: f64) -> bool {
    self.confidence.is_none_or(|c| c >= threshold)
  }
}

/// AI 后端配置
#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
  /// 后端地址，方案名决定使用哪个后端，例如 `gemini://gemini-2.5-flash-lite`
  pub backend: Url,
  pub api_key: Option<String>,
  /// 覆盖默认的服务地址
  pub endpoint: Option<Url>,
  pub timeout: Duration,
}

impl Default for AiSettings {
  fn default() -> Self {
    Self {
      backend: default_backend(),
      api_key: None,
      endpoint: None,
      timeout: DEFAULT_TIMEOUT,
    }
  }
}

fn default_backend() -> Url {
  Url::parse(DEFAULT_BACKEND).expect("默认后端地址无效")
}

impl AiSettings {
  pub fn new(backend: Url) -> Self {
    Self {
      backend,
      ..Self::default()
    }
  }

  pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
    self.api_key = api_key.filter(|key| !key.trim().is_empty());
    self
  }

  /// 解析后端选择，兼容 `gemini` / `gemini_api` 这样的简写
  pub fn parse_backend(value: &str) -> Result<Url, AiError> {
    match value.trim() {
      "" | "gemini" | "gemini_api" => Ok(default_backend()),
      other => Url::parse(other).map_err(|_| AiError::UnknownBackend(other.to_string())),
    }
  }
}

/// 按方案名分派的后端集合
pub enum BackendWrapper {
  #[cfg(feature = "gemini_backend")]
  Gemini(GeminiBackend),
}

impl BackendWrapper {
  pub fn from_settings(settings: &AiSettings) -> Result<Self, AiError> {
    match settings.backend.scheme() {
      #[cfg(feature = "gemini_backend")]
      scheme if scheme == <GeminiBuilder as crate::FromUrlWithScheme>::SCHEME => {
        use crate::FromUrl;
        let backend = GeminiBuilder::from_url(&settings.backend)?
          .api_key(settings.api_key.clone())
          .endpoint(settings.endpoint.clone())
          .timeout(settings.timeout)
          .build()?;
        Ok(BackendWrapper::Gemini(backend))
      }
      other => {
        warn!("没有名为 {} 的 AI 后端实现", other);
        Err(AiError::UnknownBackend(settings.backend.to_string()))
      }
    }
  }
}

impl AiBackend for BackendWrapper {
  fn call(&self, image_path: &Path, prompt: &str, schema: &Schema) -> Result<AiReply, AiError> {
    match *self {
      #[cfg(feature = "gemini_backend")]
      BackendWrapper::Gemini(ref backend) => backend.call(image_path, prompt, schema),
    }
  }
}

/// AI 调用分派器：每次调用时按配置解析后端
#[derive(Debug, Clone, Default)]
pub struct AiClient {
  settings: AiSettings,
}

impl AiClient {
  pub fn new(settings: AiSettings) -> Self {
    Self { settings }
  }

  /// 提前检查后端是否存在以及凭据是否齐全
  pub fn check(&self) -> Result<(), AiError> {
    BackendWrapper::from_settings(&self.settings).map(|_| ())
  }

  pub fn call_ai(&self, image_path: &Path, prompt: &str, schema: &Schema) -> Result<AiReply, AiError> {
    let backend = BackendWrapper::from_settings(&self.settings)?;
    info!("调用 AI 后端: {}", self.settings.backend);
    let now = std::time::Instant::now();
    let reply = backend.call(image_path, prompt, schema)?;
    info!("AI 返回结果，模型: {}，耗时: {:.2?}", reply.model(), now.elapsed());
    Ok(reply)
  }
}

impl AiBackend for AiClient {
  fn call(&self, image_path: &Path, prompt: &str, schema: &Schema) -> Result<AiReply, AiError> {
    self.call_ai(image_path, prompt, schema)
  }
}
