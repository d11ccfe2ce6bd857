// 该文件是 Tianmu （天目） 项目的一部分。
// src/task.rs - 单次分析任务
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
  fs,
  io::Write,
  path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{Frame, FrameError},
  handler::{HandlerContext, HandlerFailure},
  input::{MetadataOptions, PhotoMetadata, UploadError, extract_metadata, upload_extension, verify_image},
  model::AiBackend,
  output::{ResultRow, sort_metadata_last},
  scenario::ScenarioRegistry,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("未知场景: {0}")]
  UnknownScenario(String),
  #[error(transparent)]
  Upload(#[from] UploadError),
  #[error("图像处理失败: {0}")]
  Frame(#[from] FrameError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSettings {
  pub reverse_geocode: bool,
}

/// 一次请求的完整结果，临时目录释放前已读入标注图像
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
  pub scenario_id: String,
  pub scenario_name: String,
  pub stem: String,
  pub ext: String,
  pub constant_text: Option<String>,
  /// 实际执行的预处理步骤
  pub preprocess_trail: Vec<String>,
  pub metadata: PhotoMetadata,
  pub error: Option<HandlerFailure>,
  pub result_table: Option<Vec<ResultRow>>,
  pub ai_raw: Value,
  pub prompt: String,
  #[serde(skip)]
  pub image: Option<Vec<u8>>,
}

impl PipelineOutcome {
  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }
}

/// 请求文件名前缀：时间戳加 12 位随机十六进制
pub fn new_stem() -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!(
    "{}_{}",
    chrono::Local::now().format("%Y%m%d_%H%M%S"),
    &suffix[..12]
  )
}

/// 上传 → 元数据 → 预处理 → 场景处理
pub struct AnalysisTask<'a> {
  registry: &'a ScenarioRegistry,
  ai: &'a dyn AiBackend,
  settings: TaskSettings,
}

impl<'a> AnalysisTask<'a> {
  pub fn new(registry: &'a ScenarioRegistry, ai: &'a dyn AiBackend) -> Self {
    Self {
      registry,
      ai,
      settings: TaskSettings::default(),
    }
  }

  pub fn with_settings(mut self, settings: TaskSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn run<P: AsRef<Path>>(&self, scenario_id: &str, upload: P) -> Result<PipelineOutcome, PipelineError> {
    let config = self
      .registry
      .get(scenario_id)
      .ok_or_else(|| PipelineError::UnknownScenario(scenario_id.to_string()))?;
    let ext = upload_extension(upload.as_ref())?;

    // 离开作用域时删除整个目录
    let scratch = tempfile::Builder::new().prefix("tianmu_").tempdir()?;
    let stem = new_stem();
    let original = scratch.path().join(format!("{}.{}", stem, ext));
    fs::copy(upload.as_ref(), &original)?;
    verify_image(&original)?;
    info!("开始任务: 场景 {}，文件 {}", scenario_id, original.display());

    // 预处理会丢弃 EXIF，必须先读取
    let metadata = extract_metadata(
      &original,
      MetadataOptions {
        reverse_geocode: self.settings.reverse_geocode,
      },
    );
    debug!("照片元数据: {:?}", metadata);

    // 无论是否配置预处理都重新编码，AI 与标注看到的是同一张摆正后的图像
    let frame = Frame::open(&original)?.apply_all(&config.preprocessors);
    frame.save(&original)?;
    info!(
      "预处理完成: [{}] -> {}x{}",
      frame.trail().join(" → "),
      frame.width(),
      frame.height()
    );
    let preprocess_trail = frame.trail().to_vec();

    let ctx = HandlerContext {
      original_path: &original,
      scratch_dir: scratch.path(),
      stem: &stem,
      ext: &ext,
      config,
    };
    let now = std::time::Instant::now();
    let result = config.handler.process(&ctx, self.ai);
    info!("场景处理完成，耗时: {:.2?}", now.elapsed());

    let mut outcome = PipelineOutcome {
      scenario_id: scenario_id.to_string(),
      scenario_name: config.name.clone(),
      stem,
      ext,
      constant_text: config.constant_text.clone(),
      preprocess_trail,
      metadata,
      error: result.error().cloned(),
      result_table: None,
      ai_raw: result.ai_raw().clone(),
      prompt: result.prompt().to_string(),
      image: None,
    };

    if let Some(failure) = &outcome.error {
      warn!("场景 {} 处理失败: {}", scenario_id, failure);
      return Ok(outcome);
    }

    let image_path: Option<PathBuf> = match result.annotated_path() {
      Some(path) => Some(path.to_path_buf()),
      None if config.show_annotated_image => {
        debug!("没有标注图像，返回原图");
        Some(original.clone())
      }
      None => None,
    };
    if let Some(path) = image_path {
      outcome.image = Some(fs::read(path)?);
    }

    let mut rows: Vec<ResultRow> = result.result_table().map(<[ResultRow]>::to_vec).unwrap_or_default();
    rows.extend(outcome.metadata.rows());
    sort_metadata_last(&mut rows);
    outcome.result_table = (!rows.is_empty()).then_some(rows);

    Ok(outcome)
  }
}

/// 覆盖写入最近一次失败，不包含用户数据
pub fn record_last_error<P: AsRef<Path>>(path: P, context: &str, message: &str) {
  let write = || -> std::io::Result<()> {
    let mut file = fs::File::create(path.as_ref())?;
    writeln!(
      file,
      "[{}] {}",
      chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
      context
    )?;
    writeln!(file, "{}", message)
  };
  if let Err(e) = write() {
    error!("无法写入错误日志 {}: {}", path.as_ref().display(), e);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    handler::FailureKind,
    model::{AiError, AiReply, Schema},
  };
  use image::{Rgb, RgbImage};
  use serde_json::json;
  use std::cell::Cell;

  struct CountingBackend {
    calls: Cell<usize>,
    reply: Result<Value, AiError>,
  }

  impl AiBackend for CountingBackend {
    fn call(&self, _image: &Path, _prompt: &str, _schema: &Schema) -> Result<AiReply, AiError> {
      self.calls.set(self.calls.get() + 1);
      let value = self.reply.clone()?;
      Ok(AiReply::new("mock", value.as_object().cloned().unwrap_or_default()))
    }
  }

  fn upload(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(1600, 1200, Rgb([10, 20, 30])).save(&path).unwrap();
    path
  }

  #[test]
  fn test_stem_format() {
    let stem = new_stem();
    let parts: Vec<&str> = stem.split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].len(), 8);
    assert_eq!(parts[1].len(), 6);
    assert_eq!(parts[2].len(), 12);
    assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_unknown_scenario_and_bad_extension() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ScenarioRegistry::builtin();
    let backend = CountingBackend {
      calls: Cell::new(0),
      reply: Ok(json!({})),
    };
    let task = AnalysisTask::new(&registry, &backend);

    let photo = upload(dir.path(), "photo.png");
    assert!(matches!(
      task.run("nope", &photo),
      Err(PipelineError::UnknownScenario(_))
    ));

    let text = dir.path().join("notes.txt");
    fs::write(&text, "hello").unwrap();
    assert!(matches!(
      task.run("objects", &text),
      Err(PipelineError::Upload(UploadError::UnsupportedExtension(_)))
    ));
    assert_eq!(backend.calls.get(), 0);
  }

  #[test]
  fn test_default_fit_and_image_returned() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ScenarioRegistry::builtin();
    let backend = CountingBackend {
      calls: Cell::new(0),
      reply: Ok(json!({"objects": []})),
    };
    let outcome = AnalysisTask::new(&registry, &backend)
      .run("objects", upload(dir.path(), "photo.png"))
      .unwrap();

    assert!(outcome.is_success());
    assert_eq!(backend.calls.get(), 1);
    assert_eq!(outcome.preprocess_trail, ["fit(800x600)"]);
    let image = image::load_from_memory(outcome.image.as_deref().unwrap()).unwrap();
    assert_eq!((image.width(), image.height()), (800, 600));
    assert_eq!(
      outcome.result_table.unwrap(),
      [ResultRow::new("Total objects", "0")]
    );
  }

  #[test]
  fn test_ruler_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ScenarioRegistry::builtin();
    let backend = CountingBackend {
      calls: Cell::new(0),
      reply: Err(AiError::NotConfigured("no key".into())),
    };
    let outcome = AnalysisTask::new(&registry, &backend)
      .run("ruler", upload(dir.path(), "photo.jpg"))
      .unwrap();

    assert!(outcome.is_success());
    assert_eq!(backend.calls.get(), 0);
    assert!(outcome.preprocess_trail.is_empty());
    assert!(outcome.image.is_none());
    assert!(outcome.constant_text.is_some());
  }

  #[test]
  fn test_handler_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ScenarioRegistry::builtin();
    let backend = CountingBackend {
      calls: Cell::new(0),
      reply: Err(AiError::Rejected {
        status: 429,
        message: "quota".into(),
      }),
    };
    let outcome = AnalysisTask::new(&registry, &backend)
      .run("car", upload(dir.path(), "photo.png"))
      .unwrap();

    assert_eq!(outcome.error.as_ref().unwrap().kind, FailureKind::Rejected);
    assert!(outcome.image.is_none());
    assert!(outcome.result_table.is_none());
  }

  #[test]
  fn test_record_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("last_error.log");
    record_last_error(&log, "scenario=car", "first");
    record_last_error(&log, "scenario=car", "second");
    let content = fs::read_to_string(&log).unwrap();
    assert!(content.contains("scenario=car"));
    assert!(content.contains("second"));
    assert!(!content.contains("first"));
  }
}
