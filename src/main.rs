// 该文件是 Tianmu （天目） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tianmu::{
  model::{AiClient, AiError, AiSettings},
  output::ResultRow,
  scenario::{ScenarioConfig, ScenarioRegistry},
  task::{AnalysisTask, PipelineOutcome, TaskSettings, record_last_error},
};

const SETUP_GUIDE: &str = "\
AI 后端尚未配置。请按以下步骤设置：

  1. 在 https://aistudio.google.com/apikey 申请 Gemini API 密钥
  2. 设置环境变量：
       export GEMINI_API_KEY=<你的密钥>
       export AI_PROVIDER=gemini            # 可选，默认即为 gemini
  3. 重新运行本程序

不需要 AI 的场景（例如 ruler）无需配置即可运行。";

fn print_scenarios(registry: &ScenarioRegistry) {
  println!("可用场景:");
  for (id, config) in registry.iter() {
    println!("  {:<12} {}", id, config.name);
    println!("  {:<12} {}", "", config.description);
  }
}

fn print_table(rows: &[ResultRow]) {
  let width = rows
    .iter()
    .map(|r| r.field.chars().count())
    .max()
    .unwrap_or(0);
  for row in rows {
    let pad = width - row.field.chars().count();
    let marker = if row.is_metadata() { "*" } else { " " };
    println!("{} {}{}  {}", marker, row.field, " ".repeat(pad), row.value);
  }
}

fn print_outcome(outcome: &PipelineOutcome) {
  println!("{}", outcome.scenario_name);
  println!("==================");
  if let Some(text) = &outcome.constant_text {
    println!("{}", text);
    println!();
  }
  if let Some(rows) = &outcome.result_table {
    print_table(rows);
  }
}

/// 只有需要 AI 的场景才解析后端并检查凭据
fn prepare_client(args: &args::Args, config: &ScenarioConfig) -> Result<AiClient, AiError> {
  if !config.send_image_to_ai {
    return Ok(AiClient::default());
  }

  let mut settings =
    AiSettings::new(AiSettings::parse_backend(&args.backend)?).with_api_key(args.api_key.clone());
  settings.endpoint = args.endpoint.clone();
  settings.timeout = Duration::from_secs(args.timeout);

  let client = AiClient::new(settings);
  client.check()?;
  Ok(client)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  let mut registry = ScenarioRegistry::builtin();
  if !args.answers.is_empty() {
    registry = registry.with_answer_key("homework", args.answers.clone());
  }

  if args.list {
    print_scenarios(&registry);
    return Ok(());
  }

  let input = args.input.as_ref().context("缺少 --input 参数")?;
  let config = registry
    .get(&args.scenario)
    .ok_or_else(|| anyhow!("未知场景: {}，使用 --list 查看全部场景", args.scenario))?;
  let context = format!("scenario={}", args.scenario);

  info!("场景: {} ({})", args.scenario, config.name);
  info!("输入照片: {}", input.display());

  let client = match prepare_client(&args, config) {
    Ok(client) => client,
    Err(e) => {
      if e.is_configuration() {
        eprintln!("{}", SETUP_GUIDE);
      }
      record_last_error(&args.error_log, &context, &e.to_string());
      return Err(e.into());
    }
  };

  let task = AnalysisTask::new(&registry, &client).with_settings(TaskSettings {
    reverse_geocode: args.geocode,
  });
  let outcome = match task.run(&args.scenario, input) {
    Ok(outcome) => outcome,
    Err(e) => {
      record_last_error(&args.error_log, &context, &e.to_string());
      return Err(e.into());
    }
  };

  if let Some(failure) = &outcome.error {
    record_last_error(&args.error_log, &context, &failure.message);
    if args.json {
      println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    return Err(anyhow!("处理失败: {}", failure));
  }

  if args.json {
    println!("{}", serde_json::to_string_pretty(&outcome)?);
  } else {
    print_outcome(&outcome);
  }

  if let Some(path) = &args.output {
    match &outcome.image {
      Some(bytes) => {
        std::fs::write(path, bytes).with_context(|| format!("无法写入 {}", path.display()))?;
        info!("标注图像已保存: {}", path.display());
      }
      None => info!("该场景没有图像输出"),
    }
  }

  Ok(())
}
