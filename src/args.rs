// 该文件是 Tianmu （天目） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use tianmu::scenario::DEFAULT_SCENARIO;

/// Tianmu 图像分析
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 场景标识，使用 --list 查看全部场景
  #[arg(long, default_value = DEFAULT_SCENARIO, value_name = "ID")]
  pub scenario: String,

  /// 待分析的照片（jpg、jpeg、png、webp）
  #[arg(long, value_name = "PHOTO", required_unless_present = "list")]
  pub input: Option<PathBuf>,

  /// 标注图像的保存路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// AI 后端，例如 `gemini` 或 `gemini://gemini-2.5-flash`
  #[arg(long, env = "AI_PROVIDER", default_value = "gemini", value_name = "BACKEND")]
  pub backend: String,

  /// Gemini API 密钥
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, value_name = "KEY")]
  pub api_key: Option<String>,

  /// 覆盖 AI 服务地址
  #[arg(long, env = "GEMINI_ENDPOINT", value_name = "URL")]
  pub endpoint: Option<Url>,

  /// AI 请求超时（秒）
  #[arg(long, default_value = "120", value_name = "SECONDS")]
  pub timeout: u64,

  /// 作业批改的标准答案，按题号顺序用逗号分隔
  #[arg(long, value_delimiter = ',', value_name = "ANSWERS")]
  pub answers: Vec<String>,

  /// 通过 OpenStreetMap 反查拍摄地点
  #[arg(long)]
  pub geocode: bool,

  /// 以 JSON 输出完整结果
  #[arg(long)]
  pub json: bool,

  /// 列出全部场景
  #[arg(long)]
  pub list: bool,

  /// 最近一次错误的记录文件
  #[arg(long, default_value = "last_error.log", value_name = "FILE")]
  pub error_log: PathBuf,
}
