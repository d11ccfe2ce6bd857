// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/gemini.rs - Google Gemini 后端
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

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::blocking::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{AiBackend, AiError, AiReply, DEFAULT_TIMEOUT, Schema},
};

const GEMINI_SCHEME: &str = "gemini";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const GEMINI_MAX_OUTPUT_TOKENS: u32 = 16384;
// 解析失败时错误信息中保留的原始响应长度
const RAW_SNIPPET_CHARS: usize = 2000;

pub struct GeminiBuilder {
  model: String,
  api_key: Option<String>,
  endpoint: Option<Url>,
  timeout: Duration,
}

impl FromUrlWithScheme for GeminiBuilder {
  const SCHEME: &'static str = GEMINI_SCHEME;
}

impl FromUrl for GeminiBuilder {
  type Error = AiError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AiError::UnknownBackend(format!(
        "期望后端 '{}', 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    // gemini://<model> 或 gemini:<model>
    let model = url
      .host_str()
      .map(str::to_string)
      .unwrap_or_else(|| url.path().trim_matches('/').to_string());
    let model = if model.is_empty() {
      GEMINI_DEFAULT_MODEL.to_string()
    } else {
      model
    };

    Ok(GeminiBuilder {
      model,
      api_key: None,
      endpoint: None,
      timeout: DEFAULT_TIMEOUT,
    })
  }
}

impl GeminiBuilder {
  pub fn api_key(mut self, api_key: Option<String>) -> Self {
    self.api_key = api_key;
    self
  }

  pub fn endpoint(mut self, endpoint: Option<Url>) -> Self {
    self.endpoint = endpoint;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn build(self) -> Result<GeminiBackend, AiError> {
    let api_key = self
      .api_key
      .filter(|key| !key.trim().is_empty())
      .ok_or_else(|| {
        AiError::NotConfigured("GEMINI_API_KEY 未设置，请在环境变量或命令行参数中提供 API Key".into())
      })?;

    let endpoint = self
      .endpoint
      .map(|url| url.as_str().trim_end_matches('/').to_string())
      .unwrap_or_else(|| GEMINI_ENDPOINT.to_string());

    let client = Client::builder()
      .timeout(self.timeout)
      .build()
      .map_err(|e| AiError::Transport(e.to_string()))?;

    debug!("创建 Gemini 后端: model={}, endpoint={}", self.model, endpoint);
    Ok(GeminiBackend {
      client,
      model: self.model,
      api_key,
      endpoint,
    })
  }
}

pub struct GeminiBackend {
  client: Client,
  model: String,
  api_key: String,
  endpoint: String,
}

impl GeminiBackend {
  pub fn model(&self) -> &str {
    &self.model
  }

  fn request_url(&self) -> String {
    format!(
      "{}/v1beta/models/{}:generateContent",
      self.endpoint, self.model
    )
  }
}

impl AiBackend for GeminiBackend {
  fn call(&self, image_path: &Path, prompt: &str, schema: &Schema) -> Result<AiReply, AiError> {
    let image_bytes = std::fs::read(image_path)
      .map_err(|e| AiError::Io(format!("{}: {}", image_path.display(), e)))?;
    let mime_type = mime_for(image_path);
    info!(
      "发送图像到 Gemini: {} ({}, {} 字节)",
      self.model,
      mime_type,
      image_bytes.len()
    );

    let body = json!({
      "contents": [{
        "parts": [
          { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(&image_bytes) } },
          { "text": prompt },
        ]
      }],
      "generationConfig": {
        "responseMimeType": "application/json",
        "responseSchema": schema.to_json(),
        "maxOutputTokens": GEMINI_MAX_OUTPUT_TOKENS,
      }
    });

    let response = self
      .client
      .post(self.request_url())
      .header("x-goog-api-key", &self.api_key)
      .json(&body)
      .send()
      .map_err(|e| {
        error!("Gemini 请求失败: {}", e);
        AiError::Transport(e.to_string())
      })?;

    let status = response.status();
    let text = response
      .text()
      .map_err(|e| AiError::Transport(e.to_string()))?;

    if !status.is_success() {
      error!("Gemini 返回错误状态 {}", status);
      return Err(AiError::Rejected {
        status: status.as_u16(),
        message: rejection_message(status.as_u16(), &text),
      });
    }

    let envelope: Value = serde_json::from_str(&text)
      .map_err(|e| AiError::SchemaViolation(format!("无法解析 Gemini 响应: {}", e)))?;
    let content = candidate_text(&envelope)?;
    let payload = extract_json_object(&content)?;
    schema.validate(&Value::Object(payload.clone()))?;

    Ok(AiReply::new(&self.model, payload))
  }
}

pub(crate) fn mime_for(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_lowercase);
  match ext.as_deref() {
    Some("png") => "image/png",
    Some("webp") => "image/webp",
    _ => "image/jpeg",
  }
}

/// 取出第一个候选结果的全部文本
fn candidate_text(envelope: &Value) -> Result<String, AiError> {
  if let Some(reason) = envelope
    .pointer("/promptFeedback/blockReason")
    .and_then(Value::as_str)
  {
    return Err(AiError::Rejected {
      status: 200,
      message: format!("请求被 Gemini 拦截: {}", reason),
    });
  }

  let parts = envelope
    .pointer("/candidates/0/content/parts")
    .and_then(Value::as_array)
    .ok_or_else(|| AiError::SchemaViolation("Gemini 响应中没有候选结果".into()))?;

  let text: String = parts
    .iter()
    .filter_map(|part| part.get("text").and_then(Value::as_str))
    .collect();
  if text.trim().is_empty() {
    let finish = envelope
      .pointer("/candidates/0/finishReason")
      .and_then(Value::as_str)
      .unwrap_or("UNKNOWN");
    return Err(AiError::SchemaViolation(format!(
      "Gemini 返回了空内容 (finishReason: {})",
      finish
    )));
  }
  Ok(text)
}

/// 解析 JSON 对象；整体解析失败时退而截取最外层的 `{...}`
fn extract_json_object(text: &str) -> Result<Map<String, Value>, AiError> {
  let parsed = serde_json::from_str::<Value>(text).or_else(|first_err| {
    match (text.find('{'), text.rfind('}')) {
      (Some(start), Some(end)) if start < end => {
        serde_json::from_str::<Value>(&text[start..=end]).map_err(|_| first_err)
      }
      _ => Err(first_err),
    }
  });

  match parsed {
    Ok(Value::Object(map)) => Ok(map),
    Ok(other) => Err(AiError::SchemaViolation(format!(
      "期望 JSON 对象，实际为: {}",
      snippet(&other.to_string())
    ))),
    Err(e) => Err(AiError::SchemaViolation(format!(
      "无法解析为 JSON ({})\n\n--- 原始响应 ---\n{}",
      e,
      snippet(text)
    ))),
  }
}

fn snippet(text: &str) -> String {
  if text.is_empty() {
    return "(空)".into();
  }
  text.chars().take(RAW_SNIPPET_CHARS).collect()
}

/// 生成拒绝原因；配额耗尽时附带建议的重试时间
fn rejection_message(status: u16, body: &str) -> String {
  let parsed: Option<Value> = serde_json::from_str(body).ok();
  let error = parsed.as_ref().and_then(|v| v.get("error"));
  let message = error
    .and_then(|e| e.get("message"))
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| snippet(body));
  let exhausted = status == 429
    || error
      .and_then(|e| e.get("status"))
      .and_then(Value::as_str)
      .is_some_and(|s| s == "RESOURCE_EXHAUSTED");

  if !exhausted {
    return message;
  }

  let retry = error
    .and_then(|e| e.get("details"))
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .find(|d| {
      d.get("@type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.ends_with("RetryInfo"))
    })
    .and_then(|d| d.get("retryDelay"))
    .and_then(Value::as_str);

  match retry {
    Some(delay) => format!("Gemini API 配额已用尽，请在 {} 后重试。{}", delay, message),
    None => format!("Gemini API 配额已用尽，请稍后重试或更换 API Key。{}", message),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_model_from_url() {
    let url = Url::parse("gemini://gemini-2.5-pro").unwrap();
    let backend = GeminiBuilder::from_url(&url)
      .unwrap()
      .api_key(Some("key".into()))
      .build()
      .unwrap();
    assert_eq!(backend.model(), "gemini-2.5-pro");
    assert_eq!(
      backend.request_url(),
      "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
    );

    let bare = Url::parse("gemini:").unwrap();
    let builder = GeminiBuilder::from_url(&bare).unwrap();
    assert_eq!(builder.model, GEMINI_DEFAULT_MODEL);
  }

  #[test]
  fn test_wrong_scheme_and_missing_key() {
    let url = Url::parse("openai://gpt").unwrap();
    assert!(matches!(
      GeminiBuilder::from_url(&url),
      Err(AiError::UnknownBackend(_))
    ));

    let url = Url::parse("gemini://gemini-2.5-flash-lite").unwrap();
    let err = GeminiBuilder::from_url(&url).unwrap().build().err().unwrap();
    assert!(matches!(err, AiError::NotConfigured(_)));
  }

  #[test]
  fn test_mime_for_extension() {
    assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
    assert_eq!(mime_for(Path::new("a.png")), "image/png");
    assert_eq!(mime_for(Path::new("a.webp")), "image/webp");
    assert_eq!(mime_for(Path::new("a")), "image/jpeg");
  }

  #[test]
  fn test_candidate_text_joins_parts() {
    let envelope = json!({
      "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": " 1}"}]}}]
    });
    assert_eq!(candidate_text(&envelope).unwrap(), "{\"a\": 1}");
  }

  #[test]
  fn test_blocked_prompt_is_rejection() {
    let envelope = json!({"promptFeedback": {"blockReason": "SAFETY"}});
    assert!(matches!(
      candidate_text(&envelope),
      Err(AiError::Rejected { status: 200, .. })
    ));
  }

  #[test]
  fn test_extract_json_object_with_noise() {
    let map = extract_json_object("Here you go:\n```json\n{\"objects\": []}\n```").unwrap();
    assert!(map.contains_key("objects"));

    assert!(matches!(
      extract_json_object("no json at all"),
      Err(AiError::SchemaViolation(_))
    ));
    assert!(matches!(
      extract_json_object("[1, 2]"),
      Err(AiError::SchemaViolation(_))
    ));
  }

  #[test]
  fn test_rejection_message_with_retry_delay() {
    let body = json!({
      "error": {
        "code": 429,
        "message": "Quota exceeded",
        "status": "RESOURCE_EXHAUSTED",
        "details": [
          {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
          {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "37s"}
        ]
      }
    })
    .to_string();
    let message = rejection_message(429, &body);
    assert!(message.contains("37s"));
    assert!(message.contains("Quota exceeded"));

    let plain = rejection_message(403, r#"{"error": {"message": "API key not valid"}}"#);
    assert_eq!(plain, "API key not valid");
  }

  use std::{
    io::{Read, Write},
    net::TcpListener,
    path::PathBuf,
    thread::{self, JoinHandle},
  };

  /// 只应答一次的本地 HTTP 服务，返回服务地址与收到的原始请求
  fn serve_once(status: &'static str, body: String) -> (Url, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 4096];
      loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
          let length = text[..split]
            .lines()
            .find_map(|line| {
              let (name, value) = line.split_once(':')?;
              name
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
            })
            .unwrap_or(0);
          if request.len() >= split + 4 + length {
            break;
          }
        }
      }
      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
      );
      stream.write_all(response.as_bytes()).unwrap();
      String::from_utf8_lossy(&request).to_string()
    });
    let url = Url::parse(&format!("http://{}", addr)).unwrap();
    (url, handle)
  }

  fn backend(endpoint: Url) -> GeminiBackend {
    GeminiBuilder::from_url(&Url::parse("gemini://test-model").unwrap())
      .unwrap()
      .api_key(Some("secret-key".into()))
      .endpoint(Some(endpoint))
      .timeout(Duration::from_secs(10))
      .build()
      .unwrap()
  }

  fn photo(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("photo.png");
    image::RgbImage::new(8, 8).save(&path).unwrap();
    path
  }

  fn count_schema() -> Schema {
    Schema::object([("count", Schema::Integer)])
  }

  fn envelope(text: &str) -> String {
    json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}).to_string()
  }

  #[test]
  fn test_call_returns_validated_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (url, server) = serve_once("200 OK", envelope("{\"count\": 3}"));

    let reply = backend(url)
      .call(&photo(&dir), "count things", &count_schema())
      .unwrap();
    assert_eq!(reply.model(), "test-model");
    assert_eq!(reply.into_value()["count"], 3);

    let request = server.join().unwrap();
    let lower = request.to_lowercase();
    assert!(lower.starts_with("post /v1beta/models/test-model:generatecontent"));
    assert!(lower.contains("x-goog-api-key: secret-key"));
    assert!(request.contains("\"mime_type\":\"image/png\""));
    assert!(request.contains("responseSchema"));
    assert!(request.contains("count things"));
  }

  #[test]
  fn test_call_rejects_mismatched_payload() {
    let dir = tempfile::tempdir().unwrap();
    let (url, server) = serve_once("200 OK", envelope("{\"count\": \"many\"}"));

    let err = backend(url)
      .call(&photo(&dir), "count things", &count_schema())
      .unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, AiError::SchemaViolation(ref m) if m.contains("count")));
  }

  #[test]
  fn test_call_maps_quota_error_to_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let body = json!({
      "error": {
        "message": "Quota",
        "status": "RESOURCE_EXHAUSTED",
        "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "9s"}]
      }
    })
    .to_string();
    let (url, server) = serve_once("429 Too Many Requests", body);

    let err = backend(url)
      .call(&photo(&dir), "count things", &count_schema())
      .unwrap_err();
    server.join().unwrap();
    match err {
      AiError::Rejected { status, message } => {
        assert_eq!(status, 429);
        assert!(message.contains("9s"));
        assert!(message.contains("Quota"));
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_call_refused_connection_is_transport() {
    let dir = tempfile::tempdir().unwrap();
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let url = Url::parse(&format!("http://{}", addr)).unwrap();

    let err = backend(url)
      .call(&photo(&dir), "count things", &count_schema())
      .unwrap_err();
    assert!(matches!(err, AiError::Transport(_)));
  }
}
