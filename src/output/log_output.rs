// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  label::LabelTable,
  model::DetectResult,
  output::{OutputError, Render},
};

/// 只把检测结果写入日志，不输出图像
#[derive(Debug, Default)]
pub struct LogOutput {
  labels: Arc<LabelTable>,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogOutput::default())
  }
}

impl LogOutput {
  pub fn with_labels(mut self, labels: Arc<LabelTable>) -> Self {
    self.labels = labels;
    self
  }
}

impl Render<Frame, DetectResult> for LogOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    info!(
      "帧 {} (时间: {}ms): 检测到 {} 个对象",
      frame.index,
      frame.timestamp_ms,
      result.len()
    );
    for det in result.iter() {
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        self.labels.display_name(det.class_index),
        det.score * 100.0,
        det.center_x,
        det.center_y,
        det.width,
        det.height
      );
    }
    Ok(())
  }
}
