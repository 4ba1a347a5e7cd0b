// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
};

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  label::LabelTable,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError, DrawStyle},
  },
  query_flag, query_value,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制样式错误: {0}")]
  DrawError(#[from] DrawError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
  /// 保存绘制后的图像
  Draw,
  /// 保存原始图像和 JSON 记录，记录中带类别名称
  RecordName,
  /// 保存原始图像和 JSON 记录，只带类别编号
  RecordId,
}

#[derive(Serialize)]
struct DetectionRecord<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  label: Option<&'a str>,
  class_index: i64,
  score: f32,
  /// [x_min, y_min, x_max, y_max]，像素坐标
  bbox: [f32; 4],
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  frame_index: u64,
  timestamp_ms: u64,
  width: u32,
  height: u32,
  detections: Vec<DetectionRecord<'a>>,
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  mode: RecordMode,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = match query_value(uri, "record").as_deref() {
      None => RecordMode::Draw,
      Some("id") => RecordMode::RecordId,
      Some(_) => RecordMode::RecordName,
    };

    Ok(
      DirectoryRecordOutput::new(uri.path(), mode, query_flag(uri, "always"))
        .with_draw(Draw::new(DrawStyle::from_url(uri)?, Arc::default())),
    )
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, mode: RecordMode, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw: Draw::default(),
      mode,
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_labels(mut self, labels: Arc<LabelTable>) -> Self {
    self.draw = self.draw.with_labels(labels);
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// `<dir>/<year>/<month>/<day>/<H-M-S>-<id>.png`
  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:08X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn write_record(
    &self,
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    let labels = self.draw.labels();
    let record = FrameRecord {
      frame_index: frame.index,
      timestamp_ms: frame.timestamp_ms,
      width: frame.width(),
      height: frame.height(),
      detections: result
        .iter()
        .map(|d| DetectionRecord {
          label: match self.mode {
            RecordMode::RecordName => labels.get(d.class_index),
            _ => None,
          },
          class_index: d.class_index,
          score: d.score,
          bbox: d.corners(),
        })
        .collect(),
    };
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match self.mode {
      RecordMode::Draw => {
        self.draw.draw_detection(frame, result).save(&path)?;
      }
      RecordMode::RecordName | RecordMode::RecordId => {
        frame.image.save(&path)?;
        self.write_record(&path, frame, result)?;
      }
    }
    debug!("记录帧 {} 到 {}", frame.index, path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;
  use url::Url;

  use super::*;
  use crate::model::Detection;

  fn one_detection() -> DetectResult {
    vec![Detection {
      center_x: 4.0,
      center_y: 4.0,
      width: 2.0,
      height: 2.0,
      score: 0.75,
      class_index: 1,
    }]
    .into()
  }

  fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(d).unwrap().flatten() {
        let p = entry.path();
        if p.is_dir() {
          stack.push(p);
        } else if p.extension().is_some_and(|e| e == ext) {
          found.push(p);
        }
      }
    }
    found
  }

  #[test]
  fn parses_mode_from_query() {
    let url = Url::parse("folder:///tmp/rec?record=id&always").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.mode, RecordMode::RecordId);
    assert!(output.always);
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), RecordMode::Draw, false);
    let frame = Frame::new(RgbImage::new(8, 8), 0);
    output.render_result(&frame, &DetectResult::empty()).unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    output.render_result(&frame, &one_detection()).unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn record_mode_writes_json_with_names() {
    let dir = tempfile::tempdir().unwrap();
    let labels: LabelTable = ["person", "bicycle"].into_iter().collect();
    let output = DirectoryRecordOutput::new(dir.path(), RecordMode::RecordName, false)
      .with_labels(Arc::new(labels));
    let frame = Frame::new(RgbImage::new(8, 8), 3);
    output.render_result(&frame, &one_detection()).unwrap();

    let records = files_with_extension(dir.path(), "json");
    assert_eq!(records.len(), 1);
    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&records[0]).unwrap()).unwrap();
    assert_eq!(value["frame_index"], 3);
    assert_eq!(value["detections"][0]["label"], "bicycle");
    assert_eq!(value["detections"][0]["class_index"], 1);
  }
}
