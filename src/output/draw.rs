// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{path::Path, sync::Arc};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  frame::Frame,
  label::LabelTable,
  model::{DetectResult, Detection},
  query_value,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 28.0;
const LABEL_TEXT_GAP: i32 = 10;
const MAX_FONT_SIZE: f32 = 512.0;
const BOX_STROKE: u32 = 4;
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("字体大小无效: {0}，应在 (0, 512] 之间")]
  InvalidFontSize(String),
}

fn valid_font_size(size: f32) -> bool {
  size.is_finite() && size > 0.0 && size <= MAX_FONT_SIZE
}

#[derive(Clone)]
pub struct DrawStyle {
  pub box_color: Rgb<u8>,
  pub text_color: Rgb<u8>,
  pub stroke: u32,
  pub font_size: f32,
  pub text_gap: i32,
  /// 未设置字体时只绘制边框
  pub font: Option<FontArc>,
}

impl Default for DrawStyle {
  fn default() -> Self {
    Self {
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
      stroke: BOX_STROKE,
      font_size: LABEL_FONT_SIZE,
      text_gap: LABEL_TEXT_GAP,
      font: None,
    }
  }
}

impl std::fmt::Debug for DrawStyle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DrawStyle")
      .field("box_color", &self.box_color)
      .field("text_color", &self.text_color)
      .field("stroke", &self.stroke)
      .field("font_size", &self.font_size)
      .field("text_gap", &self.text_gap)
      .field("font", &self.font.is_some())
      .finish()
  }
}

impl DrawStyle {
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    info!("加载字体文件: {}", path.display());
    Ok(self)
  }

  /// 从输出 URL 的查询参数读取样式，目前支持 `font` 与 `font_size`
  pub fn from_url(url: &Url) -> Result<Self, DrawError> {
    let mut style = DrawStyle::default();
    if let Some(font) = query_value(url, "font") {
      style = style.with_font_file(font)?;
    }
    if let Some(size) = query_value(url, "font_size") {
      let parsed = size
        .parse::<f32>()
        .map_err(|_| DrawError::InvalidFontSize(size.clone()))?;
      style = style.with_font_size(parsed)?;
    }
    Ok(style)
  }

  pub fn with_font_size(mut self, size: f32) -> Result<Self, DrawError> {
    if !valid_font_size(size) {
      return Err(DrawError::InvalidFontSize(size.to_string()));
    }
    self.font_size = size;
    Ok(self)
  }
}

/// 在图像副本上绘制检测框与标签，输入图像不变
pub fn annotate(
  image: &RgbImage,
  result: &DetectResult,
  labels: &LabelTable,
  style: &DrawStyle,
) -> RgbImage {
  let mut canvas = image.clone();
  for detection in result.iter() {
    draw_detection(&mut canvas, detection, labels, style);
  }
  canvas
}

/// 像素坐标裁剪到图像范围内，完全在图像外返回 `None`
fn clamp_box(detection: &Detection, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
  let [x0, y0, x1, y1] = detection.corners();
  if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) || width == 0 || height == 0 {
    return None;
  }
  let (x_min, x_max) = (x0.min(x1), x0.max(x1));
  let (y_min, y_max) = (y0.min(y1), y0.max(y1));
  let (w, h) = (width as f32, height as f32);
  if x_max < 0.0 || y_max < 0.0 || x_min >= w || y_min >= h {
    return None;
  }

  let x_min = x_min.max(0.0).floor() as i32;
  let y_min = y_min.max(0.0).floor() as i32;
  let x_max = x_max.min(w - 1.0).ceil() as i32;
  let y_max = y_max.min(h - 1.0).ceil() as i32;
  Some((x_min, y_min, x_max, y_max))
}

fn draw_detection(
  image: &mut RgbImage,
  detection: &Detection,
  labels: &LabelTable,
  style: &DrawStyle,
) {
  let Some((x_min, y_min, x_max, y_max)) = clamp_box(detection, image.width(), image.height())
  else {
    debug!("跳过图像外的检测框: {:?}", detection);
    return;
  };

  // 线宽以边为中心向内外扩展
  let stroke = style.stroke.max(1) as i32;
  let outer = stroke / 2;
  for offset in (outer - stroke + 1)..=outer {
    let (left, top) = (x_min - offset, y_min - offset);
    let rect_w = x_max - x_min + 2 * offset + 1;
    let rect_h = y_max - y_min + 2 * offset + 1;
    if rect_w <= 0 || rect_h <= 0 {
      continue;
    }
    let rect = Rect::at(left, top).of_size(rect_w as u32, rect_h as u32);
    draw_hollow_rect_mut(image, rect, style.box_color);
  }

  if let Some(font) = &style.font {
    if !valid_font_size(style.font_size) {
      debug!("字体大小 {} 无效, 跳过标签", style.font_size);
      return;
    }
    let text = format!(
      "{}:{:.2}",
      labels.display_name(detection.class_index),
      detection.score
    );
    let text_y = (y_min - style.text_gap - style.font_size.ceil() as i32).max(0);
    draw_text_mut(
      image,
      style.text_color,
      x_min,
      text_y,
      PxScale::from(style.font_size),
      font,
      &text,
    );
  }
}

/// 渲染器：样式与标签表，启动时构造一次
#[derive(Debug, Clone, Default)]
pub struct Draw {
  style: DrawStyle,
  labels: Arc<LabelTable>,
}

impl Draw {
  pub fn new(style: DrawStyle, labels: Arc<LabelTable>) -> Self {
    Self { style, labels }
  }

  pub fn with_labels(mut self, labels: Arc<LabelTable>) -> Self {
    if !labels.is_empty() && !self.draws_labels() {
      warn!("输出未指定字体 (?font=<ttf 路径>), 只绘制检测框, 不绘制类别标签");
    }
    self.labels = labels;
    self
  }

  /// 配置了字体时才绘制类别标签
  pub fn draws_labels(&self) -> bool {
    self.style.font.is_some()
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn style(&self) -> &DrawStyle {
    &self.style
  }

  pub fn draw_detection(&self, frame: &Frame, result: &DetectResult) -> RgbImage {
    annotate(&frame.image, result, &self.labels, &self.style)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(cx: f32, cy: f32, w: f32, h: f32, class_index: i64) -> Detection {
    Detection {
      center_x: cx,
      center_y: cy,
      width: w,
      height: h,
      score: 0.8,
      class_index,
    }
  }

  #[test]
  fn clamp_box_keeps_inside_boxes() {
    let b = clamp_box(&detection(10.0, 10.0, 4.0, 4.0, 0), 20, 20);
    assert_eq!(b, Some((8, 8, 12, 12)));
  }

  #[test]
  fn clamp_box_clips_partial_and_skips_outside() {
    assert_eq!(
      clamp_box(&detection(0.0, 0.0, 10.0, 10.0, 0), 20, 20),
      Some((0, 0, 5, 5))
    );
    assert_eq!(clamp_box(&detection(50.0, 50.0, 4.0, 4.0, 0), 20, 20), None);
    assert_eq!(
      clamp_box(&detection(f32::NAN, 5.0, 4.0, 4.0, 0), 20, 20),
      None
    );
  }

  #[test]
  fn stroke_covers_box_edges() {
    let image = RgbImage::new(32, 32);
    let result: DetectResult = vec![detection(16.0, 16.0, 10.0, 10.0, 0)].into();
    let out = annotate(&image, &result, &LabelTable::default(), &DrawStyle::default());
    let red = Rgb(BOX_COLOR);
    assert_eq!(out.get_pixel(11, 11), &red);
    assert_eq!(out.get_pixel(21, 21), &red);
    assert_eq!(out.get_pixel(16, 11), &red);
    // 框内部不受影响
    assert_eq!(out.get_pixel(16, 16), &Rgb([0, 0, 0]));
  }

  #[test]
  fn font_size_from_url_is_validated() {
    for size in ["1e10", "0", "-4", "NaN", "inf", "big"] {
      let url = Url::parse(&format!("image:///tmp/x.png?font_size={}", size)).unwrap();
      assert!(
        matches!(DrawStyle::from_url(&url), Err(DrawError::InvalidFontSize(_))),
        "font_size={} 应被拒绝",
        size
      );
    }
    let url = Url::parse("image:///tmp/x.png?font_size=16").unwrap();
    assert_eq!(DrawStyle::from_url(&url).unwrap().font_size, 16.0);
  }

  #[test]
  fn source_image_is_left_untouched() {
    let image = RgbImage::new(16, 16);
    let result: DetectResult = vec![detection(8.0, 8.0, 6.0, 6.0, 3)].into();
    let _ = annotate(&image, &result, &LabelTable::default(), &DrawStyle::default());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
