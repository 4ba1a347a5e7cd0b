// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::debug;

use crate::{
  encode::{EncodeError, FrameEncoder},
  frame::Frame,
};

mod onnx;
mod session;
pub use self::onnx::{Accelerator, HtpPerformanceMode, OnnxDetector, OnnxDetectorBuilder};
pub use self::session::{SessionChoice, SessionKind, build_with_fallback};

/// 每个检测结果至少包含的列数: cx, cy, w, h, score, class
pub const DETECTION_COLUMNS: usize = 6;

pub trait Model {
  type Input: ?Sized;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数错误: {0}")]
  InvalidParameter(String),
  #[error("加速后端不可用: {0}")]
  AcceleratorUnavailable(String),
  #[error("推理会话创建失败: {0}")]
  SessionCreate(ort::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输入为空")]
  EmptyInput,
  #[error("帧编码错误: {0}")]
  EncodeError(#[from] EncodeError),
  #[error("模型没有输出 {0}")]
  MissingOutput(String),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

/// 单个检测目标，坐标为原图像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
  pub score: f32,
  pub class_index: i64,
}

impl Detection {
  /// [x_min, y_min, x_max, y_max]
  pub fn corners(&self) -> [f32; 4] {
    let (hw, hh) = (self.width / 2.0, self.height / 2.0);
    [
      self.center_x - hw,
      self.center_y - hh,
      self.center_x + hw,
      self.center_y + hh,
    ]
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 解析模型输出张量
///
/// 接受 `[N, K]`、`[1, N, K]` 以及空张量 `[0]`，每行前 6 列为
/// `[cx, cy, w, h, score, class]`，其余列（关键点）忽略。
pub fn decode_detections(shape: &[i64], data: &[f32]) -> Result<DetectResult, InferenceError> {
  let (rows, cols) = match shape {
    [0] => (0, 0),
    [n, k] => (*n, *k),
    [1, n, k] => (*n, *k),
    _ => {
      return Err(InferenceError::MalformedOutput(format!(
        "不支持的输出形状 {:?}",
        shape
      )));
    }
  };

  if rows < 0 || cols < 0 {
    return Err(InferenceError::MalformedOutput(format!(
      "输出形状含负数维度 {:?}",
      shape
    )));
  }
  let (rows, cols) = (rows as usize, cols as usize);

  if rows > 0 && cols < DETECTION_COLUMNS {
    return Err(InferenceError::MalformedOutput(format!(
      "每行至少需要 {} 列, 实际为 {}",
      DETECTION_COLUMNS, cols
    )));
  }

  let expected = rows
    .checked_mul(cols)
    .ok_or_else(|| InferenceError::MalformedOutput(format!("输出形状溢出 {:?}", shape)))?;
  if data.len() != expected {
    return Err(InferenceError::MalformedOutput(format!(
      "输出数据长度 {} 与形状 {:?} 不符",
      data.len(),
      shape
    )));
  }

  let mut items = Vec::with_capacity(rows);
  if rows > 0 {
    for (row_idx, row) in data.chunks_exact(cols).enumerate() {
      let head = &row[..DETECTION_COLUMNS];
      if head.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::MalformedOutput(format!(
          "第 {} 行包含非有限值: {:?}",
          row_idx, head
        )));
      }
      items.push(Detection {
        center_x: head[0],
        center_y: head[1],
        width: head[2],
        height: head[3],
        score: head[4],
        class_index: head[5].trunc() as i64,
      });
    }
  }

  debug!("解析得到 {} 个检测结果", items.len());
  Ok(items.into())
}

/// 帧编码器与字节输入模型的组合
pub struct EncodedDetector<E, M> {
  encoder: E,
  model: M,
}

impl<E, M> EncodedDetector<E, M> {
  pub fn new(encoder: E, model: M) -> Self {
    Self { encoder, model }
  }

  pub fn model(&self) -> &M {
    &self.model
  }
}

impl<E, M> Model for EncodedDetector<E, M>
where
  E: FrameEncoder,
  M: Model<Input = [u8], Output = DetectResult, Error = InferenceError>,
{
  type Input = Frame;
  type Output = DetectResult;
  type Error = InferenceError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let bytes = self.encoder.encode(input)?;
    self.model.infer(&bytes)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::encode::PngFrameEncoder;

  #[test]
  fn decodes_rows_and_ignores_keypoints() {
    let data = [
      10.0, 20.0, 4.0, 6.0, 0.9, 2.0, 1.0, 1.0, //
      5.0, 5.0, 2.0, 2.0, 0.5, 0.0, 3.0, 3.0,
    ];
    let result = decode_detections(&[2, 8], &data).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].class_index, 2);
    assert_eq!(result.items[0].corners(), [8.0, 17.0, 12.0, 23.0]);
    assert_eq!(result.items[1].score, 0.5);
  }

  #[test]
  fn accepts_batched_and_empty_shapes() {
    let data = [1.0, 1.0, 1.0, 1.0, 0.3, 1.0];
    assert_eq!(decode_detections(&[1, 1, 6], &data).unwrap().len(), 1);
    assert!(decode_detections(&[0], &[]).unwrap().is_empty());
    assert!(decode_detections(&[0, 6], &[]).unwrap().is_empty());
  }

  #[test]
  fn rejects_malformed_outputs() {
    let short = [1.0; 5];
    assert!(matches!(
      decode_detections(&[1, 5], &short),
      Err(InferenceError::MalformedOutput(_))
    ));
    assert!(matches!(
      decode_detections(&[2, 6], &[0.0; 6]),
      Err(InferenceError::MalformedOutput(_))
    ));
    assert!(matches!(
      decode_detections(&[2, 2, 6], &[0.0; 24]),
      Err(InferenceError::MalformedOutput(_))
    ));
    assert!(matches!(
      decode_detections(&[-1, 6], &[]),
      Err(InferenceError::MalformedOutput(_))
    ));
    let nan = [1.0, 1.0, 1.0, 1.0, f32::NAN, 0.0];
    assert!(matches!(
      decode_detections(&[1, 6], &nan),
      Err(InferenceError::MalformedOutput(_))
    ));
  }

  struct EchoLength;

  impl Model for EchoLength {
    type Input = [u8];
    type Output = DetectResult;
    type Error = InferenceError;

    fn infer(&mut self, input: &[u8]) -> Result<DetectResult, InferenceError> {
      if input.is_empty() {
        return Err(InferenceError::EmptyInput);
      }
      Ok(
        vec![Detection {
          center_x: 0.0,
          center_y: 0.0,
          width: input.len() as f32,
          height: 0.0,
          score: 1.0,
          class_index: 0,
        }]
        .into(),
      )
    }
  }

  #[test]
  fn encoded_detector_feeds_encoded_bytes() {
    let mut detector = EncodedDetector::new(PngFrameEncoder, EchoLength);
    let result = detector.infer(&Frame::new(RgbImage::new(4, 4), 0)).unwrap();
    assert!(result.items[0].width > 0.0);
  }

  #[test]
  fn encoded_detector_surfaces_encode_errors() {
    let mut detector = EncodedDetector::new(PngFrameEncoder, EchoLength);
    assert!(matches!(
      detector.infer(&Frame::new(RgbImage::new(0, 0), 0)),
      Err(InferenceError::EncodeError(_))
    ));
  }
}
