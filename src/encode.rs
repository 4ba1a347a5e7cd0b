// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/encode.rs - 帧编码
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

use image::codecs::{jpeg::JpegEncoder, png::PngEncoder};
use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;

/// 默认 JPEG 质量，模型内的解码算子对压缩伪影敏感
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("空帧: {0}x{1}")]
  EmptyFrame(u32, u32),
}

/// 将帧序列化为模型输入的字节流
pub trait FrameEncoder {
  fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct JpegFrameEncoder {
  quality: u8,
}

impl Default for JpegFrameEncoder {
  fn default() -> Self {
    Self {
      quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

impl JpegFrameEncoder {
  pub fn with_quality(mut self, quality: u8) -> Self {
    self.quality = quality.clamp(1, 100);
    self
  }

  pub fn quality(&self) -> u8 {
    self.quality
  }
}

fn check_frame(frame: &Frame) -> Result<(), EncodeError> {
  if frame.width() == 0 || frame.height() == 0 {
    return Err(EncodeError::EmptyFrame(frame.width(), frame.height()));
  }
  Ok(())
}

impl FrameEncoder for JpegFrameEncoder {
  fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    check_frame(frame)?;
    let mut bytes = Vec::new();
    frame
      .image
      .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.quality))?;
    debug!("帧 {} 编码为 JPEG: {} 字节", frame.index, bytes.len());
    Ok(bytes)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PngFrameEncoder;

impl FrameEncoder for PngFrameEncoder {
  fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    check_frame(frame)?;
    let mut bytes = Vec::new();
    frame.image.write_with_encoder(PngEncoder::new(&mut bytes))?;
    debug!("帧 {} 编码为 PNG: {} 字节", frame.index, bytes.len());
    Ok(bytes)
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;

  #[test]
  fn jpeg_bytes_have_soi_marker() {
    let frame = Frame::new(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])), 0);
    let bytes = JpegFrameEncoder::default().encode(&frame).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
  }

  #[test]
  fn png_is_lossless() {
    let image = RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8, y as u8, 7]));
    let frame = Frame::new(image.clone(), 0);
    let bytes = PngFrameEncoder.encode(&frame).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(decoded, image);
  }

  #[test]
  fn empty_frame_is_rejected() {
    let frame = Frame::new(RgbImage::new(0, 0), 0);
    assert!(matches!(
      JpegFrameEncoder::default().encode(&frame),
      Err(EncodeError::EmptyFrame(0, 0))
    ));
  }

  #[test]
  fn quality_is_clamped() {
    assert_eq!(JpegFrameEncoder::default().with_quality(0).quality(), 1);
  }
}
