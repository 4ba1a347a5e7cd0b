// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_value};

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid parameter {0}: {1}")]
  InvalidParameter(&'static str, String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Captured buffer size mismatch: expected {expected}, got {actual}")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Mjpeg,
  Yuyv,
  Rgb24,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"MJPG" => Some(PixelFormat::Mjpeg),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"RGB3" => Some(PixelFormat::Rgb24),
      _ => None,
    }
  }
}

/// V4L2 摄像头输入，URL 形如 `v4l:///dev/video0?width=1280&height=720`
pub struct V4lInput {
  // stream 必须先于 device 释放
  stream: Stream<'static>,
  _device: Device,
  width: u32,
  height: u32,
  format: PixelFormat,
  index: u64,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

fn parse_dimension(url: &Url, key: &'static str) -> Result<Option<u32>, V4lInputError> {
  query_value(url, key)
    .map(|v| {
      v.parse::<u32>()
        .map_err(|_| V4lInputError::InvalidParameter(key, v))
    })
    .transpose()
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0
    let device_path = if url.path().is_empty() || url.path() == "/" {
      V4L_DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let device = Device::with_path(&device_path)?;

    let mut format = device.format()?;
    if let Some(width) = parse_dimension(url, "width")? {
      format.width = width;
    }
    if let Some(height) = parse_dimension(url, "height")? {
      format.height = height;
    }
    format.fourcc = FourCC::new(b"MJPG");
    let format = device.set_format(&format)?;

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
      V4lInputError::UnsupportedPixelFormat(
        format
          .fourcc
          .str()
          .map(str::to_string)
          .unwrap_or_else(|_| format!("{:?}", format.fourcc.repr)),
      )
    })?;

    info!(
      "Opened {}: {}x{} {:?}",
      device_path, format.width, format.height, pixel_format
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;

    Ok(V4lInput {
      stream,
      _device: device,
      width: format.width,
      height: format.height,
      format: pixel_format,
      index: 0,
    })
  }
}

impl V4lInput {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn capture_frame(&mut self) -> Result<RgbImage, V4lInputError> {
    let (buf, meta) = self.stream.next()?;
    let used = (meta.bytesused as usize).min(buf.len());
    let data = &buf[..used];

    match self.format {
      PixelFormat::Mjpeg => {
        Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8())
      }
      PixelFormat::Yuyv => yuyv_to_rgb(data, self.width, self.height),
      PixelFormat::Rgb24 => {
        let expected = (self.width * self.height * 3) as usize;
        if data.len() < expected {
          return Err(V4lInputError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          });
        }
        RgbImage::from_raw(self.width, self.height, data[..expected].to_vec()).ok_or(
          V4lInputError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          },
        )
      }
    }
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.capture_frame() {
      Ok(image) => {
        let frame = Frame::new(image, self.index);
        self.index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("Failed to capture frame: {}", e);
        None
      }
    }
  }
}

/// YUYV (YUV 4:2:2) 转 RGB，BT.601
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, V4lInputError> {
  let expected = (width * height * 2) as usize;
  if data.len() < expected {
    return Err(V4lInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in data[..expected].chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
    rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
  }

  RgbImage::from_raw(width, height, rgb).ok_or(V4lInputError::BufferSizeMismatch {
    expected,
    actual: data.len(),
  })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  let r = y + 1.402 * v;
  let g = y - 0.344_136 * u - 0.714_136 * v;
  let b = y + 1.772 * u;
  [
    r.round().clamp(0.0, 255.0) as u8,
    g.round().clamp(0.0, 255.0) as u8,
    b.round().clamp(0.0, 255.0) as u8,
  ]
}
