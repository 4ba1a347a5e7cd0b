// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use shaomiao::{
  FromUrl,
  encode::JpegFrameEncoder,
  input::InputWrapper,
  label::LabelTable,
  model::{EncodedDetector, OnnxDetectorBuilder},
  output::OutputWrapper,
  task::{FailurePolicy, OneShotTask, Task},
};
use tracing::info;

/// Shaomiao 单帧推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///data/yolov11n.onnx?ops=/data/libortextensions.so
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 类别标签文件，每行一个类别
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 输入来源，例如 image:///data/test.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 image:///data/out.png?font=/usr/share/fonts/DejaVuSans.ttf；
  /// 不指定 font 时只绘制检测框
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 推理失败时的处理方式: show / drop
  #[arg(long, value_name = "POLICY", default_value = "show")]
  pub policy: FailurePolicy,
  /// 模型输入的 JPEG 质量
  #[arg(long, value_name = "QUALITY", default_value_t = 100)]
  pub quality: u8,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("标签文件路径: {}", args.labels.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let labels = Arc::new(LabelTable::load(&args.labels)?);
  let detector = OnnxDetectorBuilder::from_url(&args.model)?.build()?;
  let model = EncodedDetector::new(
    JpegFrameEncoder::default().with_quality(args.quality),
    detector,
  );
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_labels(labels);

  OneShotTask::default()
    .with_policy(args.policy)
    .run_task(input, model, output)?;

  Ok(())
}
