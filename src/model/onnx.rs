// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测模型
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

use ort::{
  logging::LogLevel,
  session::{Session, builder::SessionBuilder},
  value::Tensor,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    DetectResult, InferenceError, Model, decode_detections,
    session::{SessionKind, build_with_fallback},
  },
  query_value,
};

const DEFAULT_INPUT_NAME: &str = "image";
const DEFAULT_OUTPUT_NAME: &str = "nms_output_with_scaled_boxes_and_keypoints";
const DEFAULT_QNN_BACKEND: &str = "libQnnHtp.so";
const DEFAULT_HTP_FINALIZATION_MODE: u8 = 2;
const MAX_HTP_FINALIZATION_MODE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
  /// 不尝试加速，直接使用 CPU 回退路径
  None,
  /// Qualcomm QNN (HTP)
  Qnn,
}

impl std::str::FromStr for Accelerator {
  type Err = InferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" | "cpu" => Ok(Accelerator::None),
      "qnn" => Ok(Accelerator::Qnn),
      other => Err(InferenceError::InvalidParameter(format!(
        "未知的加速后端 {}",
        other
      ))),
    }
  }
}

/// QNN HTP 性能模式，取值与 ONNX Runtime 的 `htp_performance_mode` 选项一致
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HtpPerformanceMode {
  Default,
  Burst,
  Balanced,
  #[default]
  HighPerformance,
  HighPowerSaver,
  LowBalanced,
  LowPowerSaver,
  PowerSaver,
  ExtremePowerSaver,
  SustainedHighPerformance,
}

impl std::str::FromStr for HtpPerformanceMode {
  type Err = InferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "default" => Ok(HtpPerformanceMode::Default),
      "burst" => Ok(HtpPerformanceMode::Burst),
      "balanced" => Ok(HtpPerformanceMode::Balanced),
      "high_performance" => Ok(HtpPerformanceMode::HighPerformance),
      "high_power_saver" => Ok(HtpPerformanceMode::HighPowerSaver),
      "low_balanced" => Ok(HtpPerformanceMode::LowBalanced),
      "low_power_saver" => Ok(HtpPerformanceMode::LowPowerSaver),
      "power_saver" => Ok(HtpPerformanceMode::PowerSaver),
      "extreme_power_saver" => Ok(HtpPerformanceMode::ExtremePowerSaver),
      "sustained_high_performance" => Ok(HtpPerformanceMode::SustainedHighPerformance),
      other => Err(InferenceError::InvalidParameter(format!(
        "未知的 HTP 性能模式 {}",
        other
      ))),
    }
  }
}

#[cfg(feature = "qnn")]
impl From<HtpPerformanceMode> for ort::execution_providers::qnn::QNNPerformanceMode {
  fn from(mode: HtpPerformanceMode) -> Self {
    use ort::execution_providers::qnn::QNNPerformanceMode as Q;
    match mode {
      HtpPerformanceMode::Default => Q::Default,
      HtpPerformanceMode::Burst => Q::Burst,
      HtpPerformanceMode::Balanced => Q::Balanced,
      HtpPerformanceMode::HighPerformance => Q::HighPerformance,
      HtpPerformanceMode::HighPowerSaver => Q::HighPowerSaver,
      HtpPerformanceMode::LowBalanced => Q::LowBalanced,
      HtpPerformanceMode::LowPowerSaver => Q::LowPowerSaver,
      HtpPerformanceMode::PowerSaver => Q::PowerSaver,
      HtpPerformanceMode::ExtremePowerSaver => Q::ExtremePowerSaver,
      HtpPerformanceMode::SustainedHighPerformance => Q::SustainedHighPerformance,
    }
  }
}

/// 图最终化优化模式，只接受 0 到 3
fn parse_finalization_mode(value: &str) -> Result<u8, InferenceError> {
  value
    .parse::<u8>()
    .ok()
    .filter(|mode| *mode <= MAX_HTP_FINALIZATION_MODE)
    .ok_or_else(|| {
      InferenceError::InvalidParameter(format!("无效的图最终化优化模式 {}", value))
    })
}

/// 检测器配置，URL 形如
/// `onnx:///model.onnx?ops=/lib/libortextensions.so&accelerator=qnn`
#[derive(Debug, Clone)]
pub struct OnnxDetectorBuilder {
  model_path: PathBuf,
  ops_library: Option<PathBuf>,
  accelerator: Accelerator,
  qnn_backend: String,
  htp_performance_mode: HtpPerformanceMode,
  htp_finalization_mode: u8,
  input_name: String,
  output_name: String,
}

impl FromUrlWithScheme for OnnxDetectorBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxDetectorBuilder {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    if url.path().is_empty() {
      return Err(InferenceError::ModelPathError("模型路径为空".to_string()));
    }

    let mut builder = OnnxDetectorBuilder::new(url.path());
    if let Some(ops) = query_value(url, "ops") {
      builder = builder.ops_library(ops);
    }
    if let Some(accelerator) = query_value(url, "accelerator") {
      builder = builder.accelerator(accelerator.parse()?);
    }
    if let Some(backend) = query_value(url, "backend_path") {
      builder.qnn_backend = backend;
    }
    if let Some(mode) = query_value(url, "htp_performance_mode") {
      builder.htp_performance_mode = mode.parse()?;
    }
    if let Some(mode) = query_value(url, "htp_graph_finalization_optimization_mode") {
      builder.htp_finalization_mode = parse_finalization_mode(&mode)?;
    }
    if let Some(name) = query_value(url, "input") {
      builder.input_name = name;
    }
    if let Some(name) = query_value(url, "output") {
      builder.output_name = name;
    }

    Ok(builder)
  }
}

impl OnnxDetectorBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      ops_library: None,
      accelerator: Accelerator::Qnn,
      qnn_backend: DEFAULT_QNN_BACKEND.to_string(),
      htp_performance_mode: HtpPerformanceMode::default(),
      htp_finalization_mode: DEFAULT_HTP_FINALIZATION_MODE,
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
    }
  }

  /// 自定义算子库（onnxruntime-extensions），模型内的解码和 NMS 依赖它
  pub fn ops_library(mut self, path: impl Into<PathBuf>) -> Self {
    self.ops_library = Some(path.into());
    self
  }

  pub fn accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = accelerator;
    self
  }

  pub fn input_name(&self) -> &str {
    &self.input_name
  }

  pub fn output_name(&self) -> &str {
    &self.output_name
  }

  fn base_builder(&self) -> Result<SessionBuilder, InferenceError> {
    let builder = Session::builder()?;
    match &self.ops_library {
      Some(ops) => {
        debug!("注册自定义算子库: {}", ops.display());
        Ok(builder.with_operator_library(ops)?)
      }
      None => Ok(builder),
    }
  }

  #[cfg(feature = "qnn")]
  fn accelerated_session(&self, model: &[u8]) -> Result<Session, InferenceError> {
    use ort::execution_providers::{ExecutionProvider, QNNExecutionProvider};

    info!(
      "创建 QNN 推理会话: backend={}, htp_performance_mode={:?}, finalization={}",
      self.qnn_backend, self.htp_performance_mode, self.htp_finalization_mode
    );
    let qnn = QNNExecutionProvider::default()
      .with_backend_path(self.qnn_backend.as_str())
      .with_performance_mode(self.htp_performance_mode.into())
      .with_htp_graph_finalization_optimization_mode(self.htp_finalization_mode);
    if !qnn.is_available()? {
      return Err(InferenceError::AcceleratorUnavailable(
        "QNN 执行后端未包含在当前 ONNX Runtime 中".to_string(),
      ));
    }

    let session = self
      .base_builder()?
      .with_execution_providers([qnn.build().error_on_failure()])?
      .commit_from_memory(model)?;
    Ok(session)
  }

  #[cfg(not(feature = "qnn"))]
  fn accelerated_session(&self, _model: &[u8]) -> Result<Session, InferenceError> {
    Err(InferenceError::AcceleratorUnavailable(
      "编译时未启用 qnn 特性".to_string(),
    ))
  }

  fn fallback_session(&self, model: &[u8]) -> Result<Session, InferenceError> {
    info!("创建 CPU 推理会话（详细日志）");
    let session = self
      .base_builder()?
      .with_log_level(LogLevel::Verbose)?
      .commit_from_memory(model)?;
    Ok(session)
  }

  pub fn build(self) -> Result<OnnxDetector, InferenceError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    if self.ops_library.is_none() {
      warn!("未指定自定义算子库, 模型中的预处理/NMS 算子需由运行时内置提供");
    }

    let accelerated = match self.accelerator {
      Accelerator::None => None,
      Accelerator::Qnn => Some(|| self.accelerated_session(&model_data)),
    };
    let choice = build_with_fallback(accelerated, || self.fallback_session(&model_data))
      .map_err(|e| match e {
        InferenceError::OrtError(e) => InferenceError::SessionCreate(e),
        other => other,
      })?;

    let kind = choice.kind();
    let session = choice.into_inner();
    info!("模型加载完成: {:?}", kind);

    for input in session.inputs.iter() {
      debug!("模型输入: {}", input.name);
    }
    for output in session.outputs.iter() {
      debug!("模型输出: {}", output.name);
    }

    Ok(OnnxDetector {
      session,
      kind,
      input_name: self.input_name,
      output_name: self.output_name,
    })
  }
}

/// 持有推理会话，释放时一并释放会话
pub struct OnnxDetector {
  session: Session,
  kind: SessionKind,
  input_name: String,
  output_name: String,
}

impl OnnxDetector {
  pub fn kind(&self) -> SessionKind {
    self.kind
  }
}

impl Model for OnnxDetector {
  type Input = [u8];
  type Output = DetectResult;
  type Error = InferenceError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.is_empty() {
      return Err(InferenceError::EmptyInput);
    }

    debug!("设置模型输入: {} 字节", input.len());
    let tensor = Tensor::from_array(([input.len()], input.to_vec().into_boxed_slice()))?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .inspect_err(|e| error!("推理失败: {}", e))?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| InferenceError::MissingOutput(self.output_name.clone()))?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let dims: Vec<i64> = shape.iter().copied().collect();
    debug!("模型输出形状: {:?}", dims);

    decode_detections(&dims, data)
  }
}

impl Drop for OnnxDetector {
  fn drop(&mut self) {
    debug!("释放推理会话: {:?}", self.kind);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_defaults_follow_the_packaged_model() {
    let url = Url::parse("onnx:///data/yolov11n.onnx").unwrap();
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/data/yolov11n.onnx"));
    assert_eq!(builder.input_name(), "image");
    assert_eq!(
      builder.output_name(),
      "nms_output_with_scaled_boxes_and_keypoints"
    );
    assert_eq!(builder.accelerator, Accelerator::Qnn);
    assert!(builder.ops_library.is_none());
  }

  #[test]
  fn builder_reads_query_options() {
    let url = Url::parse(
      "onnx:///m.onnx?ops=/lib/libortextensions.so&accelerator=none&input=img&htp_performance_mode=burst",
    )
    .unwrap();
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.ops_library,
      Some(PathBuf::from("/lib/libortextensions.so"))
    );
    assert_eq!(builder.accelerator, Accelerator::None);
    assert_eq!(builder.input_name(), "img");
    assert_eq!(builder.htp_performance_mode, HtpPerformanceMode::Burst);
  }

  #[test]
  fn htp_options_parse_into_typed_fields() {
    let url = Url::parse("onnx:///m.onnx").unwrap();
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.htp_performance_mode,
      HtpPerformanceMode::HighPerformance
    );
    assert_eq!(builder.htp_finalization_mode, 2);

    let url = Url::parse(
      "onnx:///m.onnx?htp_performance_mode=sustained_high_performance&htp_graph_finalization_optimization_mode=3&backend_path=libQnnCpu.so",
    )
    .unwrap();
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.htp_performance_mode,
      HtpPerformanceMode::SustainedHighPerformance
    );
    assert_eq!(builder.htp_finalization_mode, 3);
    assert_eq!(builder.qnn_backend, "libQnnCpu.so");
  }

  #[test]
  fn htp_options_reject_bad_values() {
    for query in [
      "htp_performance_mode=turbo",
      "htp_graph_finalization_optimization_mode=4",
      "htp_graph_finalization_optimization_mode=-1",
      "htp_graph_finalization_optimization_mode=fast",
    ] {
      let url = Url::parse(&format!("onnx:///m.onnx?{}", query)).unwrap();
      assert!(
        matches!(
          OnnxDetectorBuilder::from_url(&url),
          Err(InferenceError::InvalidParameter(_))
        ),
        "{} 应被拒绝",
        query
      );
    }
  }

  #[test]
  fn builder_rejects_bad_urls() {
    let url = Url::parse("rknn:///m.rknn").unwrap();
    assert!(matches!(
      OnnxDetectorBuilder::from_url(&url),
      Err(InferenceError::ModelPathError(_))
    ));
    let url = Url::parse("onnx:///m.onnx?accelerator=tpu").unwrap();
    assert!(matches!(
      OnnxDetectorBuilder::from_url(&url),
      Err(InferenceError::InvalidParameter(_))
    ));
  }

  #[test]
  fn missing_model_file_fails_before_session_creation() {
    let dir = tempfile::tempdir().unwrap();
    let result = OnnxDetectorBuilder::new(dir.path().join("absent.onnx"))
      .accelerator(Accelerator::None)
      .build();
    assert!(matches!(result, Err(InferenceError::ModelLoadError(_))));
  }
}
