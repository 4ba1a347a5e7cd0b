// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/task.rs - 任务编排
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
  fmt::Display,
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
  frame::Frame,
  model::{DetectResult, Model},
  output::Render,
  worker::{FrameWorker, WorkerReport},
};

/// 推理失败时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
  /// 输出不带标注的原始帧
  #[default]
  ShowUnannotated,
  /// 丢弃该帧
  DropFrame,
}

impl std::str::FromStr for FailurePolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "show" | "show-unannotated" => Ok(FailurePolicy::ShowUnannotated),
      "drop" | "drop-frame" => Ok(FailurePolicy::DropFrame),
      other => Err(format!("未知的失败策略: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 带标注输出，附检测数量
  Annotated(usize),
  /// 推理失败，输出原始帧
  Unannotated,
  /// 未输出
  Dropped,
}

/// 单帧流水线：推理、按策略降级、输出。错误在此记录，不向上传播。
pub fn process_frame<M, O>(
  model: &mut M,
  output: &O,
  frame: &Frame,
  policy: FailurePolicy,
) -> FrameOutcome
where
  M: Model<Input = Frame, Output = DetectResult>,
  M::Error: Display,
  O: Render<Frame, DetectResult>,
  O::Error: Display,
{
  let now = Instant::now();
  let (result, outcome) = match model.infer(frame) {
    Ok(result) => {
      let n = result.len();
      (result, FrameOutcome::Annotated(n))
    }
    Err(e) => {
      error!("第 {} 帧推理失败: {}", frame.index, e);
      match policy {
        FailurePolicy::ShowUnannotated => (DetectResult::empty(), FrameOutcome::Unannotated),
        FailurePolicy::DropFrame => return FrameOutcome::Dropped,
      }
    }
  };
  let elapsed_a = now.elapsed();

  if let Err(e) = output.render_result(frame, &result) {
    error!("第 {} 帧输出失败: {}", frame.index, e);
    return FrameOutcome::Dropped;
  }
  let elapsed_b = now.elapsed();
  info!(
    "第 {} 帧完成 {:?}, 耗时: {:.2?} / {:.2?}",
    frame.index, outcome, elapsed_a, elapsed_b
  );

  outcome
}

/// 安装 Ctrl-C 处理，收到信号后通知任务循环；30 秒内未退出则强制退出
fn install_interrupt() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

#[derive(Debug, Default)]
pub struct OneShotTask {
  policy: FailurePolicy,
}

impl OneShotTask {
  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }
}

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult>,
  M::Error: Display,
  O: Render<Frame, DetectResult>,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let outcome = process_frame(&mut model, &output, &frame, self.policy);
    info!("任务完成: {:?}", outcome);
    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
}

/// 统计时跳过的预热次数
const WARMUP_RUNS: usize = 2;

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

impl<I, M, O> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<Frame, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    let measured = if times.len() > WARMUP_RUNS {
      &times[WARMUP_RUNS..]
    } else {
      &times[..]
    };
    warn!(
      "平均推理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    Ok(())
  }
}

/// 在当前线程逐帧处理
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  policy: FailurePolicy,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 响应 Ctrl-C，每个进程只能安装一次
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult>,
  M::Error: Display,
  O: Render<Frame, DetectResult>,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let rx = if self.interrupt {
      Some(install_interrupt()?)
    } else {
      None
    };

    let mut frame_count = 0usize;
    for frame in input {
      frame_count += 1;
      info!("处理第 {} 帧图像", frame_count);
      process_frame(&mut model, &output, &frame, self.policy);
      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if rx.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

/// 输入在当前线程读取，推理在单个后台线程进行；后台忙碌时只保留最新一帧
#[derive(Default, Debug)]
pub struct LatestFrameTask {
  frame_number: Option<usize>,
  policy: FailurePolicy,
  interrupt: bool,
}

impl LatestFrameTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 响应 Ctrl-C，每个进程只能安装一次
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  pub fn run<I, M, O>(self, input: I, model: M, output: O) -> anyhow::Result<WorkerReport>
  where
    I: Iterator<Item = Frame>,
    M: Model<Input = Frame, Output = DetectResult> + Send + 'static,
    M::Error: Display,
    O: Render<Frame, DetectResult> + Send + 'static,
    O::Error: Display,
  {
    info!("开始任务...");
    let rx = if self.interrupt {
      Some(install_interrupt()?)
    } else {
      None
    };

    let worker = FrameWorker::spawn(model, output, self.policy)?;
    let mut frame_count = 0usize;
    for frame in input {
      frame_count += 1;
      worker.submit(frame)?;
      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 停止读取输入", frame_count);
        break;
      }
      if rx.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，停止读取输入");
        break;
      }
    }

    let report = worker.finish()?;
    info!(
      "任务完成: 输入 {} 帧, 处理 {} 帧, 跳过 {} 帧, 未标注 {} 帧, 丢弃 {} 帧",
      report.offered, report.processed, report.skipped, report.unannotated, report.dropped
    );
    Ok(report)
  }
}

impl<I, M, O> Task<I, M, O> for LatestFrameTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult> + Send + 'static,
  M::Error: Display,
  O: Render<Frame, DetectResult> + Send + 'static,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    self.run(input, model, output).map(|_| ())
  }
}
