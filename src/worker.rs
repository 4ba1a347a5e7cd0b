// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/worker.rs - 后台推理线程与只保留最新帧的队列
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
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::{DetectResult, Model},
  output::Render,
  task::{FailurePolicy, FrameOutcome, process_frame},
};

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("推理线程已退出")]
  Closed,
  #[error("推理线程创建失败: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("推理线程异常退出")]
  Panicked,
}

/// 提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
  /// 队列为空，直接入队
  Queued,
  /// 替换了一个尚未处理的旧帧
  Replaced,
}

#[derive(Debug, Default)]
struct QueueShared {
  offered: AtomicU64,
  replaced: AtomicU64,
  closed: AtomicBool,
}

/// 生产端，单生产者，不可克隆
pub struct LatestSender<T> {
  tx: Sender<T>,
  // 用于丢弃尚未被消费的旧帧
  stale: Receiver<T>,
  shared: Arc<QueueShared>,
}

pub struct LatestReceiver<T> {
  rx: Receiver<T>,
  shared: Arc<QueueShared>,
}

/// 容量为 1 的交接队列：新帧到达时若旧帧仍未被取走，旧帧被丢弃
pub fn latest_frame_queue<T>() -> (LatestSender<T>, LatestReceiver<T>) {
  let (tx, rx) = crossbeam_channel::bounded(1);
  let shared = Arc::new(QueueShared::default());
  (
    LatestSender {
      tx,
      stale: rx.clone(),
      shared: shared.clone(),
    },
    LatestReceiver { rx, shared },
  )
}

impl<T> LatestSender<T> {
  /// 不阻塞；消费端已关闭时原样返回 `Err(item)`
  pub fn offer(&self, item: T) -> Result<Offer, T> {
    if self.shared.closed.load(Ordering::Acquire) {
      return Err(item);
    }
    self.shared.offered.fetch_add(1, Ordering::Relaxed);

    let mut item = item;
    let mut outcome = Offer::Queued;
    loop {
      match self.tx.try_send(item) {
        Ok(()) => return Ok(outcome),
        Err(TrySendError::Full(back)) => {
          if self.stale.try_recv().is_ok() {
            self.shared.replaced.fetch_add(1, Ordering::Relaxed);
            outcome = Offer::Replaced;
          }
          item = back;
        }
        Err(TrySendError::Disconnected(back)) => return Err(back),
      }
    }
  }

  pub fn offered(&self) -> u64 {
    self.shared.offered.load(Ordering::Relaxed)
  }

  pub fn replaced(&self) -> u64 {
    self.shared.replaced.load(Ordering::Relaxed)
  }
}

impl<T> LatestReceiver<T> {
  /// 阻塞等待下一帧，生产端全部释放后返回 `None`
  pub fn recv(&self) -> Option<T> {
    self.rx.recv().ok()
  }

  pub fn try_recv(&self) -> Option<T> {
    self.rx.try_recv().ok()
  }
}

impl<T> Drop for LatestReceiver<T> {
  fn drop(&mut self) {
    self.shared.closed.store(true, Ordering::Release);
  }
}

/// 推理线程的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
  /// 提交的帧数
  pub offered: u64,
  /// 因线程忙碌被替换丢弃的帧数
  pub skipped: u64,
  /// 实际处理的帧数
  pub processed: u64,
  pub annotated: u64,
  pub unannotated: u64,
  /// 按失败策略丢弃的帧数
  pub dropped: u64,
  /// 最后处理的帧索引
  pub last_index: Option<u64>,
}

#[derive(Debug, Default)]
struct WorkerCounts {
  processed: u64,
  annotated: u64,
  unannotated: u64,
  dropped: u64,
  last_index: Option<u64>,
}

/// 单个后台线程，持有模型和输出，按只保留最新帧的方式接收帧
pub struct FrameWorker {
  sender: LatestSender<Frame>,
  handle: JoinHandle<WorkerCounts>,
}

impl FrameWorker {
  pub fn spawn<M, O>(mut model: M, output: O, policy: FailurePolicy) -> Result<Self, WorkerError>
  where
    M: Model<Input = Frame, Output = DetectResult> + Send + 'static,
    M::Error: Display,
    O: Render<Frame, DetectResult> + Send + 'static,
    O::Error: Display,
  {
    let (sender, receiver) = latest_frame_queue::<Frame>();
    let handle = thread::Builder::new()
      .name("frame-worker".to_string())
      .spawn(move || {
        info!("推理线程启动");
        let mut counts = WorkerCounts::default();
        while let Some(frame) = receiver.recv() {
          debug!("推理线程收到第 {} 帧", frame.index);
          match process_frame(&mut model, &output, &frame, policy) {
            FrameOutcome::Annotated(_) => counts.annotated += 1,
            FrameOutcome::Unannotated => counts.unannotated += 1,
            FrameOutcome::Dropped => counts.dropped += 1,
          }
          counts.processed += 1;
          counts.last_index = Some(frame.index);
        }
        info!("推理线程退出, 共处理 {} 帧", counts.processed);
        counts
      })?;

    Ok(FrameWorker { sender, handle })
  }

  /// 提交一帧，不阻塞
  pub fn submit(&self, frame: Frame) -> Result<Offer, WorkerError> {
    match self.sender.offer(frame) {
      Ok(Offer::Replaced) => {
        debug!("推理线程忙碌, 丢弃旧帧");
        Ok(Offer::Replaced)
      }
      Ok(offer) => Ok(offer),
      Err(frame) => {
        warn!("推理线程已退出, 第 {} 帧未提交", frame.index);
        Err(WorkerError::Closed)
      }
    }
  }

  /// 关闭队列，等待队列中剩余的帧处理完毕
  pub fn finish(self) -> Result<WorkerReport, WorkerError> {
    let FrameWorker { sender, handle } = self;
    let offered = sender.offered();
    let skipped = sender.replaced();
    drop(sender);

    let counts = handle.join().map_err(|_| WorkerError::Panicked)?;
    Ok(WorkerReport {
      offered,
      skipped,
      processed: counts.processed,
      annotated: counts.annotated,
      unannotated: counts.unannotated,
      dropped: counts.dropped,
      last_index: counts.last_index,
    })
  }
}
