// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/model/session.rs - 推理会话的两步创建策略
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

use std::fmt::Display;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
  /// 硬件加速后端
  Accelerated,
  /// CPU 后端，开启详细日志
  Fallback,
}

/// 创建结果，带上实际使用的策略
#[derive(Debug)]
pub enum SessionChoice<S> {
  Accelerated(S),
  Fallback(S),
}

impl<S> SessionChoice<S> {
  pub fn kind(&self) -> SessionKind {
    match self {
      SessionChoice::Accelerated(_) => SessionKind::Accelerated,
      SessionChoice::Fallback(_) => SessionKind::Fallback,
    }
  }

  pub fn into_inner(self) -> S {
    match self {
      SessionChoice::Accelerated(s) | SessionChoice::Fallback(s) => s,
    }
  }
}

/// 先尝试加速路径，失败后使用回退路径；只在启动时执行一次。
///
/// `accelerated` 为 `None` 时直接使用回退路径。回退路径的错误原样返回。
pub fn build_with_fallback<S, E, A, F>(
  accelerated: Option<A>,
  fallback: F,
) -> Result<SessionChoice<S>, E>
where
  E: Display,
  A: FnOnce() -> Result<S, E>,
  F: FnOnce() -> Result<S, E>,
{
  if let Some(accelerated) = accelerated {
    match accelerated() {
      Ok(session) => {
        info!("使用硬件加速推理会话");
        return Ok(SessionChoice::Accelerated(session));
      }
      Err(e) => {
        warn!("硬件加速会话创建失败, 回退到 CPU: {}", e);
      }
    }
  }

  let session = fallback()?;
  info!("使用 CPU 回退推理会话");
  Ok(SessionChoice::Fallback(session))
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;

  type Step = fn() -> Result<&'static str, String>;

  #[test]
  fn accelerated_path_wins_when_it_succeeds() {
    let fallback_called = Cell::new(false);
    let choice = build_with_fallback(Some(|| Ok::<_, String>("npu")), || {
      fallback_called.set(true);
      Ok("cpu")
    })
    .unwrap();
    assert_eq!(choice.kind(), SessionKind::Accelerated);
    assert_eq!(choice.into_inner(), "npu");
    assert!(!fallback_called.get());
  }

  #[test]
  fn falls_back_once_on_accelerator_failure() {
    let choice = build_with_fallback(Some(|| Err::<&str, _>("no htp".to_string())), || {
      Ok("cpu")
    })
    .unwrap();
    assert_eq!(choice.kind(), SessionKind::Fallback);
    assert_eq!(choice.into_inner(), "cpu");
  }

  #[test]
  fn skips_accelerator_when_not_requested() {
    let choice = build_with_fallback(None::<Step>, || Ok::<_, String>("cpu")).unwrap();
    assert_eq!(choice.kind(), SessionKind::Fallback);
  }

  #[test]
  fn fallback_failure_is_returned() {
    let result = build_with_fallback(Some(|| Err::<&str, _>("a".to_string())), || {
      Err("b".to_string())
    });
    assert_eq!(result.unwrap_err(), "b");
  }
}
