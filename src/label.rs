// 该文件是 Shaomiao （扫描） 项目的一部分。
// src/label.rs - 类别标签表
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

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

/// 按行存放的类别名称，启动时加载一次，之后只读
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  names: Box<[String]>,
}

impl LabelTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let table = Self::parse(&content)?;
    info!("加载标签文件 {}: {} 个类别", path.display(), table.len());
    Ok(table)
  }

  pub fn parse(content: &str) -> Result<Self, LabelError> {
    let mut names: Vec<String> = content
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();
    while names.last().is_some_and(|n| n.trim().is_empty()) {
      names.pop();
    }
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 越界或负数索引返回 `None`
  pub fn get(&self, index: i64) -> Option<&str> {
    usize::try_from(index)
      .ok()
      .and_then(|i| self.names.get(i))
      .map(String::as_str)
  }

  pub fn display_name(&self, index: i64) -> Cow<'_, str> {
    match self.get(index) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("#{}", index)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}
