// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/input/folder_input.rs - 图像目录输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Kanzhong Contributors

use std::{collections::VecDeque, path::PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum FolderInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法读取目录 {0}: {1}")]
  ReadDir(PathBuf, std::io::Error),
}

/// 按文件名字典序逐张读取目录中的图像
///
/// 读不出来的文件记一条警告后跳过，不会中断整个序列。
pub struct FolderInput {
  files: VecDeque<PathBuf>,
}

impl FolderInput {
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FolderInputError> {
    let dir = dir.into();
    let entries = std::fs::read_dir(&dir).map_err(|e| FolderInputError::ReadDir(dir.clone(), e))?;

    let mut files: Vec<PathBuf> = entries
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image(path))
      .collect();
    files.sort();

    info!("目录 {} 中共有 {} 张图像", dir.display(), files.len());
    Ok(Self {
      files: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

fn is_image(path: &std::path::Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = FolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FolderInputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(url_path(url).into_owned())
  }
}

impl Iterator for FolderInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.files.pop_front() {
      let decoded = ImageReader::open(&path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      match decoded {
        Ok(image) => {
          debug!("读取图像 {}", path.display());
          return Some(image.to_rgb8());
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
