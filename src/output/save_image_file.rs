// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, reader::FrameResult, url_path};

/// 把可视化结果保存到固定路径，矫正图保存到同目录的 `<名称>_warped.<扩展名>`
///
/// 当前帧没有矫正图时删除已有的矫正图文件。
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(url_path(uri).into_owned()))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn warped_path(&self) -> PathBuf {
    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let name = match self.path.extension() {
      Some(ext) => format!("{}_warped.{}", stem, ext.to_string_lossy()),
      None => format!("{}_warped", stem),
    };
    self.path.with_file_name(name)
  }

  fn save_image(&self, image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
      }
    }

    image.save(path).map_err(SaveImageFileError::ImageError)?;
    info!("保存图像到文件: {}", path.display());

    Ok(())
  }
}

impl Render<RgbImage, FrameResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, _frame: &RgbImage, result: &FrameResult) -> Result<(), Self::Error> {
    self.save_image(&result.visualization, &self.path)?;
    let warped_path = self.warped_path();
    match &result.rectified {
      Some(rectified) => self.save_image(rectified, &warped_path)?,
      // 上一帧留下的矫正图已与当前结果不符
      None => match std::fs::remove_file(&warped_path) {
        Ok(()) => debug!("删除过期的矫正图: {}", warped_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(SaveImageFileError::IoError(e)),
      },
    }
    Ok(())
  }
}
