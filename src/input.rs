// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/input.rs - 视频/图像输入
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

//! 帧来源。每种来源都是产出 [`RgbImage`] 的迭代器，迭代结束即视为流结束。

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod folder_input;
pub use self::folder_input::{FolderInput, FolderInputError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("目录输入错误: {0}")]
  FolderInputError(#[from] FolderInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L2 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("不支持的输入方案 '{0}'")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  Folder(FolderInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "v4l_input")]
  V4lInput(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      FolderInput::SCHEME => Ok(InputWrapper::Folder(FolderInput::from_url(url)?)),
      #[cfg(feature = "read_image_file")]
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInputPipelineBuilder::SCHEME => {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(InputWrapper::GStreamerInput(input))
      }
      #[cfg(feature = "v4l_input")]
      V4lInput::SCHEME => Ok(InputWrapper::V4lInput(V4lInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Folder(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.next(),
    }
  }
}
