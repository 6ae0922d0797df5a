// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  prelude::*,
  video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, url_path};

const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法打开设备 {0}: {1}")]
  OpenDevice(String, std::io::Error),
  #[error("V4L2 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("摄像头不支持 YUYV，实际格式 {0}")]
  UnsupportedFormat(FourCC),
}

/// 直接通过 V4L2 读取 YUYV 摄像头帧
pub struct V4lInput {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  stride: usize,
  // 流结束前设备句柄需要一直存活
  _device: Device,
}

impl V4lInput {
  pub fn open(path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    let device =
      Device::with_path(path).map_err(|e| V4lInputError::OpenDevice(path.to_string(), e))?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedFormat(format.fourcc));
    }

    info!(
      "打开摄像头 {} ({}x{}, 每行 {} 字节)",
      path, format.width, format.height, format.stride
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    Ok(Self {
      stream,
      width: format.width,
      height: format.height,
      stride: format.stride as usize,
      _device: device,
    })
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4lInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut width = 640;
    let mut height = 480;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => width = value.parse().unwrap_or(width),
        "height" => height = value.parse().unwrap_or(height),
        _ => {}
      }
    }

    Self::open(&url_path(url), width, height)
  }
}

impl Iterator for V4lInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self.stream.next() {
      Ok((buffer, _meta)) => yuyv_to_rgb(buffer, self.width, self.height, self.stride),
      Err(e) => {
        error!("无法捕获帧: {}", e);
        None
      }
    }
  }
}

/// YUYV 4:2:2 转 RGB，每 4 字节编码两个像素
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbImage> {
  let row_bytes = width as usize * 2;
  let stride = stride.max(row_bytes);
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for row in 0..height as usize {
    let line = yuyv.get(row * stride..row * stride + row_bytes)?;
    for chunk in line.chunks_exact(4) {
      let u = chunk[1] as f32 - 128.0;
      let v = chunk[3] as f32 - 128.0;
      for y in [chunk[0] as f32, chunk[2] as f32] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }
  }

  RgbImage::from_raw(width, height, rgb)
}
