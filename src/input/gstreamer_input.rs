// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持两种来源：
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&rotate=180`：V4L2 摄像头
//! - `gst://file/path/to/video.mp4`：视频文件
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 每一帧都以原始分辨率的 [`RgbImage`] 交出，不做缩放。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const DEFAULT_CAMERA_FORMAT: &str = "YUY2";

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("不支持的输入来源 '{0}'（可用: camera, file）")]
  UnknownSource(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl PipelineStage {
  fn describe(&self) -> String {
    match self {
      PipelineStage::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      PipelineStage::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      PipelineStage::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      PipelineStage::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  stages: Vec<PipelineStage>,
}

impl Default for GStreamerInputPipelineBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self { stages: Vec::new() }
  }

  pub fn camera(mut self, camera: &str, width: u32, height: u32, fps: u32) -> Self {
    self.stages.push(PipelineStage::CameraSource {
      camera: camera.to_string(),
      io_mode: None,
      format: DEFAULT_CAMERA_FORMAT.to_string(),
      width,
      height,
      fps,
    });
    self
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .stages
      .push(PipelineStage::FileSource(path.to_string()));
    self
  }

  pub fn rotate(mut self, degrees: &str) -> Self {
    if let Some(item) = video_flip(degrees) {
      self.stages.push(item);
    }
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.stages.push(PipelineStage::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .stages
      .iter()
      .map(PipelineStage::describe)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer 输入管道: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

fn video_flip(rotate: &str) -> Option<PipelineStage> {
  let method = match rotate {
    "90" => 1,
    "180" => 2,
    "270" => 3,
    "0" => return None,
    other => {
      warn!("忽略不支持的旋转角度: {}", other);
      return None;
    }
  };
  Some(PipelineStage::VideoFlip { method })
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut builder = match url.host_str() {
      Some("camera") => {
        let mut builder = Self::new();
        builder.stages.push(PipelineStage::CameraSource {
          camera: url_path(url).into_owned(),
          io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
          format: query
            .get("format")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CAMERA_FORMAT.to_string()),
          width: parse("width", DEFAULT_WIDTH),
          height: parse("height", DEFAULT_HEIGHT),
          fps: parse("fps", DEFAULT_FPS),
        });
        builder
      }
      Some("file") => Self::new().file(&url_path(url)),
      other => {
        return Err(GStreamerInputError::UnknownSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };

    if let Some(rotate) = query.get("rotate") {
      builder = builder.rotate(rotate);
    }

    Ok(builder.target_format("RGB"))
  }
}

/// GStreamer 视频输入，迭代产出原始分辨率的 RGB 帧
///
/// 流结束或拉取失败时迭代结束。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        info!("视频流结束: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    convert_sample(sample)
      .map_err(|e| {
        error!("无法转换视频帧: {}", e);
        e
      })
      .ok()
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;

  let stride = video_info.stride()[0].max(0) as usize;
  packed_rgb_from_strided(
    map.as_slice(),
    video_info.width(),
    video_info.height(),
    stride,
    bgr,
  )
}

/// 把按行对齐（stride）的 RGB/BGR 数据整理成紧凑的 RGB 图像
fn packed_rgb_from_strided(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
  bgr: bool,
) -> Result<RgbImage, GStreamerInputError> {
  let row_bytes = width as usize * 3;
  let stride = stride.max(row_bytes);
  let expected = match height as usize {
    0 => 0,
    h => stride * (h - 1) + row_bytes,
  };
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut packed = Vec::with_capacity(row_bytes * height as usize);
  for row in 0..height as usize {
    let line = &data[row * stride..row * stride + row_bytes];
    if bgr {
      for px in line.chunks_exact(3) {
        packed.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      packed.extend_from_slice(line);
    }
  }

  RgbImage::from_raw(width, height, packed).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row_bytes * height as usize,
    actual: data.len(),
  })
}
