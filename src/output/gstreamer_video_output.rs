// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频输出
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

//! # GStreamer 视频输出
//!
//! - `display://?fps=15`：在窗口中实时显示标注后的画面
//! - `display://?fps=15&warped`：显示矫正后的表盘，未检测到表盘的帧跳过
//! - `video:///output.mp4?fps=15`：编码保存为视频文件（mp4 / mkv / webm）
//!
//! 画面尺寸由第一帧决定，之后尺寸不同的帧会被缩放到该尺寸。

use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, output::Render, reader::FrameResult, url_path};

pub const DISPLAY_SCHEME: &str = "display";
pub const VIDEO_SCHEME: &str = "video";

const DEFAULT_FPS: i32 = 15;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法转换为 appsrc")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("无法创建缓冲区")]
  BufferCreationError,
}

#[derive(Default)]
struct StreamState {
  size: Option<(u32, u32)>,
  frame_count: u64,
}

pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  warped: bool,
  state: Mutex<StreamState>,
}

fn sink_description(scheme: &str, path: &str) -> Result<String, GStreamerVideoOutputError> {
  let encoder = if path.ends_with(".mkv") {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
  } else if path.ends_with(".webm") {
    "vp8enc ! webmmux"
  } else {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux"
  };

  match scheme {
    DISPLAY_SCHEME => Ok("autovideosink sync=false".to_string()),
    VIDEO_SCHEME => Ok(format!("{} ! filesink location={}", encoder, path)),
    other => Err(GStreamerVideoOutputError::SchemeMismatch(other.to_string())),
  }
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let sink = sink_description(url.scheme(), &url_path(url))?;

    gst::init()?;

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<i32>().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);
    let warped = url.query_pairs().any(|(k, _)| k == "warped");

    let pipeline_desc = format!(
      "appsrc name=src is-live=true format=time ! videoconvert ! {}",
      sink
    );
    info!("GStreamer 输出管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      fps,
      warped,
      state: Mutex::new(StreamState::default()),
    })
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();

    // 等待 EOS 传到 filesink，视频文件才能正确收尾
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(1),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输出管道: {}", e);
    }

    let state = self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    info!("视频输出关闭，共写入 {} 帧", state.frame_count);
  }
}

impl GStreamerVideoOutput {
  fn push_image(&self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let mut state = self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());

    let (width, height) = match state.size {
      Some(size) => size,
      None => {
        let size = image.dimensions();
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", size.0 as i32)
          .field("height", size.1 as i32)
          .field("framerate", gst::Fraction::new(self.fps, 1))
          .build();
        self.appsrc.set_caps(Some(&caps));
        self.pipeline.set_state(gst::State::Playing)?;
        info!("视频输出开始: {}x{} @ {} fps", size.0, size.1, self.fps);
        state.size = Some(size);
        size
      }
    };

    let resized;
    let image = if image.dimensions() == (width, height) {
      image
    } else {
      resized = image::imageops::resize(image, width, height, FilterType::Triangle);
      &resized
    };

    let data = image.as_raw();
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let frame_duration = 1_000_000_000 / self.fps as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        state.frame_count * frame_duration,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
      let mut buffer_map = buffer_ref
        .map_writable()
        .map_err(|_| GStreamerVideoOutputError::PipelineError("无法映射缓冲区".to_string()))?;
      buffer_map.copy_from_slice(data);
    }
    state.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;

    Ok(())
  }
}

impl Render<RgbImage, FrameResult> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, _frame: &RgbImage, result: &FrameResult) -> Result<(), Self::Error> {
    if self.warped {
      match &result.rectified {
        Some(rectified) => self.push_image(rectified),
        None => Ok(()),
      }
    } else {
      self.push_image(&result.visualization)
    }
  }
}
