// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/reader.rs - 逐帧读钟流水线
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

//! 单帧处理：关键点检测 → 透视矫正 → 数字识别 → 绘制结果。
//!
//! 帧与帧之间不保留任何状态，输入帧本身也不会被修改。

use std::{convert::Infallible, fmt::Display};

use image::RgbImage;
use tracing::{debug, warn};

use crate::{
  config::ReaderConfig,
  detector::{DigitDetector, KeypointDetector},
  geometry::{Quadrilateral, four_point_transform},
  model::{DetectResult, Model, PoseResult, WithLabel},
  output::draw::Draw,
};

/// 本帧没有读到时间
pub const PLACEHOLDER_TEXT: &str = "...";

/// 单帧处理结果
#[derive(Debug, Clone)]
pub struct FrameResult {
  /// 原始帧的副本，成功矫正时带有关键点、边框和文字标注
  pub visualization: RgbImage,
  /// 矫正后的表盘图像
  pub rectified: Option<RgbImage>,
  pub time_text: String,
  pub keypoints: Option<Quadrilateral>,
}

impl FrameResult {
  fn unannotated(frame: &RgbImage, keypoints: Option<Quadrilateral>) -> Self {
    Self {
      visualization: frame.clone(),
      rectified: None,
      time_text: PLACEHOLDER_TEXT.to_string(),
      keypoints,
    }
  }

  /// 是否读到了时间
  pub fn has_time(&self) -> bool {
    self.rectified.is_some() && self.time_text != PLACEHOLDER_TEXT
  }
}

pub struct ClockReader<P, D> {
  keypoints: KeypointDetector<P>,
  digits: DigitDetector<D>,
  target_size: Option<(u32, u32)>,
  draw: Draw,
}

impl<P, D, T> ClockReader<P, D>
where
  P: Model<Input = RgbImage, Output = PoseResult>,
  P::Error: Display,
  D: Model<Input = RgbImage, Output = DetectResult<T>>,
  D::Error: Display,
  T: WithLabel,
{
  pub fn new(config: &ReaderConfig, pose_model: P, digit_model: D) -> Self {
    Self {
      keypoints: KeypointDetector::new(pose_model, config.pose_confidence),
      digits: DigitDetector::new(digit_model, config.digit_confidence),
      target_size: config.target_size,
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn target_size(&self) -> Option<(u32, u32)> {
    self.target_size
  }

  pub fn process_frame(&self, frame: &RgbImage) -> FrameResult {
    let Some(quad) = self.keypoints.detect(frame) else {
      return FrameResult::unannotated(frame, None);
    };

    let rectified = match four_point_transform(frame, &quad, self.target_size) {
      Ok(rectified) => rectified,
      Err(e) => {
        warn!("透视矫正失败: {}", e);
        return FrameResult::unannotated(frame, Some(quad));
      }
    };

    let digits = self.digits.detect(&rectified);
    let time_text = if digits.is_empty() {
      PLACEHOLDER_TEXT.to_string()
    } else {
      digits.concat()
    };
    debug!("本帧识别结果: {}", time_text);

    let mut visualization = frame.clone();
    self.draw.annotate(&mut visualization, &quad, &time_text);

    FrameResult {
      visualization,
      rectified: Some(rectified),
      time_text,
      keypoints: Some(quad),
    }
  }
}

impl<P, D, T> Model for ClockReader<P, D>
where
  P: Model<Input = RgbImage, Output = PoseResult>,
  P::Error: Display,
  D: Model<Input = RgbImage, Output = DetectResult<T>>,
  D::Error: Display,
  T: WithLabel,
{
  type Input = RgbImage;
  type Output = FrameResult;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.process_frame(input))
  }
}
