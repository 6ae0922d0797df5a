// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/output/draw.rs - 表盘识别结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut};
use thiserror::Error;
use tracing::debug;

use crate::geometry::Quadrilateral;

// 绘制常量
const KEYPOINT_RADIUS: i32 = 5;
const KEYPOINT_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const POLYGON_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const POLYGON_THICKNESS: u32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 0]; // 黄色
const TEXT_FONT_SIZE: f32 = 24.0;
const TEXT_OFFSET_Y: i32 = 10;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  FontRead(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  FontInvalid(String),
}

/// 在原始帧上标出表盘四角、边框和识别到的时间
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  keypoint_radius: i32,
  keypoint_color: [u8; 3],
  polygon_color: [u8; 3],
  polygon_thickness: u32,
  text_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: TEXT_FONT_SIZE,
      keypoint_radius: KEYPOINT_RADIUS,
      keypoint_color: KEYPOINT_COLOR,
      polygon_color: POLYGON_COLOR,
      polygon_thickness: POLYGON_THICKNESS,
      text_color: TEXT_COLOR,
    }
  }
}

impl Draw {
  pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::FontInvalid(e.to_string()))?;
    Ok(Self::default().with_font(font))
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 绘制关键点、闭合多边形，并在第一个关键点上方写出 `Result: {text}`
  pub fn annotate(&self, image: &mut RgbImage, quad: &Quadrilateral, text: &str) {
    let points = quad.points();

    for i in 0..points.len() {
      let start = points[i];
      let end = points[(i + 1) % points.len()];
      for offset in 0..self.polygon_thickness {
        let offset = offset as f32;
        draw_line_segment_mut(
          image,
          (start[0] + offset, start[1] + offset),
          (end[0] + offset, end[1] + offset),
          Rgb(self.polygon_color),
        );
      }
    }

    for point in points {
      draw_filled_circle_mut(
        image,
        (point[0].round() as i32, point[1].round() as i32),
        self.keypoint_radius,
        Rgb(self.keypoint_color),
      );
    }

    let Some(font) = &self.font else {
      debug!("未配置字体，跳过文字绘制");
      return;
    };

    let top_left = quad.top_left();
    draw_text_mut(
      image,
      Rgb(self.text_color),
      top_left[0].round() as i32,
      top_left[1].round() as i32 - TEXT_OFFSET_Y,
      PxScale::from(self.font_size),
      font,
      &format!("Result: {}", text),
    );
  }
}
