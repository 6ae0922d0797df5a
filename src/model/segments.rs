// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/model/segments.rs - 七段数码管规则识别
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

//! 不依赖神经网络的数字识别：把校正后的表盘等分为若干数字格，
//! 在每格的七个笔段区域统计亮灭，再按笔段组合查表得到数字。
//!
//! URL 形如 `segments:///?digits=4&threshold=128&invert=1&margin=0.1`：
//! - `digits`: 数字格数量，默认 4
//! - `threshold`: 灰度阈值，缺省时使用 Otsu 自动阈值
//! - `invert`: 亮笔段暗背景（LED）时设置，默认按暗笔段亮背景（LCD）处理
//! - `margin`: 每格左右留白比例，默认 0.1

use std::{collections::HashMap, convert::Infallible};

use image::{GrayImage, RgbImage};
use imageproc::{contrast::otsu_level, rect::Rect};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Digit, Model},
};

const DEFAULT_DIGITS: usize = 4;
/// 一块数码管最多的位数
const MAX_DIGITS: usize = 16;
const DEFAULT_MARGIN: f32 = 0.1;
const VERTICAL_MARGIN: f32 = 0.08;
/// 灰度极差低于该值时认为画面里没有笔段
const MIN_CONTRAST: u8 = 32;

// 笔段位序：a 上, b 右上, c 右下, d 下, e 左下, f 左上, g 中
const SEG_A: u8 = 1 << 0;
const SEG_B: u8 = 1 << 1;
const SEG_C: u8 = 1 << 2;
const SEG_D: u8 = 1 << 3;
const SEG_E: u8 = 1 << 4;
const SEG_F: u8 = 1 << 5;
const SEG_G: u8 = 1 << 6;

/// 笔段在数字格内的位置 (x0, y0, x1, y1)，按格宽高归一化
const SEGMENT_REGIONS: [[f32; 4]; 7] = [
  [0.2, 0.0, 0.8, 0.15],    // a
  [0.8, 0.1, 1.0, 0.45],    // b
  [0.8, 0.55, 1.0, 0.9],    // c
  [0.2, 0.85, 0.8, 1.0],    // d
  [0.0, 0.55, 0.2, 0.9],    // e
  [0.0, 0.1, 0.2, 0.45],    // f
  [0.2, 0.425, 0.8, 0.575], // g
];

const DIGIT_PATTERNS: [(u8, u32); 13] = [
  (SEG_A | SEG_B | SEG_C | SEG_D | SEG_E | SEG_F, 0),
  (SEG_B | SEG_C, 1),
  (SEG_A | SEG_B | SEG_G | SEG_E | SEG_D, 2),
  (SEG_A | SEG_B | SEG_G | SEG_C | SEG_D, 3),
  (SEG_F | SEG_G | SEG_B | SEG_C, 4),
  (SEG_A | SEG_F | SEG_G | SEG_C | SEG_D, 5),
  (SEG_A | SEG_F | SEG_G | SEG_E | SEG_D | SEG_C, 6),
  (SEG_F | SEG_G | SEG_E | SEG_D | SEG_C, 6),
  (SEG_A | SEG_B | SEG_C, 7),
  (SEG_A | SEG_B | SEG_C | SEG_F, 7),
  (SEG_A | SEG_B | SEG_C | SEG_D | SEG_E | SEG_F | SEG_G, 8),
  (SEG_A | SEG_B | SEG_C | SEG_D | SEG_F | SEG_G, 9),
  (SEG_A | SEG_B | SEG_C | SEG_F | SEG_G, 9),
];

#[derive(Error, Debug)]
pub enum SevenSegmentError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct SevenSegment {
  digits: usize,
  threshold: Option<u8>,
  invert: bool,
  margin: f32,
}

impl Default for SevenSegment {
  fn default() -> Self {
    Self {
      digits: DEFAULT_DIGITS,
      threshold: None,
      invert: false,
      margin: DEFAULT_MARGIN,
    }
  }
}

impl SevenSegment {
  pub fn with_digits(mut self, digits: usize) -> Self {
    self.digits = digits.clamp(1, MAX_DIGITS);
    self
  }

  pub fn with_threshold(mut self, threshold: Option<u8>) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_invert(mut self, invert: bool) -> Self {
    self.invert = invert;
    self
  }

  pub fn with_margin(mut self, margin: f32) -> Self {
    self.margin = margin.clamp(0.0, 0.45);
    self
  }

  /// 第 `index` 个数字格的像素区域（已去除留白）
  fn cell_rect(&self, width: u32, height: u32, index: usize) -> [f32; 4] {
    let cell_w = width as f32 / self.digits as f32;
    let x0 = cell_w * index as f32 + cell_w * self.margin;
    let x1 = cell_w * (index + 1) as f32 - cell_w * self.margin;
    let y0 = height as f32 * VERTICAL_MARGIN;
    let y1 = height as f32 * (1.0 - VERTICAL_MARGIN);
    [x0, y0, x1, y1]
  }

  fn is_lit(&self, value: u8, level: u8) -> bool {
    if self.invert {
      value > level
    } else {
      value <= level
    }
  }

  /// 对一个数字格解码，返回 (笔段组合, 置信度)
  fn read_cell(&self, gray: &GrayImage, cell: [f32; 4], level: u8) -> (u8, f32) {
    let mut pattern = 0u8;
    let mut confidence = 1.0f32;

    for (bit, region) in SEGMENT_REGIONS.iter().enumerate() {
      let Some(rect) = segment_rect(cell, *region) else {
        return (0, 0.0);
      };

      let mut lit = 0u32;
      let mut total = 0u32;
      for y in rect.top()..=rect.bottom() {
        for x in rect.left()..=rect.right() {
          if x < 0 || y < 0 || x as u32 >= gray.width() || y as u32 >= gray.height() {
            continue;
          }
          total += 1;
          if self.is_lit(gray.get_pixel(x as u32, y as u32)[0], level) {
            lit += 1;
          }
        }
      }
      if total == 0 {
        return (0, 0.0);
      }

      let ratio = lit as f32 / total as f32;
      if ratio > 0.5 {
        pattern |= 1 << bit;
      }
      confidence = confidence.min((ratio - 0.5).abs() * 2.0);
    }

    (pattern, confidence)
  }
}

/// 笔段区域换算为像素矩形，面积为零时返回 `None`
pub(crate) fn segment_rect(cell: [f32; 4], region: [f32; 4]) -> Option<Rect> {
  let [cx0, cy0, cx1, cy1] = cell;
  let (cw, ch) = (cx1 - cx0, cy1 - cy0);
  let x0 = (cx0 + region[0] * cw).round() as i32;
  let y0 = (cy0 + region[1] * ch).round() as i32;
  let x1 = (cx0 + region[2] * cw).round() as i32;
  let y1 = (cy0 + region[3] * ch).round() as i32;
  if x1 <= x0 || y1 <= y0 {
    return None;
  }
  Some(Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

fn decode_pattern(pattern: u8) -> Option<u32> {
  DIGIT_PATTERNS
    .iter()
    .find(|(p, _)| *p == pattern)
    .map(|(_, digit)| *digit)
}

impl FromUrlWithScheme for SevenSegment {
  const SCHEME: &'static str = "segments";
}

impl FromUrl for SevenSegment {
  type Error = SevenSegmentError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SevenSegmentError::SchemeMismatch(url.scheme().to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut model = SevenSegment::default();
    if let Some(v) = query.get("digits") {
      let digits = v
        .parse::<usize>()
        .ok()
        .filter(|d| (1..=MAX_DIGITS).contains(d))
        .ok_or_else(|| SevenSegmentError::InvalidParameter("digits", v.clone()))?;
      model = model.with_digits(digits);
    }
    if let Some(v) = query.get("threshold") {
      let threshold = v
        .parse::<u8>()
        .map_err(|_| SevenSegmentError::InvalidParameter("threshold", v.clone()))?;
      model = model.with_threshold(Some(threshold));
    }
    if let Some(v) = query.get("margin") {
      let margin = v
        .parse::<f32>()
        .ok()
        .filter(|m| (0.0..0.5).contains(m))
        .ok_or_else(|| SevenSegmentError::InvalidParameter("margin", v.clone()))?;
      model = model.with_margin(margin);
    }
    if let Some(v) = query.get("invert") {
      model = model.with_invert(!matches!(v.as_str(), "0" | "false"));
    }

    Ok(model)
  }
}

impl Model for SevenSegment {
  type Input = RgbImage;
  type Output = DetectResult<Digit>;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let gray = image::imageops::grayscale(input);
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
      return Ok(DetectResult::default());
    }

    let (min, max) = gray
      .pixels()
      .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max.saturating_sub(min) < MIN_CONTRAST {
      debug!("画面对比度不足 ({} - {})，跳过识别", min, max);
      return Ok(DetectResult::default());
    }

    let level = self.threshold.unwrap_or_else(|| otsu_level(&gray));
    debug!("七段识别阈值: {}", level);

    let mut items = Vec::with_capacity(self.digits);
    for index in 0..self.digits {
      let cell = self.cell_rect(width, height, index);
      let (pattern, score) = self.read_cell(&gray, cell, level);
      if pattern == 0 {
        continue;
      }
      match decode_pattern(pattern) {
        Some(value) => items.push(DetectItem {
          kind: Digit(value),
          score,
          bbox: cell,
        }),
        None => debug!("第 {} 格笔段组合 {:07b} 无法识别", index, pattern),
      }
    }

    Ok(items.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use imageproc::drawing::draw_filled_rect_mut;

  const WHITE: Rgb<u8> = Rgb([235, 235, 225]);
  const BLACK: Rgb<u8> = Rgb([20, 20, 30]);

  fn pattern_of(digit: u32) -> u8 {
    DIGIT_PATTERNS
      .iter()
      .find(|(_, d)| *d == digit)
      .map(|(p, _)| *p)
      .unwrap()
  }

  /// 按识别时相同的几何关系绘制一块数码管
  fn render(model: &SevenSegment, digits: &[Option<u32>], fg: Rgb<u8>, bg: Rgb<u8>) -> RgbImage {
    let (width, height) = (320, 128);
    let mut image = RgbImage::from_pixel(width, height, bg);
    for (index, digit) in digits.iter().enumerate() {
      let Some(digit) = digit else { continue };
      let cell = model.cell_rect(width, height, index);
      let pattern = pattern_of(*digit);
      for (bit, region) in SEGMENT_REGIONS.iter().enumerate() {
        if pattern & (1 << bit) != 0 {
          draw_filled_rect_mut(&mut image, segment_rect(cell, *region).unwrap(), fg);
        }
      }
    }
    image
  }

  fn read(model: &SevenSegment, image: &RgbImage) -> Vec<u32> {
    model
      .infer(image)
      .unwrap()
      .items
      .iter()
      .map(|item| item.kind.0)
      .collect()
  }

  #[test]
  fn reads_dark_segments() {
    let model = SevenSegment::default();
    let image = render(&model, &[Some(1), Some(2), Some(3), Some(4)], BLACK, WHITE);
    assert_eq!(read(&model, &image), vec![1, 2, 3, 4]);
  }

  #[test]
  fn reads_all_digits_led() {
    let model = SevenSegment::default().with_digits(10).with_invert(true);
    let digits: Vec<Option<u32>> = (0..10).map(Some).collect();
    let image = render(&model, &digits, WHITE, BLACK);
    assert_eq!(read(&model, &image), (0..10).collect::<Vec<_>>());
  }

  #[test]
  fn blank_cell_is_skipped() {
    let model = SevenSegment::default();
    let image = render(&model, &[None, Some(7), Some(5), Some(9)], BLACK, WHITE);
    let result = model.infer(&image).unwrap();
    assert_eq!(result.len(), 3);
    assert!(result.items[0].bbox[0] > 80.0);
    assert!(result.items.iter().all(|item| item.score > 0.9));
  }

  #[test]
  fn flat_image_has_no_digits() {
    let model = SevenSegment::default();
    let image = RgbImage::from_pixel(320, 128, WHITE);
    assert!(model.infer(&image).unwrap().is_empty());
  }

  #[test]
  fn parses_url() {
    let url = Url::parse("segments:///?digits=6&threshold=90&invert=1&margin=0.2").unwrap();
    let model = SevenSegment::from_url(&url).unwrap();
    assert_eq!(model.digits, 6);
    assert_eq!(model.threshold, Some(90));
    assert!(model.invert);
    assert!((model.margin - 0.2).abs() < f32::EPSILON);

    let url = Url::parse("segments:///?digits=0").unwrap();
    assert!(matches!(
      SevenSegment::from_url(&url),
      Err(SevenSegmentError::InvalidParameter("digits", _))
    ));
  }

  #[test]
  fn digit_count_is_bounded() {
    for digits in ["17", "1000000000", "18446744073709551615"] {
      let url = Url::parse(&format!("segments:///?digits={}", digits)).unwrap();
      assert!(matches!(
        SevenSegment::from_url(&url),
        Err(SevenSegmentError::InvalidParameter("digits", v)) if v == digits
      ));
    }

    let url = Url::parse("segments:///?digits=16").unwrap();
    assert_eq!(SevenSegment::from_url(&url).unwrap().digits, MAX_DIGITS);

    let model = SevenSegment::default().with_digits(usize::MAX);
    assert_eq!(model.digits, MAX_DIGITS);
    assert!(model.infer(&RgbImage::new(64, 16)).unwrap().is_empty());
  }
}
