// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/detector.rs - 关键点与数字检测适配层
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

//! 把推理模型的原始输出整理成流水线需要的形状：
//! 关键点模型给出 `Option<Quadrilateral>`，数字模型给出从左到右的标签序列。
//! 两者都不会因为模型出错而让单帧处理失败。

use std::fmt::Display;

use image::RgbImage;
use tracing::{debug, warn};

use crate::{
  geometry::{Point, Quadrilateral},
  model::{DetectResult, Model, PoseResult, WithLabel},
};

/// 表盘关键点检测
pub struct KeypointDetector<M> {
  model: M,
  confidence: f32,
}

impl<M> KeypointDetector<M>
where
  M: Model<Input = RgbImage, Output = PoseResult>,
  M::Error: Display,
{
  pub fn new(model: M, confidence: f32) -> Self {
    Self { model, confidence }
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  /// 检测表盘四角，顺序沿用模型给出的 左上、右上、右下、左下
  pub fn detect(&self, image: &RgbImage) -> Option<Quadrilateral> {
    let result = match self.model.infer(image) {
      Ok(result) => result,
      Err(e) => {
        warn!("关键点检测失败: {}", e);
        return None;
      }
    };

    let best = result
      .candidates
      .iter()
      .filter(|c| c.score >= self.confidence)
      .reduce(|best, c| if c.score > best.score { c } else { best })?;

    let keypoints: &[Point] = best.keypoints.as_deref()?;
    if keypoints.is_empty() {
      debug!("最佳候选没有关键点");
      return None;
    }

    let quad = match Quadrilateral::try_from(keypoints) {
      Ok(quad) => quad,
      Err(e) => {
        debug!("关键点数量不符: {}", e);
        return None;
      }
    };

    if quad.is_null() {
      debug!("关键点全为零，视为未检测到");
      return None;
    }

    debug!("检测到表盘关键点: {:?} (置信度 {:.2})", quad.points(), best.score);
    Some(quad)
  }
}

/// 数字识别
pub struct DigitDetector<M> {
  model: M,
  confidence: f32,
}

impl<M, T> DigitDetector<M>
where
  M: Model<Input = RgbImage, Output = DetectResult<T>>,
  M::Error: Display,
  T: WithLabel,
{
  pub fn new(model: M, confidence: f32) -> Self {
    Self { model, confidence }
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  /// 返回按检测框左边界从左到右排列的数字标签
  ///
  /// 空图像、没有检测结果或模型出错时都返回空序列。
  /// 不去重，也不补齐缺失的数字位。
  pub fn detect(&self, image: &RgbImage) -> Vec<String> {
    if image.width() == 0 || image.height() == 0 {
      debug!("输入图像为空，跳过数字识别");
      return Vec::new();
    }

    let result = match self.model.infer(image) {
      Ok(result) => result,
      Err(e) => {
        warn!("数字识别失败: {}", e);
        return Vec::new();
      }
    };

    let mut items: Vec<(f32, String)> = result
      .items
      .iter()
      .filter(|item| item.score >= self.confidence)
      .map(|item| (item.bbox[0], item.kind.to_label_str()))
      .collect();

    // 稳定排序，左边界相同时保持模型给出的顺序
    items.sort_by(|a, b| a.0.total_cmp(&b.0));

    let digits: Vec<String> = items.into_iter().map(|(_, label)| label).collect();
    debug!("识别到数字: {:?}", digits);
    digits
  }
}
