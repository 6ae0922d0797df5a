// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/model.rs - 推理能力定义
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

use crate::geometry::Point;

/// 推理能力
///
/// 关键点模型、数字模型以及整个读钟流水线都实现该特征，
/// 具体由训练好的网络、固定配置还是手写规则给出结果，调用方并不关心。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，输入图像像素坐标
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 姿态模型的一个候选目标
#[derive(Debug, Clone)]
pub struct PoseCandidate {
  pub score: f32,
  pub bbox: [f32; 4],
  /// 关键点，`None` 表示模型没有给出关键点数据
  pub keypoints: Option<Box<[Point]>>,
}

#[derive(Debug, Clone, Default)]
pub struct PoseResult {
  pub candidates: Box<[PoseCandidate]>,
}

impl PoseResult {
  pub fn is_empty(&self) -> bool {
    self.candidates.is_empty()
  }
}

impl From<Vec<PoseCandidate>> for PoseResult {
  fn from(candidates: Vec<PoseCandidate>) -> Self {
    Self {
      candidates: candidates.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 数字类别，类别编号即数值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digit(pub u32);

impl WithLabel for Digit {
  fn to_label_str(&self) -> String {
    self.0.to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    Digit(id)
  }
}

mod fixed;
mod segments;
mod wrapper;
#[cfg(feature = "rknpu")]
mod yolo;

pub use self::fixed::{FixedKeypoints, FixedKeypointsError};
pub use self::segments::{SevenSegment, SevenSegmentError};
pub use self::wrapper::{DigitModelWrapper, KeypointModelWrapper, ModelError};
#[cfg(feature = "rknpu")]
pub use self::yolo::{YoloDetect, YoloDetectBuilder, YoloError, YoloPose, YoloPoseBuilder};
