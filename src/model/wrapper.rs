// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/model/wrapper.rs - 按 URL 选择推理后端
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
use url::Url;

#[cfg(feature = "rknpu")]
use crate::model::{YoloDetect, YoloDetectBuilder, YoloError, YoloPose, YoloPoseBuilder};
use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    DetectResult, Digit, FixedKeypoints, FixedKeypointsError, Model, PoseResult, SevenSegment,
    SevenSegmentError,
  },
};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("固定关键点配置错误: {0}")]
  FixedKeypointsError(#[from] FixedKeypointsError),
  #[error("七段识别配置错误: {0}")]
  SevenSegmentError(#[from] SevenSegmentError),
  #[cfg(feature = "rknpu")]
  #[error("YOLO 模型错误: {0}")]
  YoloError(#[from] YoloError),
  #[error("不支持的模型方案 '{0}'（可用: {1}）")]
  SchemeMismatch(String, &'static str),
}

#[cfg(feature = "rknpu")]
const KEYPOINT_SCHEMES: &str = "fixed, yolo-pose";
#[cfg(not(feature = "rknpu"))]
const KEYPOINT_SCHEMES: &str = "fixed";

#[cfg(feature = "rknpu")]
const DIGIT_SCHEMES: &str = "segments, yolo-detect";
#[cfg(not(feature = "rknpu"))]
const DIGIT_SCHEMES: &str = "segments";

/// 表盘关键点模型
pub enum KeypointModelWrapper {
  Fixed(FixedKeypoints),
  #[cfg(feature = "rknpu")]
  YoloPose(YoloPose),
}

impl FromUrl for KeypointModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      FixedKeypoints::SCHEME => Ok(KeypointModelWrapper::Fixed(FixedKeypoints::from_url(url)?)),
      #[cfg(feature = "rknpu")]
      YoloPoseBuilder::SCHEME => {
        let model = YoloPoseBuilder::from_url(url)?.build()?;
        Ok(KeypointModelWrapper::YoloPose(model))
      }
      other => Err(ModelError::SchemeMismatch(
        other.to_string(),
        KEYPOINT_SCHEMES,
      )),
    }
  }
}

impl Model for KeypointModelWrapper {
  type Input = RgbImage;
  type Output = PoseResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      KeypointModelWrapper::Fixed(model) => model.infer(input).map_err(|e| match e {}),
      #[cfg(feature = "rknpu")]
      KeypointModelWrapper::YoloPose(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}

/// 数字识别模型
pub enum DigitModelWrapper {
  SevenSegment(SevenSegment),
  #[cfg(feature = "rknpu")]
  YoloDetect(YoloDetect),
}

impl FromUrl for DigitModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SevenSegment::SCHEME => Ok(DigitModelWrapper::SevenSegment(SevenSegment::from_url(
        url,
      )?)),
      #[cfg(feature = "rknpu")]
      YoloDetectBuilder::SCHEME => {
        let model = YoloDetectBuilder::from_url(url)?.build()?;
        Ok(DigitModelWrapper::YoloDetect(model))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string(), DIGIT_SCHEMES)),
    }
  }
}

impl Model for DigitModelWrapper {
  type Input = RgbImage;
  type Output = DetectResult<Digit>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      DigitModelWrapper::SevenSegment(model) => model.infer(input).map_err(|e| match e {}),
      #[cfg(feature = "rknpu")]
      DigitModelWrapper::YoloDetect(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
