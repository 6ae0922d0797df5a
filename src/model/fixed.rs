// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/model/fixed.rs - 固定关键点
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

//! 摄像头固定对准时钟时，表盘四角在画面中的位置不变，
//! 可以直接在 URL 中写出四个角点代替姿态模型：
//!
//! `fixed:///?points=120,80;500,95;480,300;140,290`
//!
//! 顺序为 左上;右上;右下;左下。

use std::convert::Infallible;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::Point,
  model::{Model, PoseCandidate, PoseResult},
};

#[derive(Error, Debug)]
pub enum FixedKeypointsError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("缺少 points 参数")]
  MissingPoints,
  #[error("关键点格式错误: {0}")]
  InvalidPoints(String),
}

#[derive(Debug, Clone)]
pub struct FixedKeypoints {
  points: [Point; 4],
}

impl FixedKeypoints {
  pub fn new(points: [Point; 4]) -> Self {
    Self { points }
  }
}

impl FromUrlWithScheme for FixedKeypoints {
  const SCHEME: &'static str = "fixed";
}

impl FromUrl for FixedKeypoints {
  type Error = FixedKeypointsError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FixedKeypointsError::SchemeMismatch(url.scheme().to_string()));
    }

    let value = url
      .query_pairs()
      .find(|(k, _)| k == "points")
      .map(|(_, v)| v.into_owned())
      .ok_or(FixedKeypointsError::MissingPoints)?;

    let points = parse_points(&value)?;
    info!("使用固定关键点: {:?}", points);
    Ok(Self::new(points))
  }
}

fn parse_points(value: &str) -> Result<[Point; 4], FixedKeypointsError> {
  let parsed = value
    .split(';')
    .map(|pair| {
      let mut coords = pair.split(',').map(|c| c.trim().parse::<f32>());
      match (coords.next(), coords.next(), coords.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) if x.is_finite() && y.is_finite() => Ok([x, y]),
        _ => Err(FixedKeypointsError::InvalidPoints(pair.to_string())),
      }
    })
    .collect::<Result<Vec<Point>, _>>()?;

  let count = parsed.len();
  parsed.try_into().map_err(|_| {
    FixedKeypointsError::InvalidPoints(format!("需要 4 个点, 实际 {} 个", count))
  })
}

impl Model for FixedKeypoints {
  type Input = RgbImage;
  type Output = PoseResult;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (w, h) = (input.width() as f32, input.height() as f32);
    let candidate = PoseCandidate {
      score: 1.0,
      bbox: [0.0, 0.0, w, h],
      keypoints: Some(self.points.to_vec().into_boxed_slice()),
    };
    Ok(vec![candidate].into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_points_from_url() {
    let url = Url::parse("fixed:///?points=10,20;300,20;300,120.5;10,120").unwrap();
    let model = FixedKeypoints::from_url(&url).unwrap();
    assert_eq!(
      model.points,
      [[10.0, 20.0], [300.0, 20.0], [300.0, 120.5], [10.0, 120.0]]
    );
  }

  #[test]
  fn rejects_wrong_point_count() {
    let url = Url::parse("fixed:///?points=10,20;300,20;300,120").unwrap();
    assert!(matches!(
      FixedKeypoints::from_url(&url),
      Err(FixedKeypointsError::InvalidPoints(_))
    ));
  }

  #[test]
  fn rejects_malformed_pair() {
    let url = Url::parse("fixed:///?points=10;300,20;300,120;1,1").unwrap();
    assert!(matches!(
      FixedKeypoints::from_url(&url),
      Err(FixedKeypointsError::InvalidPoints(_))
    ));
  }

  #[test]
  fn rejects_missing_points_and_scheme() {
    let url = Url::parse("fixed:///").unwrap();
    assert!(matches!(
      FixedKeypoints::from_url(&url),
      Err(FixedKeypointsError::MissingPoints)
    ));
    let url = Url::parse("image:///a.png").unwrap();
    assert!(matches!(
      FixedKeypoints::from_url(&url),
      Err(FixedKeypointsError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn infers_single_candidate() {
    let model = FixedKeypoints::new([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]]);
    let result = model.infer(&RgbImage::new(8, 8)).unwrap();
    assert_eq!(result.candidates.len(), 1);
    let keypoints = result.candidates[0].keypoints.as_ref().unwrap();
    assert_eq!(keypoints.len(), 4);
    assert_eq!(keypoints[2], [5.0, 6.0]);
  }
}
