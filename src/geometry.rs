// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/geometry.rs - 四点透视校正
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

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use thiserror::Error;

/// 二维点 `[x, y]`，单位为像素
pub type Point = [f32; 2];

/// 任取三个角点组成的三角形面积下限（平方像素），低于该值视为三点共线
const MIN_CORNER_AREA: f64 = 0.5;

/// 矫正输出每边的像素数必须小于该值
pub const MAX_RECTIFIED_SIDE: i64 = i16::MAX as i64;

/// 透视变换后超出原图范围的像素填充值
const BORDER_PIXEL: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RectifyError {
  #[error("关键点数量不足: 需要 4 个, 实际 {0} 个")]
  NotEnoughPoints(usize),
  #[error("关键点坐标无效: {0:?}")]
  NonFinitePoint(Point),
  #[error("输出尺寸无效: {width}x{height}")]
  DegenerateSize { width: i64, height: i64 },
  #[error("四边形存在三点共线: 最小三角形面积 {0:.2}")]
  DegenerateQuadrilateral(f64),
  #[error("输入图像为空")]
  EmptyImage,
  #[error("无法求解透视变换矩阵")]
  SingularTransform,
}

/// 表盘四边形
///
/// 点的顺序固定为 左上、右上、右下、左下，由检测器给出，
/// 这里既不重新排序也不检查凸性。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
  points: [Point; 4],
}

impl Quadrilateral {
  pub fn new(points: [Point; 4]) -> Self {
    Self { points }
  }

  pub fn points(&self) -> &[Point; 4] {
    &self.points
  }

  pub fn top_left(&self) -> Point {
    self.points[0]
  }

  pub fn top_right(&self) -> Point {
    self.points[1]
  }

  pub fn bottom_right(&self) -> Point {
    self.points[2]
  }

  pub fn bottom_left(&self) -> Point {
    self.points[3]
  }

  /// 全部坐标都是 (0, 0)，部分检测器以此表示“没有检测到”
  pub fn is_null(&self) -> bool {
    self.points.iter().all(|p| p[0] == 0.0 && p[1] == 0.0)
  }

  /// 由对边长度推算输出尺寸
  ///
  /// 宽取 (右下↔左下) 与 (右上↔左上) 中较大者，高取 (右上↔右下) 与
  /// (左上↔左下) 中较大者，每条边长先截断为整数再比较。
  pub fn edge_size(&self) -> (i64, i64) {
    let [tl, tr, br, bl] = self.points;
    let width = distance(br, bl).max(distance(tr, tl));
    let height = distance(tr, br).max(distance(tl, bl));
    (width, height)
  }

  /// 四个角点中任取三点组成的三角形的最小面积
  ///
  /// 为零说明存在三点共线，此时透视变换无解。交叉（蝴蝶形）的点序
  /// 不影响该值。
  pub fn min_corner_area(&self) -> f64 {
    let p = self.points.map(|[x, y]| (x as f64, y as f64));
    [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)]
      .iter()
      .map(|&(a, b, c)| {
        let cross = (p[b].0 - p[a].0) * (p[c].1 - p[a].1) - (p[c].0 - p[a].0) * (p[b].1 - p[a].1);
        cross.abs() / 2.0
      })
      .fold(f64::INFINITY, f64::min)
  }
}

impl From<[Point; 4]> for Quadrilateral {
  fn from(points: [Point; 4]) -> Self {
    Self::new(points)
  }
}

impl TryFrom<&[Point]> for Quadrilateral {
  type Error = RectifyError;

  fn try_from(points: &[Point]) -> Result<Self, Self::Error> {
    let points: [Point; 4] = points
      .try_into()
      .map_err(|_| RectifyError::NotEnoughPoints(points.len()))?;
    Ok(Self::new(points))
  }
}

fn distance(a: Point, b: Point) -> i64 {
  let dx = a[0] - b[0];
  let dy = a[1] - b[1];
  (dx * dx + dy * dy).sqrt() as i64
}

/// 把四边形区域透视变换为正视矩形
///
/// `target_size` 给定时直接使用该尺寸（比例不一致时会被拉伸），
/// 否则由四边形对边长度推算。重采样使用双三次插值。
pub fn four_point_transform(
  image: &RgbImage,
  quad: &Quadrilateral,
  target_size: Option<(u32, u32)>,
) -> Result<RgbImage, RectifyError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(RectifyError::EmptyImage);
  }

  if let Some(point) = quad.points().iter().find(|p| !p[0].is_finite() || !p[1].is_finite()) {
    return Err(RectifyError::NonFinitePoint(*point));
  }

  let corner_area = quad.min_corner_area();
  if corner_area < MIN_CORNER_AREA {
    return Err(RectifyError::DegenerateQuadrilateral(corner_area));
  }

  let (width, height) = match target_size {
    Some((w, h)) => (w as i64, h as i64),
    None => quad.edge_size(),
  };
  if width <= 0 || height <= 0 || width >= MAX_RECTIFIED_SIDE || height >= MAX_RECTIFIED_SIDE {
    return Err(RectifyError::DegenerateSize { width, height });
  }

  let (max_x, max_y) = ((width - 1) as f32, (height - 1) as f32);
  let dst = [(0.0, 0.0), (max_x, 0.0), (max_x, max_y), (0.0, max_y)];
  let [tl, tr, br, bl] = *quad.points();
  let src = [
    (tl[0], tl[1]),
    (tr[0], tr[1]),
    (br[0], br[1]),
    (bl[0], bl[1]),
  ];

  let projection =
    Projection::from_control_points(src, dst).ok_or(RectifyError::SingularTransform)?;

  let mut warped = RgbImage::new(width as u32, height as u32);
  warp_into(
    image,
    &projection,
    Interpolation::Bicubic,
    BORDER_PIXEL,
    &mut warped,
  );

  Ok(warped)
}

#[cfg(test)]
mod tests {
  use super::*;

  const RED: Rgb<u8> = Rgb([255, 0, 0]);
  const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

  /// 左半红、右半蓝的测试图
  fn split_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| if x < width / 2 { RED } else { BLUE })
  }

  fn full_frame_quad(width: u32, height: u32) -> Quadrilateral {
    let (w, h) = ((width - 1) as f32, (height - 1) as f32);
    Quadrilateral::new([[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]])
  }

  #[test]
  fn target_size_is_exact() {
    let image = split_image(200, 120);
    let quad = Quadrilateral::new([[0.0, 0.0], [99.0, 0.0], [99.0, 49.0], [0.0, 49.0]]);
    let warped = four_point_transform(&image, &quad, Some((100, 50))).unwrap();
    assert_eq!(warped.dimensions(), (100, 50));
  }

  #[test]
  fn target_size_ignores_quad_proportions() {
    let image = split_image(640, 480);
    let quad = Quadrilateral::new([[120.0, 80.0], [500.0, 95.0], [480.0, 300.0], [140.0, 290.0]]);
    let warped = four_point_transform(&image, &quad, Some((320, 128))).unwrap();
    assert_eq!(warped.dimensions(), (320, 128));
  }

  #[test]
  fn size_from_opposing_edges() {
    // 上边 100，下边 80；左边 50，右边 60
    let quad = Quadrilateral::new([[0.0, 0.0], [100.0, 0.0], [90.0, 60.0], [10.0, 50.0]]);
    let (width, height) = quad.edge_size();
    assert_eq!(width, 100);
    assert_eq!(height, 60);

    let image = split_image(200, 200);
    let warped = four_point_transform(&image, &quad, None).unwrap();
    assert_eq!(warped.dimensions(), (100, 60));
  }

  #[test]
  fn deterministic_output() {
    let image = RgbImage::from_fn(160, 90, |x, y| Rgb([(x % 256) as u8, (y * 2 % 256) as u8, 7]));
    let quad = Quadrilateral::new([[10.5, 12.0], [150.0, 8.25], [140.0, 80.0], [20.0, 85.0]]);
    let a = four_point_transform(&image, &quad, Some((64, 32))).unwrap();
    let b = four_point_transform(&image, &quad, Some((64, 32))).unwrap();
    assert_eq!(a.as_raw(), b.as_raw());
  }

  #[test]
  fn point_order_changes_orientation() {
    let image = split_image(100, 50);
    let quad = full_frame_quad(100, 50);
    let [tl, tr, br, bl] = *quad.points();
    let rotated = Quadrilateral::new([tr, br, bl, tl]);

    let upright = four_point_transform(&image, &quad, Some((100, 50))).unwrap();
    let turned = four_point_transform(&image, &rotated, Some((100, 50))).unwrap();

    assert_ne!(upright.as_raw(), turned.as_raw());
    // 正向时左上角来自原图左半（红），旋转后来自原图右上角（蓝）
    assert!(upright.get_pixel(10, 10)[0] > 200);
    assert!(turned.get_pixel(10, 10)[2] > 200);
  }

  #[test]
  fn identity_quad_keeps_content() {
    let image = split_image(100, 50);
    let warped = four_point_transform(&image, &full_frame_quad(100, 50), None).unwrap();
    assert_eq!(warped.dimensions(), (99, 49));
    assert!(warped.get_pixel(5, 25)[0] > 200);
    assert!(warped.get_pixel(90, 25)[2] > 200);
  }

  #[test]
  fn rejects_too_few_points() {
    let points: Vec<Point> = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
    let err = Quadrilateral::try_from(points.as_slice()).unwrap_err();
    assert_eq!(err, RectifyError::NotEnoughPoints(3));
  }

  #[test]
  fn rejects_collapsed_quad() {
    let image = split_image(100, 50);
    let quad = Quadrilateral::new([[10.0, 10.0]; 4]);
    let err = four_point_transform(&image, &quad, Some((100, 50))).unwrap_err();
    assert!(matches!(err, RectifyError::DegenerateQuadrilateral(_)));
  }

  #[test]
  fn crossed_order_still_warps() {
    let image = split_image(100, 50);
    let upright = Quadrilateral::new([[0.0, 0.0], [99.0, 0.0], [99.0, 49.0], [0.0, 49.0]]);
    let crossed = Quadrilateral::new([[0.0, 0.0], [99.0, 0.0], [0.0, 49.0], [99.0, 49.0]]);

    let a = four_point_transform(&image, &upright, Some((100, 50))).unwrap();
    let b = four_point_transform(&image, &crossed, Some((100, 50))).unwrap();
    assert_eq!(b.dimensions(), (100, 50));
    assert_ne!(a.as_raw(), b.as_raw());
  }

  #[test]
  fn rejects_three_collinear_corners() {
    let image = split_image(100, 50);
    let quad = Quadrilateral::new([[0.0, 0.0], [50.0, 0.0], [99.0, 0.0], [0.0, 49.0]]);
    let err = four_point_transform(&image, &quad, Some((100, 50))).unwrap_err();
    assert!(matches!(err, RectifyError::DegenerateQuadrilateral(_)));
  }

  #[test]
  fn rejects_oversized_output() {
    let image = split_image(100, 50);
    let quad = Quadrilateral::new([
      [-40000.0, -40000.0],
      [40000.0, -40000.0],
      [40000.0, 40000.0],
      [-40000.0, 40000.0],
    ]);
    let err = four_point_transform(&image, &quad, None).unwrap_err();
    assert_eq!(
      err,
      RectifyError::DegenerateSize {
        width: 80000,
        height: 80000
      }
    );

    let err = four_point_transform(&image, &full_frame_quad(100, 50), Some((40000, 50))).unwrap_err();
    assert!(matches!(err, RectifyError::DegenerateSize { width: 40000, .. }));
  }

  #[test]
  fn rejects_zero_target_size() {
    let image = split_image(100, 50);
    let err = four_point_transform(&image, &full_frame_quad(100, 50), Some((0, 50))).unwrap_err();
    assert_eq!(err, RectifyError::DegenerateSize { width: 0, height: 50 });
  }

  #[test]
  fn rejects_empty_image() {
    let image = RgbImage::new(0, 0);
    let err = four_point_transform(&image, &full_frame_quad(10, 10), None).unwrap_err();
    assert_eq!(err, RectifyError::EmptyImage);
  }

  #[test]
  fn rejects_nan_point() {
    let image = split_image(100, 50);
    let quad = Quadrilateral::new([[f32::NAN, 0.0], [99.0, 0.0], [99.0, 49.0], [0.0, 49.0]]);
    let err = four_point_transform(&image, &quad, None).unwrap_err();
    assert!(matches!(err, RectifyError::NonFinitePoint(_)));
  }

  #[test]
  fn null_sentinel() {
    assert!(Quadrilateral::new([[0.0, 0.0]; 4]).is_null());
    assert!(!full_frame_quad(10, 10).is_null());
  }
}
