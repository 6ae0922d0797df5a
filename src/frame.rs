// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/frame.rs - 模型输入帧定义
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

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;

/// 固定尺寸的 NHWC 排布 RGB 帧，作为推理模型的输入张量
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0u8; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 把任意尺寸的图像拉伸到 W×H
  ///
  /// 同时返回把帧内坐标换算回原图坐标的缩放系数 `[sx, sy]`。
  pub fn resize_from(image: &RgbImage) -> (Self, [f32; 2]) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return (Self::default(), [0.0, 0.0]);
    }

    let scale = [width as f32 / W as f32, height as f32 / H as f32];
    let data = if (width, height) == (W, H) {
      image.as_raw().clone()
    } else {
      image::imageops::resize(image, W, H, FilterType::Triangle).into_raw()
    };

    (
      Self {
        data: data.into_boxed_slice(),
      },
      scale,
    )
  }
}

impl<const W: u32, const H: u32> AsMut<[u8]> for RgbNhwcFrame<W, H> {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsRef<[u8]> for RgbNhwcFrame<W, H> {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}
