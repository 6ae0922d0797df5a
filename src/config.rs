// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/config.rs - 配置文件
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

//! TOML 配置文件
//!
//! 配置在启动时读取一次，随后转换成 [`ReaderConfig`] 等显式的值
//! 交给各组件，组件本身不访问任何全局配置。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "configs/settings.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  Read(PathBuf, std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("置信度 {0} = {1} 超出 [0, 1] 范围")]
  ConfidenceOutOfRange(&'static str, f32),
  #[error("矫正尺寸必须大于零，当前为 {0}x{1}")]
  InvalidWarpSize(u32, u32),
  #[error("无效的 URL '{0}': {1}")]
  InvalidUrl(String, url::ParseError),
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
  Url::parse(value).map_err(|e| ConfigError::InvalidUrl(value.to_string(), e))
}

/// 读钟流水线的运行参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderConfig {
  /// 矫正后的图像尺寸，`None` 时由四边形边长决定
  pub target_size: Option<(u32, u32)>,
  pub pose_confidence: f32,
  pub digit_confidence: f32,
}

impl Default for ReaderConfig {
  fn default() -> Self {
    Self {
      target_size: Some((DEFAULT_WARP_WIDTH, DEFAULT_WARP_HEIGHT)),
      pose_confidence: DEFAULT_CONFIDENCE,
      digit_confidence: DEFAULT_CONFIDENCE,
    }
  }
}

const DEFAULT_CONFIDENCE: f32 = 0.5;
#[cfg(feature = "rknpu")]
const DEFAULT_POSE_MODEL: &str = "yolo-pose:///models/clock_pose.rknn";
// 没有 NPU 时假定表盘位于 640x480 画面中央
#[cfg(not(feature = "rknpu"))]
const DEFAULT_POSE_MODEL: &str = "fixed:///?points=160,120;480,120;480,248;160,248";
const DEFAULT_WARP_WIDTH: u32 = 320;
const DEFAULT_WARP_HEIGHT: u32 = 128;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub model: ModelSettings,
  pub camera: CameraSettings,
  pub processing: ProcessingSettings,
  pub app: AppSettings,
}

/// 模型设置，模型以 URL 表示，方案决定后端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
  pub pose: String,
  pub pose_conf: f32,
  pub digit: String,
  pub digit_conf: f32,
}

impl ModelSettings {
  pub fn pose_url(&self) -> Result<Url, ConfigError> {
    parse_url(&self.pose)
  }

  pub fn digit_url(&self) -> Result<Url, ConfigError> {
    parse_url(&self.digit)
  }
}

impl Default for ModelSettings {
  fn default() -> Self {
    Self {
      pose: DEFAULT_POSE_MODEL.to_string(),
      pose_conf: DEFAULT_CONFIDENCE,
      digit: "segments:///?digits=4".to_string(),
      digit_conf: DEFAULT_CONFIDENCE,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
  pub input: String,
  pub width: u32,
  pub height: u32,
}

impl CameraSettings {
  /// 输入地址；摄像头地址没有指定分辨率时补上配置中的宽高
  pub fn input_url(&self) -> Result<Url, ConfigError> {
    let mut url = parse_url(&self.input)?;
    let is_camera = match url.scheme() {
      "gst" => url.host_str() == Some("camera"),
      "v4l" => true,
      _ => false,
    };
    if is_camera {
      let has = |key: &str| url.query_pairs().any(|(k, _)| k == key);
      let (has_width, has_height) = (has("width"), has("height"));
      let mut pairs = url.query_pairs_mut();
      if !has_width {
        pairs.append_pair("width", &self.width.to_string());
      }
      if !has_height {
        pairs.append_pair("height", &self.height.to_string());
      }
    }
    Ok(url)
  }
}

impl Default for CameraSettings {
  fn default() -> Self {
    Self {
      input: "gst://camera/dev/video0".to_string(),
      width: 640,
      height: 480,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
  pub warp_width: u32,
  pub warp_height: u32,
}

impl Default for ProcessingSettings {
  fn default() -> Self {
    Self {
      warp_width: DEFAULT_WARP_WIDTH,
      warp_height: DEFAULT_WARP_HEIGHT,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
  pub debug_mode: bool,
  pub output: Option<String>,
  pub font: Option<PathBuf>,
}

impl Default for AppSettings {
  fn default() -> Self {
    Self {
      debug_mode: true,
      output: None,
      font: None,
    }
  }
}

impl Settings {
  /// 读取配置文件，文件不存在时使用默认配置
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
      return Ok(Self::default());
    }

    let content =
      std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("pose_conf", self.model.pose_conf),
      ("digit_conf", self.model.digit_conf),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ConfidenceOutOfRange(name, value));
      }
    }

    let ProcessingSettings {
      warp_width,
      warp_height,
    } = self.processing;
    if warp_width == 0 || warp_height == 0 {
      return Err(ConfigError::InvalidWarpSize(warp_width, warp_height));
    }

    Ok(())
  }

  pub fn reader_config(&self) -> ReaderConfig {
    ReaderConfig {
      target_size: Some((self.processing.warp_width, self.processing.warp_height)),
      pose_confidence: self.model.pose_conf,
      digit_confidence: self.model.digit_conf,
    }
  }
}
