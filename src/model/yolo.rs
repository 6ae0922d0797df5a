// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/model/yolo.rs - RKNPU 上的 YOLO 姿态/检测模型
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

use std::collections::HashMap;

use image::RgbImage;
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  url_path,
  geometry::Point,
  model::{DetectItem, DetectResult, Digit, Model, PoseCandidate, PoseResult, WithLabel},
};

const YOLO_NUM_INPUTS: u32 = 1;
const YOLO_NUM_OUTPUTS: u32 = 1;
const YOLO_INPUT_W: u32 = 640;
const YOLO_INPUT_H: u32 = 640;
/// 低于该分数的候选在解码阶段直接丢弃，真正的置信度阈值由适配层决定
const YOLO_SCORE_FLOOR: f32 = 0.05;
const YOLO_DEFAULT_KEYPOINTS: usize = 4;
const YOLO_DEFAULT_CLASSES: usize = 10;
const YOLO_DEFAULT_NMS: f32 = 0.45;

type YoloFrame = RgbNhwcFrame<YOLO_INPUT_W, YOLO_INPUT_H>;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输出张量长度 {len} 无法按 {channels} 通道解析")]
  OutputShape { len: usize, channels: usize },
}

impl From<std::io::Error> for YoloError {
  fn from(err: std::io::Error) -> Self {
    YoloError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for YoloError {
  fn from(err: rknpu::Error) -> Self {
    YoloError::RknnError(err)
  }
}

impl YoloError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    YoloError::ModelInvalid(msg.to_string(), e)
  }
}

fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

fn load_context(model_path: &str, flags: InitFlags) -> Result<Context, YoloError> {
  info!("加载模型文件: {}", model_path);
  let model_data = std::fs::read(model_path)?;
  debug!(
    "模型文件大小: {:.2} MB",
    model_data.len() as f64 / (1024.0 * 1024.0)
  );

  info!("创建 RKNN 推理上下文");
  let context = Context::new(&model_data, flags)?;

  let num_inputs = context
    .num_inputs()
    .map_err(|e| YoloError::invalid("无法获取输入数量", e))?;
  let num_outputs = context
    .num_outputs()
    .map_err(|e| YoloError::invalid("无法获取输出数量", e))?;

  if num_inputs != YOLO_NUM_INPUTS || num_outputs != YOLO_NUM_OUTPUTS {
    let msg = format!(
      "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
      YOLO_NUM_INPUTS, YOLO_NUM_OUTPUTS, num_inputs, num_outputs
    );
    error!("{}", msg);
    return Err(YoloError::invalid(&msg, rknpu::Error::InvalidModel));
  }

  info!("模型加载完成");
  Ok(context)
}

/// 缩放到模型输入尺寸，执行推理并取出唯一的输出张量
fn run_context(context: &Context, image: &RgbImage) -> Result<(Vec<f32>, [f32; 2]), YoloError> {
  let (frame, scale) = YoloFrame::resize_from(image);

  debug!("设置模型输入");
  context.set_input(0, frame.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

  debug!("执行模型推理");
  context.run()?;

  debug!("获取模型输出");
  let output = context.get_outputs()?;
  let data = output.get_f32(0)?.to_vec();
  Ok((data, scale))
}

/// 输出张量按 [通道, 锚点] 排列，返回锚点数量
fn anchors(data: &[f32], channels: usize) -> Result<usize, YoloError> {
  if channels == 0 || data.len() % channels != 0 {
    return Err(YoloError::OutputShape {
      len: data.len(),
      channels,
    });
  }
  Ok(data.len() / channels)
}

fn scaled_bbox(data: &[f32], anchor: usize, num: usize, scale: [f32; 2]) -> [f32; 4] {
  let cx = data[anchor];
  let cy = data[num + anchor];
  let w = data[2 * num + anchor];
  let h = data[3 * num + anchor];
  [
    (cx - w / 2.0) * scale[0],
    (cy - h / 2.0) * scale[1],
    (cx + w / 2.0) * scale[0],
    (cy + h / 2.0) * scale[1],
  ]
}

/// 解码单类别姿态头：4 (框) + 1 (分数) + K * 3 (x, y, 可见度)
pub(crate) fn decode_pose(
  data: &[f32],
  num_keypoints: usize,
  scale: [f32; 2],
) -> Result<PoseResult, YoloError> {
  let channels = 5 + num_keypoints * 3;
  let num = anchors(data, channels)?;

  let mut candidates = Vec::new();
  for anchor in 0..num {
    let score = data[4 * num + anchor];
    if score <= YOLO_SCORE_FLOOR {
      continue;
    }

    let keypoints: Vec<Point> = (0..num_keypoints)
      .map(|k| {
        let base = 5 + k * 3;
        [
          data[base * num + anchor] * scale[0],
          data[(base + 1) * num + anchor] * scale[1],
        ]
      })
      .collect();

    candidates.push(PoseCandidate {
      score,
      bbox: scaled_bbox(data, anchor, num, scale),
      keypoints: Some(keypoints.into_boxed_slice()),
    });
  }

  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  debug!("姿态候选数量: {}", candidates.len());
  Ok(candidates.into())
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 解码检测头：4 (框) + C (类别分数)，并按类别做非极大值抑制
pub(crate) fn decode_detect<T: WithLabel>(
  data: &[f32],
  num_classes: usize,
  nms_threshold: f32,
  scale: [f32; 2],
) -> Result<DetectResult<T>, YoloError> {
  let channels = 4 + num_classes;
  let num = anchors(data, channels)?;

  let mut raw: Vec<(u32, f32, [f32; 4])> = Vec::new();
  for anchor in 0..num {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c as u32, data[(4 + c) * num + anchor]))
      .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    if score <= YOLO_SCORE_FLOOR {
      continue;
    }
    raw.push((class_id, score, scaled_bbox(data, anchor, num, scale)));
  }

  raw.sort_by(|a, b| b.1.total_cmp(&a.1));
  let mut kept: Vec<(u32, f32, [f32; 4])> = Vec::new();
  for candidate in raw {
    let suppressed = kept
      .iter()
      .any(|k| k.0 == candidate.0 && iou(&k.2, &candidate.2) > nms_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }

  debug!("检测到 {} 个目标", kept.len());
  let items = kept
    .into_iter()
    .map(|(class_id, score, bbox)| DetectItem {
      kind: T::from_label_id(class_id),
      score,
      bbox,
    })
    .collect::<Vec<_>>();
  Ok(items.into())
}

/// 表盘四角姿态模型
pub struct YoloPose {
  context: Context,
  num_keypoints: usize,
}

pub struct YoloPoseBuilder {
  model_path: String,
  num_keypoints: usize,
  flags: InitFlags,
}

impl FromUrlWithScheme for YoloPoseBuilder {
  const SCHEME: &'static str = "yolo-pose";
}

impl FromUrl for YoloPoseBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query = query_map(url);
    let num_keypoints = match query.get("keypoints") {
      Some(v) => v
        .parse::<usize>()
        .map_err(|_| YoloError::ModelPathError(format!("keypoints 参数无效: {}", v)))?,
      None => YOLO_DEFAULT_KEYPOINTS,
    };

    Ok(YoloPoseBuilder {
      model_path: url_path(url).into_owned(),
      num_keypoints,
      flags: InitFlags::default(),
    })
  }
}

impl YoloPoseBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<YoloPose, YoloError> {
    let context = load_context(&self.model_path, self.flags)?;
    debug!("姿态模型关键点数量: {}", self.num_keypoints);
    Ok(YoloPose {
      context,
      num_keypoints: self.num_keypoints,
    })
  }
}

impl Model for YoloPose {
  type Input = RgbImage;
  type Output = PoseResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (data, scale) = run_context(&self.context, input)?;
    decode_pose(&data, self.num_keypoints, scale)
  }
}

/// 数字检测模型
pub struct YoloDetect {
  context: Context,
  num_classes: usize,
  nms_threshold: f32,
}

pub struct YoloDetectBuilder {
  model_path: String,
  num_classes: usize,
  nms_threshold: f32,
  flags: InitFlags,
}

impl FromUrlWithScheme for YoloDetectBuilder {
  const SCHEME: &'static str = "yolo-detect";
}

impl FromUrl for YoloDetectBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query = query_map(url);
    let num_classes = match query.get("classes") {
      Some(v) => v
        .parse::<usize>()
        .map_err(|_| YoloError::ModelPathError(format!("classes 参数无效: {}", v)))?,
      None => YOLO_DEFAULT_CLASSES,
    };
    let nms_threshold = match query.get("nms") {
      Some(v) => v
        .parse::<f32>()
        .map_err(|_| YoloError::ModelPathError(format!("nms 参数无效: {}", v)))?,
      None => YOLO_DEFAULT_NMS,
    };

    Ok(YoloDetectBuilder {
      model_path: url_path(url).into_owned(),
      num_classes,
      nms_threshold,
      flags: InitFlags::default(),
    })
  }
}

impl YoloDetectBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<YoloDetect, YoloError> {
    let context = load_context(&self.model_path, self.flags)?;
    Ok(YoloDetect {
      context,
      num_classes: self.num_classes,
      nms_threshold: self.nms_threshold,
    })
  }
}

impl Model for YoloDetect {
  type Input = RgbImage;
  type Output = DetectResult<Digit>;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (data, scale) = run_context(&self.context, input)?;
    decode_detect(&data, self.num_classes, self.nms_threshold, scale)
  }
}
