// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  url_path,
  geometry::Point,
  output::Render,
  reader::FrameResult,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每帧写入的识别记录
#[derive(Debug, Serialize)]
pub struct FrameRecord<'a> {
  pub timestamp: String,
  pub time_text: &'a str,
  pub has_time: bool,
  pub keypoints: Option<[Point; 4]>,
}

impl<'a> FrameRecord<'a> {
  fn new(result: &'a FrameResult, now: &DateTime<Local>) -> Self {
    Self {
      timestamp: now.to_rfc3339(),
      time_text: &result.time_text,
      has_time: result.has_time(),
      keypoints: result.keypoints.map(|quad| *quad.points()),
    }
  }
}

/// 按日期分目录保存每一帧
///
/// - 默认只保存成功矫正的帧，`always` 时每帧都保存
/// - 默认保存带标注的可视化图，`record` 时保存原始帧并在同名 `.json` 中写入识别记录
/// - 成功矫正时同时保存 `<名称>_warped.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  always: bool,
  record: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let record = uri.query_pairs().any(|(k, _)| k == "record");

    Ok(
      DirectoryRecordOutput::new(url_path(uri).into_owned())
        .with_always(always)
        .with_record(record),
    )
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: Mutex::new(0),
      always: false,
      record: false,
    }
  }

  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self, now: &DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save_record(
    &self,
    path: &Path,
    result: &FrameResult,
    now: &DateTime<Local>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let record = FrameRecord::new(result, now);
    let file = std::fs::File::create(path.with_extension("json"))?;
    serde_json::to_writer_pretty(file, &record)?;
    Ok(())
  }
}

fn warped_path(path: &Path) -> PathBuf {
  let stem = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  path.with_file_name(format!("{}_warped.png", stem))
}

impl Render<RgbImage, FrameResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &FrameResult) -> Result<(), Self::Error> {
    if !self.always && result.rectified.is_none() {
      return Ok(());
    }

    let now = Local::now();
    let path = self.frame_path(&now)?;

    if self.record {
      frame.save(&path)?;
      self.save_record(&path, result, &now)?;
    } else {
      result.visualization.save(&path)?;
    }

    if let Some(rectified) = &result.rectified {
      rectified.save(warped_path(&path))?;
    }

    debug!("记录帧到 {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{geometry::Quadrilateral, reader::PLACEHOLDER_TEXT};

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  fn detected() -> FrameResult {
    FrameResult {
      visualization: RgbImage::new(8, 6),
      rectified: Some(RgbImage::new(4, 2)),
      time_text: "1234".to_string(),
      keypoints: Some(Quadrilateral::new([
        [0.0, 0.0],
        [7.0, 0.0],
        [7.0, 5.0],
        [0.0, 5.0],
      ])),
    }
  }

  fn missed() -> FrameResult {
    FrameResult {
      visualization: RgbImage::new(8, 6),
      rectified: None,
      time_text: PLACEHOLDER_TEXT.to_string(),
      keypoints: None,
    }
  }

  #[test]
  fn skips_frames_without_clock_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path());
    output.render_result(&RgbImage::new(8, 6), &missed()).unwrap();
    assert!(files_under(dir.path()).is_empty());

    output.render_result(&RgbImage::new(8, 6), &detected()).unwrap();
    let files = files_under(dir.path());
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.to_string_lossy().ends_with("_warped.png")));
  }

  #[test]
  fn always_and_record_write_json() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always&record", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    output.render_result(&RgbImage::new(8, 6), &missed()).unwrap();
    output.render_result(&RgbImage::new(8, 6), &detected()).unwrap();

    let records: Vec<serde_json::Value> = files_under(dir.path())
      .into_iter()
      .filter(|f| f.extension().is_some_and(|e| e == "json"))
      .map(|f| serde_json::from_str(&std::fs::read_to_string(f).unwrap()).unwrap())
      .collect();
    assert_eq!(records.len(), 2);
    assert!(
      records
        .iter()
        .any(|r| r["time_text"] == "1234" && r["has_time"] == true)
    );
    assert!(
      records
        .iter()
        .any(|r| r["time_text"] == PLACEHOLDER_TEXT && r["keypoints"].is_null())
    );
  }
}
