// 该文件是 Kanzhong （看钟） 项目的一部分。
// tests/clock_reader.rs - 读钟流水线端到端测试
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

use std::convert::Infallible;

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use url::Url;

use kanzhong::{
  FromUrl,
  config::ReaderConfig,
  geometry::{Quadrilateral, four_point_transform},
  model::{
    DetectItem, DetectResult, Digit, DigitModelWrapper, FixedKeypoints, KeypointModelWrapper,
    Model, PoseCandidate, PoseResult,
  },
  reader::{ClockReader, PLACEHOLDER_TEXT},
};

const FACE_OFFSET: (u32, u32) = (40, 30);
const FACE_SIZE: (u32, u32) = (320, 128);

const LCD_BACKGROUND: Rgb<u8> = Rgb([225, 230, 220]);
const LCD_SEGMENT: Rgb<u8> = Rgb([25, 25, 35]);

// (x0, y0, x1, y1)，相对每个数字格归一化，顺序 a b c d e f g
const SEGMENTS: [[f32; 4]; 7] = [
  [0.2, 0.0, 0.8, 0.15],
  [0.8, 0.1, 1.0, 0.45],
  [0.8, 0.55, 1.0, 0.9],
  [0.2, 0.85, 0.8, 1.0],
  [0.0, 0.55, 0.2, 0.9],
  [0.0, 0.1, 0.2, 0.45],
  [0.2, 0.425, 0.8, 0.575],
];

fn lit_segments(digit: char) -> &'static [usize] {
  match digit {
    '0' => &[0, 1, 2, 3, 4, 5],
    '1' => &[1, 2],
    '2' => &[0, 1, 6, 4, 3],
    '3' => &[0, 1, 6, 2, 3],
    '4' => &[5, 6, 1, 2],
    '5' => &[0, 5, 6, 2, 3],
    '6' => &[0, 5, 6, 4, 3, 2],
    '7' => &[0, 1, 2],
    '8' => &[0, 1, 2, 3, 4, 5, 6],
    _ => &[0, 1, 2, 3, 5, 6],
  }
}

/// 在白底画布上画出一块四位 LCD 数码钟，表盘位于 FACE_OFFSET
fn clock_frame(text: &str) -> RgbImage {
  let mut frame = RgbImage::from_pixel(400, 200, Rgb([90, 90, 90]));
  let (ox, oy) = FACE_OFFSET;
  let (fw, fh) = FACE_SIZE;
  draw_filled_rect_mut(&mut frame, Rect::at(ox as i32, oy as i32).of_size(fw, fh), LCD_BACKGROUND);

  let cell_w = fw as f32 / text.len() as f32;
  for (index, digit) in text.chars().enumerate() {
    let x0 = ox as f32 + cell_w * index as f32 + cell_w * 0.1;
    let x1 = ox as f32 + cell_w * (index + 1) as f32 - cell_w * 0.1;
    let y0 = oy as f32 + fh as f32 * 0.08;
    let y1 = oy as f32 + fh as f32 * 0.92;
    for segment in lit_segments(digit) {
      let [sx0, sy0, sx1, sy1] = SEGMENTS[*segment];
      let left = (x0 + sx0 * (x1 - x0)).round() as i32;
      let top = (y0 + sy0 * (y1 - y0)).round() as i32;
      let right = (x0 + sx1 * (x1 - x0)).round() as i32;
      let bottom = (y0 + sy1 * (y1 - y0)).round() as i32;
      draw_filled_rect_mut(
        &mut frame,
        Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32),
        LCD_SEGMENT,
      );
    }
  }
  frame
}

fn face_url() -> Url {
  let (ox, oy) = FACE_OFFSET;
  let (x1, y1) = (ox + FACE_SIZE.0 - 1, oy + FACE_SIZE.1 - 1);
  Url::parse(&format!(
    "fixed:///?points={ox},{oy};{x1},{oy};{x1},{y1};{ox},{y1}"
  ))
  .unwrap()
}

fn reader_config() -> ReaderConfig {
  ReaderConfig {
    target_size: Some(FACE_SIZE),
    ..ReaderConfig::default()
  }
}

struct ScriptedDigits(Vec<(f32, u32)>);

impl Model for ScriptedDigits {
  type Input = RgbImage;
  type Output = DetectResult<Digit>;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(
      self
        .0
        .iter()
        .map(|(x_min, label)| DetectItem {
          kind: Digit(*label),
          score: 0.95,
          bbox: [*x_min, 5.0, *x_min + 15.0, 40.0],
        })
        .collect::<Vec<_>>()
        .into(),
    )
  }
}

struct NullPose;

impl Model for NullPose {
  type Input = RgbImage;
  type Output = PoseResult;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(
      vec![PoseCandidate {
        score: 0.99,
        bbox: [0.0, 0.0, 0.0, 0.0],
        keypoints: Some(vec![[0.0, 0.0]; 4].into_boxed_slice()),
      }]
      .into(),
    )
  }
}

#[test]
fn rectifier_honours_target_size() {
  let quad = Quadrilateral::new([[0.0, 0.0], [99.0, 0.0], [99.0, 49.0], [0.0, 49.0]]);
  let rectified = four_point_transform(&clock_frame("1234"), &quad, Some((100, 50))).unwrap();
  assert_eq!(rectified.dimensions(), (100, 50));
}

#[test]
fn digits_are_joined_left_to_right() {
  let reader = ClockReader::new(
    &reader_config(),
    FixedKeypoints::from_url(&face_url()).unwrap(),
    ScriptedDigits(vec![(50.0, 3), (10.0, 1), (30.0, 2)]),
  );
  let result = reader.process_frame(&clock_frame("8888"));
  assert_eq!(result.time_text, "123");
  assert_eq!(result.rectified.unwrap().dimensions(), FACE_SIZE);
}

#[test]
fn null_detection_yields_placeholder() {
  let reader = ClockReader::new(
    &reader_config(),
    NullPose,
    ScriptedDigits(vec![(10.0, 1)]),
  );
  let frame = clock_frame("1234");
  let result = reader.process_frame(&frame);
  assert!(result.rectified.is_none());
  assert_eq!(result.time_text, PLACEHOLDER_TEXT);
  assert_eq!(result.visualization, frame);
}

#[test]
fn reads_rendered_clock_with_url_backends() {
  let pose = KeypointModelWrapper::from_url(&face_url()).unwrap();
  let digit = DigitModelWrapper::from_url(&Url::parse("segments:///?digits=4").unwrap()).unwrap();
  let reader = ClockReader::new(&reader_config(), pose, digit);

  let result = reader.process_frame(&clock_frame("1234"));
  assert_eq!(result.time_text, "1234");
  assert!(result.has_time());

  let result = reader.process_frame(&clock_frame("0759"));
  assert_eq!(result.time_text, "0759");
}

#[cfg(feature = "directory_record")]
mod recording {
  use std::{path::Path, sync::mpsc};

  use image::{Rgb, RgbImage};
  use url::Url;

  use kanzhong::{
    FromUrl,
    input::InputWrapper,
    model::{DigitModelWrapper, KeypointModelWrapper},
    output::{DirectoryRecordOutput, Render},
    reader::{ClockReader, PLACEHOLDER_TEXT},
    task::{ContinuousTask, Task},
  };

  use super::{NullPose, ScriptedDigits, clock_frame, face_url, reader_config};

  fn json_records(dir: &Path) -> Vec<serde_json::Value> {
    let mut records = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else if path.extension().is_some_and(|e| e == "json") {
          records.push(serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap());
        }
      }
    }
    records
  }

  #[test]
  fn folder_to_folder_run() {
    let frames = tempfile::tempdir().unwrap();
    let records = tempfile::tempdir().unwrap();
    clock_frame("1234").save(frames.path().join("000.png")).unwrap();
    clock_frame("2359").save(frames.path().join("001.png")).unwrap();
    RgbImage::from_pixel(400, 200, Rgb([90, 90, 90]))
      .save(frames.path().join("002.png"))
      .unwrap();

    let input =
      InputWrapper::from_url(&Url::parse(&format!("folder://{}", frames.path().display())).unwrap())
        .unwrap();
    let output = DirectoryRecordOutput::from_url(
      &Url::parse(&format!("folder://{}?always&record", records.path().display())).unwrap(),
    )
    .unwrap();
    let reader = ClockReader::new(
      &reader_config(),
      KeypointModelWrapper::from_url(&face_url()).unwrap(),
      DigitModelWrapper::from_url(&Url::parse("segments:///?digits=4").unwrap()).unwrap(),
    );

    let (_stop, stop_signal) = mpsc::channel();
    ContinuousTask::default()
      .with_stop_signal(stop_signal)
      .run_task(input, reader, output)
      .unwrap();

    let mut texts: Vec<String> = json_records(records.path())
      .iter()
      .map(|r| r["time_text"].as_str().unwrap().to_string())
      .collect();
    texts.sort();
    assert_eq!(texts, vec![PLACEHOLDER_TEXT, "1234", "2359"]);
  }

  #[test]
  fn missing_output_is_a_noop() {
    let output: Option<DirectoryRecordOutput> = None;
    let reader = ClockReader::new(&reader_config(), NullPose, ScriptedDigits(vec![]));
    let frame = clock_frame("1234");
    let result = reader.process_frame(&frame);
    assert!(output.render_result(&frame, &result).is_ok());
  }
}
