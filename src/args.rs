// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use kanzhong::config::{DEFAULT_CONFIG_PATH, Settings};

/// Kanzhong 七段数码钟读数程序
///
/// 命令行参数优先于配置文件中的同名设置。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
  pub config: PathBuf,

  /// 输入来源，例如 gst://camera/dev/video0、folder:///data/frames、image:///clock.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,

  /// 输出去向，例如 display://、folder:///tmp/kanzhong?always、image:///out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 表盘关键点模型，例如 yolo-pose:///models/clock_pose.rknn
  #[arg(long, value_name = "MODEL")]
  pub pose_model: Option<Url>,

  /// 数字识别模型，例如 segments:///?digits=4
  #[arg(long, value_name = "MODEL")]
  pub digit_model: Option<Url>,

  /// 绘制识别结果所用的 TrueType 字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 最多处理的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 输出调试日志
  #[arg(long)]
  pub debug: bool,

  /// 只处理一帧
  #[arg(long)]
  pub oneshot: bool,
}

impl Args {
  pub fn apply(&self, settings: &mut Settings) {
    if let Some(input) = &self.input {
      settings.camera.input = input.to_string();
    }
    if let Some(output) = &self.output {
      settings.app.output = Some(output.to_string());
    }
    if let Some(pose) = &self.pose_model {
      settings.model.pose = pose.to_string();
    }
    if let Some(digit) = &self.digit_model {
      settings.model.digit = digit.to_string();
    }
    if let Some(font) = &self.font {
      settings.app.font = Some(font.clone());
    }
    if self.debug {
      settings.app.debug_mode = true;
    }
  }
}
