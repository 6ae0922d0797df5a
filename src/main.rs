// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use kanzhong::{
  FromUrl,
  config::Settings,
  input::InputWrapper,
  model::{DigitModelWrapper, KeypointModelWrapper},
  output::{OutputWrapper, draw::Draw},
  reader::ClockReader,
  task::{ContinuousTask, OneShotTask, Task},
};

fn init_tracing(debug_mode: bool) {
  let level = if debug_mode { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
  let args = args::Args::parse();

  let config_found = args.config.exists();
  let mut settings = Settings::load(&args.config)?;
  args.apply(&mut settings);
  settings.validate()?;

  init_tracing(settings.app.debug_mode);
  if !config_found {
    warn!("未找到配置文件 {}，使用默认配置", args.config.display());
  }

  info!("关键点模型: {}", settings.model.pose);
  info!("数字模型: {}", settings.model.digit);
  info!("输入来源: {}", settings.camera.input);
  info!(
    "矫正尺寸: {}x{}",
    settings.processing.warp_width, settings.processing.warp_height
  );

  // 两个模型都在启动时加载，任何一个失败都直接退出
  let pose = KeypointModelWrapper::from_url(&settings.model.pose_url()?)?;
  let digit = DigitModelWrapper::from_url(&settings.model.digit_url()?)?;

  let draw = match &settings.app.font {
    Some(font) => Draw::from_font_file(font)?,
    None => {
      warn!("未配置字体，结果图上不绘制文字");
      Draw::default()
    }
  };
  let reader = ClockReader::new(&settings.reader_config(), pose, digit).with_draw(draw);

  let input = InputWrapper::from_url(&settings.camera.input_url()?)?;
  let output = match &settings.app.output {
    Some(output) => {
      info!("输出路径: {}", output);
      Some(OutputWrapper::from_url(&Url::parse(output)?)?)
    }
    None => None,
  };

  if args.oneshot {
    OneShotTask.run_task(input, reader, output)?;
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .run_task(input, reader, output)?;
  }

  Ok(())
}
