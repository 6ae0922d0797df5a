// 该文件是 Kanzhong （看钟） 项目的一部分。
// src/task.rs - 采集、处理、输出的运行循环
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{model::Model, output::Render, reader::FrameResult};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 从单帧结果中取出读数
pub trait Reading {
  fn reading(&self) -> Option<&str>;
}

impl Reading for FrameResult {
  fn reading(&self) -> Option<&str> {
    self.has_time().then_some(self.time_text.as_str())
  }
}

/// 只处理一帧
pub struct OneShotTask;

impl<
  F,
  D: Reading,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始处理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("处理完成，耗时: {:.2?}", now.elapsed());
    match result.reading() {
      Some(text) => info!("检测到时间: {}", text),
      None => info!("未读到时间"),
    }
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 逐帧处理，直到流结束、达到指定帧数或收到中断信号
///
/// 中断信号只在两帧之间检查，正在处理的帧总会完整结束。
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop_signal: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|n| *n > 0);
    self
  }

  /// 使用外部的停止信号，而不是安装 Ctrl-C 处理函数
  pub fn with_stop_signal(mut self, stop_signal: Receiver<()>) -> Self {
    self.stop_signal = Some(stop_signal);
    self
  }

  fn install_ctrlc() -> Result<Receiver<()>, ctrlc::Error> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(rx)
  }
}

impl<
  F,
  D: Reading,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop_signal = match self.stop_signal {
      Some(rx) => rx,
      None => Self::install_ctrlc()?,
    };

    let mut frame_index: usize = 0;
    let mut readings: usize = 0;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      debug!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      if let Some(text) = result.reading() {
        readings += 1;
        info!("检测到时间: {}", text);
      }
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      debug!("处理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if stop_signal.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!(
      "任务完成，共处理 {} 帧，其中 {} 帧读到时间",
      frame_index, readings
    );
    Ok(())
  }
}
