// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/task.rs - 检测流程与后台任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
  time::Instant,
};

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  explain::{GradCam, Heatmap},
  history::{DetectionRecord, HealthStatus, HistoryError, HistoryStore},
  input::{InputError, encode_input},
  model::{Labels, Model, ModelError, ReplayModel, ReplayModelError, checked_infer},
  rank::{RankedPrediction, top_k},
};

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
  #[error("模型错误: {0}")]
  ModelError(#[from] ModelError),
  #[error("转储推理结果失败: {0}")]
  DumpError(#[from] ReplayModelError),
  #[error("保存原图失败: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("没有可用的预测结果")]
  EmptyPrediction,
  #[error("检测已取消")]
  Cancelled,
  #[error("后台检测线程已退出")]
  WorkerStopped,
}

/// 调用方持有的取消信号，被观察到之后不会再写入任何记录或叠加图
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  fn check(&self) -> Result<(), DetectError> {
    if self.is_cancelled() {
      warn!("检测已被取消，丢弃中间结果");
      return Err(DetectError::Cancelled);
    }
    Ok(())
  }
}

/// 检测结果是否写入历史记录
#[derive(Debug)]
pub enum Persistence {
  Saved(DetectionRecord),
  Failed(HistoryError),
  Disabled,
}

#[derive(Debug)]
pub struct Detection {
  /// 置信度从高到低
  pub predictions: Vec<RankedPrediction>,
  pub health_status: HealthStatus,
  pub heatmap: Heatmap,
  pub overlay: RgbImage,
  pub persistence: Persistence,
}

impl Detection {
  pub fn top(&self) -> &RankedPrediction {
    &self.predictions[0]
  }
}

pub struct Detector<M> {
  model: M,
  labels: Labels,
  grad_cam: GradCam,
  top_k: usize,
  dump_directory: Option<PathBuf>,
  history: Option<Arc<HistoryStore>>,
}

impl<M: Model> Detector<M> {
  pub fn new(model: M, labels: Labels) -> Result<Self, DetectError> {
    labels.check(model.shape())?;
    Ok(Self {
      model,
      labels,
      grad_cam: GradCam::default(),
      top_k: DEFAULT_TOP_K,
      dump_directory: None,
      history: None,
    })
  }

  pub fn with_top_k(mut self, top_k: usize) -> Self {
    self.top_k = top_k.max(1);
    self
  }

  pub fn with_grad_cam(mut self, grad_cam: GradCam) -> Self {
    self.grad_cam = grad_cam;
    self
  }

  /// 每次检测后把概率向量、特征图与原图写入该目录
  pub fn with_dump_directory(mut self, directory: Option<PathBuf>) -> Self {
    self.dump_directory = directory;
    self
  }

  pub fn with_history(mut self, history: Option<Arc<HistoryStore>>) -> Self {
    self.history = history;
    self
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 编码 -> 推理 -> 排序 -> 热力图 -> 记录，中间数据沿流程直接传递
  pub fn detect(&self, image: &RgbImage, cancel: &CancelToken) -> Result<Detection, DetectError> {
    let shape = self.model.shape();
    let input = encode_input(image, shape.input_height, shape.input_width)?;
    cancel.check()?;

    info!("输入编码完成，开始推理...");
    let now = Instant::now();
    let output = checked_infer(&self.model, &input)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    cancel.check()?;

    let predictions = top_k(&output.probabilities, self.top_k, &self.labels);
    let top = predictions.first().ok_or(DetectError::EmptyPrediction)?;
    let health_status = HealthStatus::from_label(&top.label);
    debug!("Top-{} 预测: {:?}", predictions.len(), predictions);

    if let Some(directory) = &self.dump_directory {
      cancel.check()?;
      ReplayModel::dump(directory, &output)?;
      let photo = directory.join(format!("leaf_{}.jpg", Utc::now().timestamp_millis()));
      image.save(&photo)?;
      debug!("推理结果已转储到 {}", directory.display());
    }

    let now = Instant::now();
    let (heatmap, overlay) = self.grad_cam.explain(image, &output.features);
    info!("热力图生成完成，耗时: {:.2?}", now.elapsed());
    cancel.check()?;

    let persistence = match &self.history {
      Some(store) => match store.append_unless(&top.label, top.confidence, &overlay, || {
        cancel.is_cancelled()
      }) {
        Ok(record) => Persistence::Saved(record),
        Err(HistoryError::Aborted) => {
          warn!("检测已被取消，丢弃中间结果");
          return Err(DetectError::Cancelled);
        }
        Err(e) => {
          error!("检测结果未能保存到历史记录: {}", e);
          Persistence::Failed(e)
        }
      },
      None => Persistence::Disabled,
    };

    Ok(Detection {
      predictions,
      health_status,
      heatmap,
      overlay,
      persistence,
    })
  }
}

struct Job {
  image: RgbImage,
  cancel: CancelToken,
  reply: mpsc::Sender<Result<Detection, DetectError>>,
}

/// 单个后台线程依次处理检测请求，调用线程不会被推理阻塞
pub struct DetectionWorker {
  sender: Option<mpsc::Sender<Job>>,
  thread: Option<thread::JoinHandle<()>>,
}

impl DetectionWorker {
  pub fn spawn<M: Model + Send + 'static>(detector: Detector<M>) -> Self {
    let (sender, receiver) = mpsc::channel::<Job>();
    let thread = thread::spawn(move || {
      info!("后台检测线程启动");
      for job in receiver {
        let result = job
          .cancel
          .check()
          .and_then(|_| detector.detect(&job.image, &job.cancel));
        if job.reply.send(result).is_err() {
          debug!("调用方已放弃等待检测结果");
        }
      }
      info!("后台检测线程退出");
    });

    Self {
      sender: Some(sender),
      thread: Some(thread),
    }
  }

  pub fn submit(&self, image: RgbImage) -> DetectionHandle {
    let cancel = CancelToken::default();
    self.submit_with_cancel(image, cancel)
  }

  pub fn submit_with_cancel(&self, image: RgbImage, cancel: CancelToken) -> DetectionHandle {
    let (reply, receiver) = mpsc::channel();
    let job = Job {
      image,
      cancel: cancel.clone(),
      reply,
    };
    if let Some(sender) = &self.sender
      && sender.send(job).is_err()
    {
      error!("后台检测线程不可用");
    }
    DetectionHandle { cancel, receiver }
  }
}

impl Drop for DetectionWorker {
  fn drop(&mut self) {
    drop(self.sender.take());
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      error!("后台检测线程异常退出");
    }
  }
}

pub struct DetectionHandle {
  cancel: CancelToken,
  receiver: mpsc::Receiver<Result<Detection, DetectError>>,
}

impl DetectionHandle {
  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// 阻塞等待结果
  pub fn wait(self) -> Result<Detection, DetectError> {
    self
      .receiver
      .recv()
      .map_err(|_| DetectError::WorkerStopped)?
  }
}
