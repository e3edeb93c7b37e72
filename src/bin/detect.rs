// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/bin/detect.rs - 单张叶片照片检测
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use yejian::{
  FromUrl, FromUrlWithScheme,
  encyclopedia::Encyclopedia,
  explain::{DEFAULT_OVERLAY_OPACITY, GradCam},
  feature::ShortReadPolicy,
  history::HistoryStore,
  input::ImageFileInput,
  model::{Labels, ModelWrapper, ReplayModel},
  output::{Render, ReportOutput, SaveImageFileOutput},
  task::{CancelToken, DEFAULT_TOP_K, DetectionWorker, Detector},
};

/// Yejian 叶片病害检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///model.onnx 或 replay:///dump
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 叶片照片，例如 image:///leaf.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 类别标签文件，每行一个
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 历史记录目录，例如 folder:///history
  #[arg(long, value_name = "HISTORY")]
  pub history: Option<Url>,
  /// 叠加图另存路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 病害资料 JSON 文件
  #[arg(long, value_name = "ENCYCLOPEDIA")]
  pub encyclopedia: Option<PathBuf>,
  #[arg(long, default_value_t = DEFAULT_TOP_K)]
  pub top_k: usize,
  /// 热力图叠加透明度 (0 ~ 1)
  #[arg(long, default_value_t = DEFAULT_OVERLAY_OPACITY)]
  pub opacity: f32,
  /// 转储概率向量、特征图与原图的目录
  #[arg(long, value_name = "DIR")]
  pub dump: Option<PathBuf>,
  /// 回放模型特征图长度不足时的处理方式 (strict | zero-fill)
  #[arg(long, value_name = "POLICY")]
  pub short_read: Option<ShortReadPolicy>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("标签文件: {}", args.labels.display());

  let mut model_url = args.model.clone();
  if let Some(policy) = &args.short_read {
    if model_url.scheme() == ReplayModel::SCHEME {
      model_url
        .query_pairs_mut()
        .append_pair("short_read", policy.as_str());
    } else {
      warn!("--short-read 仅对回放模型生效，已忽略");
    }
  }

  let input = ImageFileInput::from_url(&args.input)?;
  let model = ModelWrapper::from_url(&model_url)?;
  let labels = Labels::from_file(&args.labels)?;
  let history = args
    .history
    .as_ref()
    .map(HistoryStore::from_url)
    .transpose()?
    .map(Arc::new);
  let output = args
    .output
    .as_ref()
    .map(SaveImageFileOutput::from_url)
    .transpose()?;
  let encyclopedia = args
    .encyclopedia
    .as_ref()
    .map(Encyclopedia::load_or_empty)
    .unwrap_or_default();

  let detector = Detector::new(model, labels)?
    .with_top_k(args.top_k)
    .with_grad_cam(GradCam::default().with_opacity(args.opacity))
    .with_dump_directory(args.dump)
    .with_history(history);
  let worker = DetectionWorker::spawn(detector);

  let cancel = CancelToken::default();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，取消检测...");
      cancel.cancel();
    })?;
  }

  let image = input.into_image();
  let detection = worker.submit_with_cancel(image.clone(), cancel).wait()?;

  if let Some(output) = &output {
    output.render_result(&image, &detection)?;
  }
  ReportOutput::new(encyclopedia).render_result(&image, &detection)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
    let base = [
      "yejian-detect",
      "--model",
      "replay:///dump",
      "--input",
      "image:///leaf.jpg",
      "--labels",
      "labels.txt",
    ];
    Args::try_parse_from(base.iter().chain(extra))
  }

  #[test]
  fn short_read_parses_into_policy() {
    let args = parse(&["--short-read", "zero-fill"]).unwrap();
    assert_eq!(args.short_read, Some(ShortReadPolicy::ZeroFill));
    assert_eq!(parse(&[]).unwrap().short_read, None);
    assert!(parse(&["--short-read", "lenient"]).is_err());
  }

  #[test]
  fn defaults_match_library_constants() {
    let args = parse(&[]).unwrap();
    assert_eq!(args.top_k, DEFAULT_TOP_K);
    assert_eq!(args.opacity, DEFAULT_OVERLAY_OPACITY);
  }
}
