// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/bin/history.rs - 历史检测记录管理
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

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use url::Url;

use yejian::{FromUrl, encyclopedia::Encyclopedia, history::HistoryStore};

/// Yejian 历史记录参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 历史记录目录，例如 folder:///history
  #[arg(long, value_name = "HISTORY")]
  pub history: Url,
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 列出全部记录（新记录在前）
  List,
  /// 查看一条记录的详细信息
  Show {
    /// 从 1 开始的序号
    index: usize,
    /// 病害资料 JSON 文件
    #[arg(long, value_name = "ENCYCLOPEDIA")]
    encyclopedia: Option<PathBuf>,
  },
  /// 删除全部记录及其叠加图
  Clear,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("历史记录目录: {}", args.history);
  let store = HistoryStore::from_url(&args.history)?;

  match args.command {
    Command::List => {
      let records = store.load_all();
      if records.is_empty() {
        println!("No detection history.");
      }
      for (i, record) in records.iter().enumerate() {
        println!(
          "{}. {} - {:.2}% ({}) {}",
          i + 1,
          record.disease_name,
          record.confidence,
          record.health_status,
          record.formatted_date()
        );
      }
    }
    Command::Show {
      index,
      encyclopedia,
    } => {
      let records = store.load_all();
      let Some(record) = index.checked_sub(1).and_then(|i| records.get(i)) else {
        bail!("记录序号 {} 超出范围 (共 {} 条)", index, records.len());
      };
      let info = encyclopedia
        .map(Encyclopedia::load_or_empty)
        .unwrap_or_default()
        .lookup(&record.disease_name);

      println!("{}", record.disease_name);
      println!("Confidence: {:.2}%", record.confidence);
      println!("Health: {}", record.health_status);
      println!("Date: {}", record.formatted_date());
      println!("Grad-CAM: {}", record.grad_cam_path.display());
      println!("Description:\n{}", info.description);
      println!("Symptoms:\n{}", info.symptoms);
      println!("Treatment:\n{}", info.treatment);
    }
    Command::Clear => {
      let count = store.clear_all()?;
      println!("Cleared {} record(s).", count);
    }
  }

  Ok(())
}
