// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/output/report.rs - 文本检测报告
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

use std::{fmt::Write as _, io::Write};

use image::RgbImage;

use crate::{
  encyclopedia::{Encyclopedia, preventive_tips},
  output::Render,
  task::{Detection, Persistence},
};

pub fn format_report(detection: &Detection, encyclopedia: &Encyclopedia) -> String {
  let mut report = String::new();
  for (i, prediction) in detection.predictions.iter().enumerate() {
    let _ = writeln!(
      report,
      "{}. {} ({:.2}% confidence)",
      i + 1,
      prediction.label,
      prediction.confidence * 100.0
    );
  }

  let top = detection.top();
  let percent = top.confidence * 100.0;
  let info = encyclopedia.lookup(&top.label);
  let _ = writeln!(report, "Top Prediction Confidence: {:.2}%", percent);
  let _ = writeln!(
    report,
    "Leaf Health: {:.0}% ({})",
    percent, detection.health_status
  );
  let _ = writeln!(report, "Description: {}", info.description);
  let _ = writeln!(report, "Symptoms: {}", info.symptoms);
  let _ = writeln!(report, "Treatment: {}", info.treatment);
  let _ = writeln!(report, "Preventive Tips:\n{}", preventive_tips(&top.label));

  match &detection.persistence {
    Persistence::Saved(record) => {
      let _ = writeln!(report, "Saved to history: {}", record.grad_cam_path.display());
    }
    Persistence::Failed(e) => {
      let _ = writeln!(report, "History not saved: {}", e);
    }
    Persistence::Disabled => {}
  }
  report
}

/// 把检测报告写到标准输出
pub struct ReportOutput {
  encyclopedia: Encyclopedia,
}

impl ReportOutput {
  pub fn new(encyclopedia: Encyclopedia) -> Self {
    Self { encyclopedia }
  }
}

impl Render<RgbImage, Detection> for ReportOutput {
  type Error = std::io::Error;

  fn render_result(&self, _frame: &RgbImage, result: &Detection) -> Result<(), Self::Error> {
    let report = format_report(result, &self.encyclopedia);
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(report.as_bytes())?;
    stdout.flush()
  }
}
