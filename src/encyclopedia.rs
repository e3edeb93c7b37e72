// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/encyclopedia.rs - 病害资料与防治建议
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

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Error, Debug)]
pub enum EncyclopediaError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("病害资料格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiseaseInfo {
  pub description: String,
  pub symptoms: String,
  pub treatment: String,
}

impl DiseaseInfo {
  fn not_available() -> Self {
    Self {
      description: NOT_AVAILABLE.to_string(),
      symptoms: NOT_AVAILABLE.to_string(),
      treatment: NOT_AVAILABLE.to_string(),
    }
  }
}

/// 以病害标签为键的只读资料表，缺少条目不会影响检测流程
#[derive(Debug, Clone, Default)]
pub struct Encyclopedia {
  entries: HashMap<String, DiseaseInfo>,
}

impl Encyclopedia {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EncyclopediaError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let encyclopedia = Self::from_json(&content)?;
    info!(
      "从 {} 加载 {} 条病害资料",
      path.display(),
      encyclopedia.entries.len()
    );
    Ok(encyclopedia)
  }

  pub fn from_json(content: &str) -> Result<Self, EncyclopediaError> {
    Ok(Self {
      entries: serde_json::from_str(content)?,
    })
  }

  /// 读取失败时返回空资料表
  pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
    Self::from_file(path).unwrap_or_else(|e| {
      warn!("病害资料加载失败: {}", e);
      Self::default()
    })
  }

  pub fn get(&self, label: &str) -> Option<&DiseaseInfo> {
    self.entries.get(label)
  }

  /// 没有对应条目时各字段为 "N/A"
  pub fn lookup(&self, label: &str) -> DiseaseInfo {
    self
      .get(label)
      .cloned()
      .unwrap_or_else(DiseaseInfo::not_available)
  }
}

/// 按病害给出的预防建议
pub fn preventive_tips(label: &str) -> &'static str {
  match label.to_lowercase().as_str() {
    "apple___apple_scab" | "apple___black_rot" => {
      "Prune affected areas, apply fungicide during spring, and avoid wet foliage."
    }
    "apple___cedar_apple_rust" => {
      "Remove nearby cedar trees if possible and apply fungicide in early spring."
    }
    "blueberry___healthy"
    | "cherry_(including_sour)___healthy"
    | "corn_(maize)___healthy"
    | "grape___healthy"
    | "peach___healthy"
    | "pepper,_bell___healthy"
    | "potato___healthy"
    | "raspberry___healthy"
    | "soybean___healthy"
    | "tomato___healthy"
    | "strawberry___healthy"
    | "apple___healthy" => "Plant is healthy. Keep monitoring weekly and water appropriately.",
    "cherry_(including_sour)___powdery_mildew" | "squash___powdery_mildew" => {
      "Avoid overhead watering, improve air circulation, and apply sulfur-based fungicide."
    }
    "corn_(maize)___cercospora_leaf_spot gray_leaf_spot" | "corn_(maize)___northern_leaf_blight" => {
      "Use resistant hybrids, rotate crops, and remove infected debris."
    }
    "corn_(maize)___common_rust_" => {
      "Use rust-resistant varieties, remove crop residue, and rotate with non-host crops."
    }
    "grape___black_rot" | "grape___esca_(black_measles)" | "grape___leaf_blight_(isariopsis_leaf_spot)" => {
      "Prune infected leaves, manage vineyard humidity, and avoid fruit injuries."
    }
    "orange___haunglongbing_(citrus_greening)" => {
      "Control psyllid population, remove infected trees, and monitor frequently."
    }
    "peach___bacterial_spot" | "pepper,_bell___bacterial_spot" | "tomato___bacterial_spot" => {
      "Avoid wetting foliage, apply copper-based fungicide, and rotate crops annually."
    }
    "potato___early_blight" | "tomato___early_blight" => {
      "Remove infected leaves, apply chlorothalonil or mancozeb, and avoid overhead watering."
    }
    "potato___late_blight" | "tomato___late_blight" => {
      "Destroy infected plants, apply fungicides preventively, and space plants for air circulation."
    }
    "strawberry___leaf_scorch" => {
      "Water at root level, prune infected leaves, and apply nitrogen sparingly."
    }
    "tomato___leaf_mold" => "Ensure proper air flow, avoid overcrowding, and remove affected leaves.",
    "tomato___septoria_leaf_spot" => {
      "Apply fungicide regularly, remove infected leaves, and avoid splashing water."
    }
    "tomato___spider_mites two-spotted_spider_mite" => {
      "Increase humidity, use insecticidal soap, and monitor leaf undersides."
    }
    "tomato___target_spot" => {
      "Remove lower leaves, use mulch to prevent soil splash, and apply fungicide."
    }
    "tomato___tomato_yellow_leaf_curl_virus" | "tomato___tomato_mosaic_virus" => {
      "Control whiteflies, remove infected plants, and use resistant varieties."
    }
    _ => "Improve air flow, keep foliage dry, use disease-resistant varieties, and inspect weekly.",
  }
}
