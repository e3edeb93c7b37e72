// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/history.rs - 检测记录目录存储
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
  fmt,
  fs::{File, OpenOptions},
  io::{Cursor, ErrorKind},
  path::{Path, PathBuf},
};

use chrono::{Local, TimeZone, Utc};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{FromUrl, FromUrlWithScheme, url_path, write_atomically};

pub const HISTORY_FILE: &str = "history.json";
pub const IMAGE_PREFIX: &str = "leaf_";
pub(crate) const LOCK_FILE: &str = ".history.lock";

#[derive(Error, Debug)]
pub enum HistoryError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("历史记录格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("保存已中止")]
  Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
  Healthy,
  Diseased,
}

impl HealthStatus {
  /// 标签中含有 "healthy" 即视为健康
  pub fn from_label(label: &str) -> Self {
    if label.to_lowercase().contains("healthy") {
      HealthStatus::Healthy
    } else {
      HealthStatus::Diseased
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      HealthStatus::Healthy => "Healthy",
      HealthStatus::Diseased => "Diseased",
    }
  }
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 一次完成的检测，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
  pub disease_name: String,
  /// 0 ~ 100
  pub confidence: f32,
  pub health_status: HealthStatus,
  /// Unix 毫秒时间戳
  pub timestamp: i64,
  pub grad_cam_path: PathBuf,
}

impl DetectionRecord {
  /// 形如 `05 Mar 2026, 14:20` 的本地时间
  pub fn formatted_date(&self) -> String {
    Local
      .timestamp_millis_opt(self.timestamp)
      .single()
      .map(|t| t.format("%d %b %Y, %H:%M").to_string())
      .unwrap_or_default()
  }
}

/// 目录中保存 `history.json`（新记录在前）以及每条记录对应的叠加图。
/// 写操作持有目录下 `.history.lock` 的排他锁，多个进程打开同一目录也不会互相覆盖。
pub struct HistoryStore {
  directory: PathBuf,
}

/// 目录锁，释放文件句柄即解锁
struct DirectoryLock(File);

impl Drop for DirectoryLock {
  fn drop(&mut self) {
    if let Err(e) = self.0.unlock() {
      warn!("释放历史记录锁失败: {}", e);
    }
  }
}

impl FromUrlWithScheme for HistoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for HistoryStore {
  type Error = HistoryError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(HistoryError::SchemeMismatch);
    }

    Self::open(url_path(uri))
  }
}

impl HistoryStore {
  pub fn open(directory: impl Into<PathBuf>) -> Result<Self, HistoryError> {
    let directory = directory.into();
    std::fs::create_dir_all(&directory)?;
    debug!("历史记录目录: {}", directory.display());

    Ok(Self { directory })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn index_path(&self) -> PathBuf {
    self.directory.join(HISTORY_FILE)
  }

  fn lock(&self) -> Result<DirectoryLock, HistoryError> {
    let file = OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(self.directory.join(LOCK_FILE))?;
    file.lock()?;
    Ok(DirectoryLock(file))
  }

  /// 同一毫秒内的多次保存以序号区分，需在持有目录锁时调用
  fn overlay_path(&self, timestamp: i64) -> Result<PathBuf, HistoryError> {
    (0..=u16::MAX)
      .map(|seq| {
        self
          .directory
          .join(format!("{}{}_{:04X}_overlay.png", IMAGE_PREFIX, timestamp, seq))
      })
      .find(|path| !path.exists())
      .ok_or_else(|| std::io::Error::from(ErrorKind::AlreadyExists).into())
  }

  /// 是否是本目录中的文件；复制过来的索引可能引用其他目录的图像
  fn owns(&self, path: &Path) -> bool {
    let Some(parent) = path.parent() else {
      return false;
    };
    match (parent.canonicalize(), self.directory.canonicalize()) {
      (Ok(parent), Ok(directory)) => parent == directory,
      _ => false,
    }
  }

  /// 文件不存在时返回 `None`
  fn read_index(&self) -> Result<Option<Vec<DetectionRecord>>, HistoryError> {
    let content = match std::fs::read(self.index_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&content)?))
  }

  /// 读取全部记录；文件缺失或损坏时返回空列表，损坏的文件保持原样。
  /// 索引总是整体替换，读取不需要加锁。
  pub fn load_all(&self) -> Vec<DetectionRecord> {
    match self.read_index() {
      Ok(Some(records)) => records,
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!("读取历史记录失败, 视为空记录: {}", e);
        Vec::new()
      }
    }
  }

  /// 保存叠加图并把新记录插入到最前面
  pub fn append(
    &self,
    disease_name: &str,
    probability: f32,
    overlay: &RgbImage,
  ) -> Result<DetectionRecord, HistoryError> {
    self.append_unless(disease_name, probability, overlay, || false)
  }

  /// 取得目录锁后再询问 `aborted`，返回 true 时不写入任何文件
  pub fn append_unless(
    &self,
    disease_name: &str,
    probability: f32,
    overlay: &RgbImage,
    aborted: impl Fn() -> bool,
  ) -> Result<DetectionRecord, HistoryError> {
    let _lock = self.lock()?;
    if aborted() {
      debug!("保存前检测已中止");
      return Err(HistoryError::Aborted);
    }

    let timestamp = Utc::now().timestamp_millis();
    let overlay_path = self.overlay_path(timestamp)?;
    let mut png = Vec::new();
    overlay.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    write_atomically(&overlay_path, &png)?;

    let record = DetectionRecord {
      disease_name: disease_name.to_string(),
      confidence: probability * 100.0,
      health_status: HealthStatus::from_label(disease_name),
      timestamp,
      grad_cam_path: overlay_path.clone(),
    };

    let result = self.prepend(record.clone());
    if let Err(e) = &result {
      error!("写入历史记录失败: {}", e);
      let _ = std::fs::remove_file(&overlay_path);
    }
    result?;

    info!(
      "检测记录已保存: {} ({:.2}%) -> {}",
      record.disease_name,
      record.confidence,
      overlay_path.display()
    );
    Ok(record)
  }

  fn prepend(&self, record: DetectionRecord) -> Result<(), HistoryError> {
    let mut records = match self.read_index() {
      Ok(Some(records)) => records,
      Ok(None) => Vec::new(),
      Err(HistoryError::JsonError(e)) => {
        let aside = self.directory.join(format!(
          "{}.corrupt-{}",
          HISTORY_FILE,
          Utc::now().timestamp_millis()
        ));
        warn!(
          "历史记录已损坏 ({}), 原文件移动到 {} 后重新开始",
          e,
          aside.display()
        );
        std::fs::rename(self.index_path(), &aside)?;
        Vec::new()
      }
      Err(e) => return Err(e),
    };

    records.insert(0, record);
    let json = serde_json::to_vec_pretty(&records)?;
    write_atomically(&self.index_path(), &json)?;
    Ok(())
  }

  /// 删除本目录中被记录引用的图像以及残留的 `leaf_*` 文件，最后删除索引文件。
  /// 其他目录中的图像不会被删除。图像删除失败时索引保持不变并返回错误。
  /// 返回被清除的记录数。
  pub fn clear_all(&self) -> Result<usize, HistoryError> {
    let _lock = self.lock()?;

    let records = match self.read_index() {
      Ok(records) => records.unwrap_or_default(),
      Err(HistoryError::JsonError(e)) => {
        warn!("历史记录已损坏 ({}), 仅按文件名清理图像", e);
        Vec::new()
      }
      Err(e) => return Err(e),
    };

    for record in records.iter() {
      if self.owns(&record.grad_cam_path) {
        remove_if_exists(&record.grad_cam_path)?;
      } else {
        warn!(
          "记录引用的图像不在历史目录中, 跳过: {}",
          record.grad_cam_path.display()
        );
      }
    }

    for entry in std::fs::read_dir(&self.directory)? {
      let entry = entry?;
      let is_image = entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with(IMAGE_PREFIX));
      if is_image && entry.file_type()?.is_file() {
        remove_if_exists(&entry.path())?;
      }
    }

    remove_if_exists(&self.index_path())?;
    info!("已清除 {} 条历史记录", records.len());
    Ok(records.len())
  }
}

fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
  match std::fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn overlay() -> RgbImage {
    RgbImage::from_pixel(4, 3, Rgb([200, 40, 40]))
  }

  #[test]
  fn missing_store_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    assert!(store.load_all().is_empty());
  }

  #[test]
  fn append_puts_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    let first = store.append("Tomato___Late_blight", 0.8, &overlay()).unwrap();
    let second = store.append("Tomato___healthy", 0.95, &overlay()).unwrap();

    let records = store.load_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], second);
    assert_eq!(records[1], first);
    assert_ne!(first.grad_cam_path, second.grad_cam_path);
    assert!(second.grad_cam_path.exists());
    assert_eq!(second.health_status, HealthStatus::Healthy);
    assert_eq!(first.health_status, HealthStatus::Diseased);
    assert!((first.confidence - 80.0).abs() < 1e-4);
  }

  #[test]
  fn identical_detections_are_not_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    store.append("Apple___Black_rot", 0.5, &overlay()).unwrap();
    store.append("Apple___Black_rot", 0.5, &overlay()).unwrap();
    assert_eq!(store.load_all().len(), 2);
  }

  #[test]
  fn saved_overlay_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let record = store.append("Corn_(maize)___Common_rust_", 0.6, &overlay()).unwrap();
    let saved = image::open(&record.grad_cam_path).unwrap().into_rgb8();
    assert_eq!(saved, overlay());
  }

  #[test]
  fn clear_removes_index_and_images() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let a = store.append("Grape___Black_rot", 0.7, &overlay()).unwrap();
    let b = store.append("Grape___healthy", 0.9, &overlay()).unwrap();
    std::fs::write(dir.path().join("leaf_123.jpg"), b"stray").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

    assert_eq!(store.clear_all().unwrap(), 2);
    assert!(store.load_all().is_empty());
    assert!(!a.grad_cam_path.exists());
    assert!(!b.grad_cam_path.exists());
    assert!(!dir.path().join("leaf_123.jpg").exists());
    assert!(!dir.path().join(HISTORY_FILE).exists());
    assert!(dir.path().join("notes.txt").exists());
  }

  #[test]
  fn clearing_a_copied_store_keeps_the_original_images() {
    let root = tempfile::tempdir().unwrap();
    let original = root.path().join("a");
    let copy = root.path().join("b");
    let store = HistoryStore::open(&original).unwrap();
    let record = store.append("Tomato___Leaf_Mold", 0.66, &overlay()).unwrap();

    std::fs::create_dir(&copy).unwrap();
    for entry in std::fs::read_dir(&original).unwrap() {
      let entry = entry.unwrap();
      std::fs::copy(entry.path(), copy.join(entry.file_name())).unwrap();
    }

    let copied = HistoryStore::open(&copy).unwrap();
    assert_eq!(copied.clear_all().unwrap(), 1);
    assert!(record.grad_cam_path.exists());
    assert_eq!(store.load_all(), vec![record.clone()]);
    assert!(!copy.join(record.grad_cam_path.file_name().unwrap()).exists());
  }

  #[test]
  fn stores_sharing_a_directory_do_not_lose_records() {
    let dir = tempfile::tempdir().unwrap();
    let handles: Vec<_> = (0..2)
      .map(|_| {
        let path = dir.path().to_path_buf();
        std::thread::spawn(move || {
          let store = HistoryStore::open(path).unwrap();
          for _ in 0..20 {
            store.append("Squash___Powdery_mildew", 0.5, &overlay()).unwrap();
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let records = HistoryStore::open(dir.path()).unwrap().load_all();
    assert_eq!(records.len(), 40);
    let mut paths: Vec<_> = records.iter().map(|r| r.grad_cam_path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 40);
    assert!(paths.iter().all(|p| p.exists()));
  }

  #[test]
  fn aborted_append_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    assert!(matches!(
      store.append_unless("Apple___Apple_scab", 0.9, &overlay(), || true),
      Err(HistoryError::Aborted)
    ));
    assert!(store.load_all().is_empty());
    let images = std::fs::read_dir(dir.path())
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| e.file_name().to_string_lossy().starts_with(IMAGE_PREFIX))
      .count();
    assert_eq!(images, 0);
  }

  #[test]
  fn clear_on_empty_store_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    assert_eq!(store.clear_all().unwrap(), 0);
  }

  #[test]
  fn corrupt_index_loads_empty_and_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    std::fs::write(dir.path().join(HISTORY_FILE), b"[{\"diseaseName\":").unwrap();

    assert!(store.load_all().is_empty());
    assert!(dir.path().join(HISTORY_FILE).exists());
  }

  #[test]
  fn append_after_corruption_moves_old_file_aside() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    std::fs::write(dir.path().join(HISTORY_FILE), b"not json").unwrap();

    let record = store.append("Potato___Early_blight", 0.4, &overlay()).unwrap();
    assert_eq!(store.load_all(), vec![record]);

    let aside: Vec<_> = std::fs::read_dir(dir.path())
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| {
        e.file_name()
          .to_string_lossy()
          .starts_with("history.json.corrupt-")
      })
      .collect();
    assert_eq!(aside.len(), 1);
    assert_eq!(std::fs::read(aside[0].path()).unwrap(), b"not json");
  }

  #[test]
  fn record_uses_camel_case_fields() {
    let record = DetectionRecord {
      disease_name: "Peach___healthy".to_string(),
      confidence: 97.5,
      health_status: HealthStatus::Healthy,
      timestamp: 1_700_000_000_000,
      grad_cam_path: PathBuf::from("/data/leaf_1700000000000_0000_overlay.png"),
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["diseaseName"], "Peach___healthy");
    assert_eq!(json["healthStatus"], "Healthy");
    assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    assert_eq!(
      json["gradCamPath"],
      "/data/leaf_1700000000000_0000_overlay.png"
    );
  }

  #[test]
  fn formatted_date_has_day_month_year_time() {
    let record = DetectionRecord {
      disease_name: String::new(),
      confidence: 0.0,
      health_status: HealthStatus::Diseased,
      timestamp: 1_700_000_000_000,
      grad_cam_path: PathBuf::new(),
    };
    let date = record.formatted_date();
    assert_eq!(date.len(), "14 Nov 2023, 22:13".len());
    assert!(date.contains(" 2023, "));
  }

  #[test]
  fn health_status_follows_label() {
    assert_eq!(HealthStatus::from_label("Apple___healthy"), HealthStatus::Healthy);
    assert_eq!(HealthStatus::from_label("Squash___Powdery_mildew"), HealthStatus::Diseased);
    assert_eq!(HealthStatus::Diseased.to_string(), "Diseased");
  }
}
