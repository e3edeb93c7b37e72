// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/lib.rs - 库主文件
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
  fs,
  io::{self, Write},
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

pub mod encyclopedia;
pub mod explain;
pub mod feature;
pub mod frame;
pub mod history;
pub mod input;
pub mod model;
pub mod output;
pub mod rank;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 取出 URL 中经过百分号解码的文件路径
pub fn url_path(url: &url::Url) -> PathBuf {
  let raw = url.path();
  match urlencoding::decode(raw) {
    Ok(decoded) => PathBuf::from(decoded.into_owned()),
    Err(_) => PathBuf::from(raw),
  }
}

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 先写入同目录下的临时文件再改名，避免留下写了一半的文件。
/// 临时文件名带进程号与序号，并发写同一目标互不干扰。
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
  tmp_name.push(format!(
    ".{}.{}.tmp",
    std::process::id(),
    TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
  ));
  let tmp = path.with_file_name(tmp_name);

  let result = (|| {
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
  })();

  if result.is_err() {
    let _ = fs::remove_file(&tmp);
  }
  result
}
