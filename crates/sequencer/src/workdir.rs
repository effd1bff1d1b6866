//! Working-directory layout for a rebuild run.
//! 重建執行所使用的工作目錄配置。
//!
//! Everything lives under one root: `bin/` holds the working copy of the
//! database, `src/` the decomposed text tree, and the helper script sits in
//! the root itself. `src/` is recreated at the start of every run; a crash
//! mid-run leaves whatever state it leaves, and the next run's prepare
//! step cleans it up.
//! 所有內容都位於同一個根目錄下：`bin/` 放資料庫的工作副本，`src/`
//! 放分解後的文字樹，輔助腳本則位於根目錄。每次執行開始時會重建
//! `src/`；執行中途當機殘留的狀態，由下一次執行的準備步驟清理。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default name of the working root under the user's home directory.
/// 使用者家目錄下工作根目錄的預設名稱。
pub const WORK_DIR_NAME: &str = "ariawase";

/// Subdirectory holding the working copy of the database.
/// 存放資料庫工作副本的子目錄。
pub const BIN_DIR: &str = "bin";

/// Subdirectory holding the decomposed text source tree.
/// 存放分解後文字原始檔樹的子目錄。
pub const SRC_DIR: &str = "src";

#[derive(Debug, Error)]
#[error("I/O error on '{path}'")]
pub struct WorkdirError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl WorkdirError {
    fn wrap(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self { path, source }
    }
}

/// The on-disk working tree of one rebuild root.
/// 單一重建根目錄在磁碟上的工作樹。
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(BIN_DIR)
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join(SRC_DIR)
    }

    /// Path of the working copy for `input` inside `bin/`.
    /// `input` 於 `bin/` 內工作副本的路徑。
    pub fn working_file(&self, input: &Path) -> PathBuf {
        match input.file_name() {
            Some(name) => self.bin_dir().join(name),
            None => self.bin_dir(),
        }
    }

    /// Directory the helper decomposes a database's objects into.
    /// 輔助腳本存放某資料庫分解物件的目錄。
    pub fn source_tree_for(&self, working_file: &Path) -> PathBuf {
        match working_file.file_name() {
            Some(name) => self.src_dir().join(name),
            None => self.src_dir(),
        }
    }

    /// Discards any previous run's source tree and (re)creates the layout.
    /// 捨棄前一次執行的原始檔樹並（重新）建立目錄配置。
    pub fn prepare(&self) -> Result<(), WorkdirError> {
        let src = self.src_dir();
        if src.exists() {
            log::debug!("discarding previous source tree {}", src.display());
            fs::remove_dir_all(&src).map_err(WorkdirError::wrap(&src))?;
        }
        fs::create_dir_all(&src).map_err(WorkdirError::wrap(&src))?;
        let bin = self.bin_dir();
        fs::create_dir_all(&bin).map_err(WorkdirError::wrap(&bin))?;
        Ok(())
    }

    /// Removes every file in `bin/` except `keep`, returning the removed
    /// paths. Used to drop stray empty definition files the helper leaves
    /// behind.
    /// 移除 `bin/` 中除 `keep` 以外的所有檔案並回傳被移除的路徑。
    /// 用於清掉輔助腳本殘留的空定義檔。
    pub fn clean_bin_except(&self, keep: &Path) -> Result<Vec<PathBuf>, WorkdirError> {
        let bin = self.bin_dir();
        let entries = fs::read_dir(&bin).map_err(WorkdirError::wrap(&bin))?;
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(WorkdirError::wrap(&bin))?;
            let path = entry.path();
            if path == keep || !path.is_file() {
                continue;
            }
            fs::remove_file(&path).map_err(WorkdirError::wrap(&path))?;
            removed.push(path);
        }
        removed.sort();
        if !removed.is_empty() {
            log::info!("removed {} stray file(s) from {}", removed.len(), bin.display());
        }
        Ok(removed)
    }
}
