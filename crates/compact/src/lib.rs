//! Compact-and-repair pipeline.
//! 壓縮及修復流程。
//!
//! The host cannot repair a database file onto itself, so a repair is a
//! swap: write to a sibling backup path, delete the original, rename the
//! backup into place. From the caller's perspective the operation is
//! atomic — after success exactly one file exists at the canonical path,
//! and a host failure leaves the original untouched.
//! 主機無法將資料庫檔案就地修復，因此修復是一次交換：先寫入同層的備份
//! 路徑，再刪除原始檔並將備份改名補位。對呼叫端而言此操作具原子性——
//! 成功後正準路徑上恰有一個檔案；主機失敗時原始檔完全不受影響。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use accrebuild_host::{HostDriver, HostError, SaveMode, SessionManager};
use thiserror::Error;

/// Repair passes run after major structural changes. Bulk object deletion
/// leaves corruption artifacts that a single pass does not always resolve.
/// 重大結構變更後執行的修復次數。大量刪除物件留下的損壞痕跡，
/// 單次修復未必能完全清除。
pub const REPAIR_PASSES: usize = 3;

#[derive(Debug, Error)]
pub enum CompactError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("could not swap repaired file into '{0}'")]
    /// 修復後的檔案無法換回原位。
    Swap(PathBuf, #[source] io::Error),
}

/// Sibling path the host writes the repaired file to.
/// 主機寫入修復結果的同層路徑。
pub fn backup_path(database: &Path) -> PathBuf {
    let stem = database
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("database");
    let name = match database.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}_backup.{ext}"),
        None => format!("{stem}_backup"),
    };
    database.with_file_name(name)
}

/// Runs one compact-and-repair pass on `database`, swapping the repaired
/// file into place. The repair session opens no database and keeps the
/// host window hidden. If the host call fails, the delete/rename never
/// executes.
/// 對 `database` 執行一次壓縮及修復並將結果換回原位。修復工作階段
/// 不開啟資料庫且隱藏主機視窗。主機呼叫失敗時，刪除與改名不會執行。
pub fn compact_and_repair(driver: &dyn HostDriver, database: &Path) -> Result<(), CompactError> {
    let backup = backup_path(database);
    let manager = SessionManager::new(driver);
    manager.with_session(None, false, SaveMode::No, |session| {
        session.compact_repair(database, &backup)
    })?;

    fs::remove_file(database).map_err(|err| CompactError::Swap(database.to_path_buf(), err))?;
    fs::rename(&backup, database).map_err(|err| CompactError::Swap(database.to_path_buf(), err))?;
    log::debug!("compacted {}", database.display());
    Ok(())
}

/// Runs `passes` consecutive repair passes, stopping at the first failure.
/// 連續執行 `passes` 次修復，遇到第一個失敗即停止。
pub fn compact_cycles(
    driver: &dyn HostDriver,
    database: &Path,
    passes: usize,
) -> Result<(), CompactError> {
    for pass in 1..=passes {
        log::info!(
            "compact and repair pass {pass}/{passes} on {}",
            database.display()
        );
        compact_and_repair(driver, database)?;
    }
    Ok(())
}
