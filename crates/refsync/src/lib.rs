//! Reference synchronizer: replicates external library references from a
//! source database onto a rebuilt target.
//! 參考同步器：將來源資料庫的外部程式庫參考複製到重建後的目標資料庫。
//!
//! Only needed when the rebuild starts from a blank target; a working copy
//! of the original already carries its references.
//! 僅在自空白目標重建時需要；原始檔的工作副本本身已帶有參考。

use std::path::Path;

use accrebuild_host::{HostDriver, HostError, Reference, SaveMode, SessionManager};

/// Returns the ordered list of external references attached to `database`.
/// Read-only: the session quits discarding changes.
/// 回傳 `database` 目前附掛的外部參考（依序排列）。唯讀操作：
/// 工作階段結束時放棄變更。
pub fn list_references(
    driver: &dyn HostDriver,
    database: &Path,
) -> Result<Vec<Reference>, HostError> {
    let manager = SessionManager::new(driver);
    manager.with_session(Some(database), true, SaveMode::No, |session| {
        let references = session.references()?;
        log::debug!(
            "{} carries {} reference(s)",
            database.display(),
            references.len()
        );
        Ok(references)
    })
}

/// Adds every candidate missing from `database` (full paths compared
/// case-insensitively), preserving candidate order and leaving existing
/// references untouched. Returns the references actually added.
/// 將 `database` 中缺少的候選參考一一加入（完整路徑不分大小寫比較），
/// 維持候選清單的順序且不更動既有參考。回傳實際加入的參考。
pub fn add_missing(
    driver: &dyn HostDriver,
    database: &Path,
    candidates: &[Reference],
) -> Result<Vec<Reference>, HostError> {
    let manager = SessionManager::new(driver);
    manager.with_session(Some(database), true, SaveMode::Yes, |session| {
        let existing = session.references()?;
        let mut added = Vec::new();
        for candidate in candidates {
            let present = existing
                .iter()
                .chain(added.iter())
                .any(|reference| reference.matches_path(&candidate.full_path));
            if present {
                continue;
            }
            log::info!("adding reference {candidate}");
            session.add_reference(&candidate.full_path)?;
            added.push(candidate.clone());
        }
        Ok(added)
    })
}
