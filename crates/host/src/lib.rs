//! Automation-host surface consumed by the database rebuild pipeline.
//! 資料庫重建流程所依賴的自動化主機介面。
//!
//! The pipeline never talks to the host application's object graph
//! directly. Everything goes through the [`HostDriver`] / [`HostSession`]
//! traits: production code binds them to the COM automation surface (see
//! [`native_driver`]), tests bind them to the in-memory [`fake`] host.
//! 流程不會直接操作主機應用程式的物件模型，一律經由 [`HostDriver`] 與
//! [`HostSession`] 特徵：正式環境由 COM 綁定實作（見 [`native_driver`]），
//! 測試則使用記憶體版的 [`fake`] 替身。

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fake;

#[cfg(target_os = "windows")]
mod com;

/// Upper bound on close signals sent to a stale host instance.
/// 對殘留主機視窗送出關閉訊號的次數上限。
pub const FORCE_CLOSE_ATTEMPTS: usize = 15;

/// Pause between consecutive close signals.
/// 兩次關閉訊號之間的等待時間。
pub const FORCE_CLOSE_DELAY: Duration = Duration::from_millis(1);

/// Kinds of objects stored in a database, mirroring the host's own
/// object-type enumeration.
/// 資料庫物件的種類，對應主機自身的物件類型列舉。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Table,
    Query,
    Form,
    Report,
    Macro,
    Module,
}

impl ObjectKind {
    /// Numeric code used by the automation interface (AcObjectType).
    /// 自動化介面使用的數值代碼（AcObjectType）。
    pub fn automation_code(self) -> i32 {
        match self {
            ObjectKind::Table => 0,
            ObjectKind::Query => 1,
            ObjectKind::Form => 2,
            ObjectKind::Report => 3,
            ObjectKind::Macro => 4,
            ObjectKind::Module => 5,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Table => "table",
            ObjectKind::Query => "query",
            ObjectKind::Form => "form",
            ObjectKind::Report => "report",
            ObjectKind::Macro => "macro",
            ObjectKind::Module => "module",
        };
        f.write_str(label)
    }
}

/// What the host should do with pending changes when a session ends.
/// 結束工作階段時，主機要如何處理尚未儲存的變更。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Prompt,
    Yes,
    No,
}

impl SaveMode {
    /// Numeric code used by the automation interface (AcCloseSave).
    /// 自動化介面使用的數值代碼（AcCloseSave）。
    pub fn automation_code(self) -> i32 {
        match self {
            SaveMode::Prompt => 0,
            SaveMode::Yes => 1,
            SaveMode::No => 2,
        }
    }
}

/// Identity of one database object: kind plus case-sensitive name.
/// 單一資料庫物件的識別：種類加上區分大小寫的名稱。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectDescriptor {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// External code library a database's automation code depends on.
/// 資料庫自動化程式碼所依賴的外部程式庫。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub full_path: String,
}

impl Reference {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
        }
    }

    /// Reference identity is the full path compared case-insensitively.
    /// 參考的識別為完整路徑，比較時不分大小寫。
    pub fn matches_path(&self, other: &str) -> bool {
        self.full_path.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path)
    }
}

/// Failures reported by the automation host.
/// 自動化主機回報的錯誤。
#[derive(Debug, Error)]
pub enum HostError {
    #[error("automation host could not be started: {0}")]
    /// 無法啟動自動化主機。
    Unavailable(String),
    #[error("another host session is still open")]
    /// 已有另一個主機工作階段尚未結束。
    SessionBusy,
    #[error("database '{0}' could not be opened: {1}")]
    /// 資料庫開啟失敗。
    OpenFailed(std::path::PathBuf, String),
    #[error("no database is open in this session")]
    /// 目前工作階段沒有開啟任何資料庫。
    NoDatabase,
    #[error("{object}: {reason}")]
    /// 針對單一物件的操作失敗。
    ObjectOperation {
        object: ObjectDescriptor,
        reason: String,
    },
    #[error("compact and repair failed for '{0}': {1}")]
    /// 壓縮及修復失敗。
    RepairFailed(std::path::PathBuf, String),
    #[error("reference '{0}' could not be added: {1}")]
    /// 無法加入外部參考。
    Reference(String, String),
    #[error("host session did not shut down cleanly: {0}")]
    /// 工作階段未能正常結束。
    Quit(String),
}

/// Entry point to the automation host: window probing plus session
/// creation. At most one session is meaningfully interactive at a time.
/// 自動化主機的進入點：視窗偵測與工作階段建立。同一時間僅有一個
/// 工作階段能有意義地互動。
pub trait HostDriver {
    /// Whether a host main window currently exists.
    /// 主機主視窗目前是否存在。
    fn is_running(&self) -> bool;

    /// Sends one advisory close signal to the host main window.
    /// 向主機主視窗送出一次關閉訊號（僅屬建議性質）。
    fn request_close(&self);

    /// Launches the host, opening `database` when given, with the window
    /// shown or hidden per `visible`.
    /// 啟動主機；若提供 `database` 則同時開啟，並依 `visible` 顯示或隱藏視窗。
    fn open(
        &self,
        database: Option<&Path>,
        visible: bool,
    ) -> Result<Box<dyn HostSession>, HostError>;
}

/// One live host instance, bound to at most one open database.
/// 一個執行中的主機實例，最多綁定一個已開啟的資料庫。
pub trait HostSession: std::fmt::Debug {
    /// Names of all objects of `kind`, in the host's enumeration order.
    /// 指定種類全部物件的名稱，依主機列舉順序排列。
    fn object_names(&self, kind: ObjectKind) -> Result<Vec<String>, HostError>;

    /// Closes an open object without saving. May fail when the object is
    /// not open; callers treat that as ignorable.
    /// 關閉已開啟的物件且不儲存。物件未開啟時可能失敗，呼叫端視為可忽略。
    fn close_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError>;

    /// Deletes an object from the database.
    /// 自資料庫刪除物件。
    fn delete_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError>;

    /// Exports one table as delimited text to `dest`.
    /// 將單一資料表匯出為分隔文字檔。
    fn export_delimited(
        &mut self,
        table: &str,
        dest: &Path,
        include_field_names: bool,
    ) -> Result<(), HostError>;

    /// Loads a query definition from a text file.
    /// 從文字檔載入查詢定義。
    fn load_query(&mut self, name: &str, source: &Path) -> Result<(), HostError>;

    /// Ordered list of external references attached to the database.
    /// 資料庫目前附掛的外部參考，依序排列。
    fn references(&self) -> Result<Vec<Reference>, HostError>;

    /// Attaches an external reference by full path.
    /// 以完整路徑附掛外部參考。
    fn add_reference(&mut self, path: &str) -> Result<(), HostError>;

    /// Runs the host's compact-and-repair, writing the result to `dest`.
    /// The host cannot repair a file onto itself.
    /// 執行主機的壓縮及修復，結果寫入 `dest`。主機無法就地修復檔案。
    fn compact_repair(&mut self, source: &Path, dest: &Path) -> Result<(), HostError>;

    /// Terminates the session, handling pending changes per `mode`.
    /// 結束工作階段，依 `mode` 處理尚未儲存的變更。
    fn quit(self: Box<Self>, mode: SaveMode) -> Result<(), HostError>;
}

/// Owns session lifecycles for one driver: the force-close sweep before
/// acquisition and the quit-exactly-once wrapper around each operation.
/// 管理單一驅動程式的工作階段生命週期：取得前的強制關閉掃描，
/// 以及保證每次操作恰好結束一次的包裝。
pub struct SessionManager<'a> {
    driver: &'a dyn HostDriver,
}

impl<'a> SessionManager<'a> {
    pub fn new(driver: &'a dyn HostDriver) -> Self {
        Self { driver }
    }

    /// Signals any stale host instance to close, up to
    /// [`FORCE_CLOSE_ATTEMPTS`] times. Returns the number of signals sent.
    /// The host staying open afterwards is tolerated, not fatal.
    /// 對殘留的主機實例送出關閉訊號，最多 [`FORCE_CLOSE_ATTEMPTS`] 次，
    /// 回傳實際送出的次數。主機仍未關閉時容忍之，不視為致命錯誤。
    pub fn force_close(&self) -> usize {
        let mut attempts = 0;
        while self.driver.is_running() && attempts < FORCE_CLOSE_ATTEMPTS {
            self.driver.request_close();
            thread::sleep(FORCE_CLOSE_DELAY);
            attempts += 1;
        }
        if self.driver.is_running() {
            log::warn!("host window still present after {attempts} close signals");
        } else if attempts > 0 {
            log::debug!("stale host closed after {attempts} close signals");
        }
        attempts
    }

    /// Opens a session, runs `work`, and quits exactly once on every exit
    /// path: with `commit` on success, discarding changes on failure (a
    /// quit error on the failure path is dropped in favor of the original
    /// error).
    /// 開啟工作階段並執行 `work`，任何結束路徑都恰好結束一次：成功時以
    /// `commit` 結束，失敗時放棄變更（失敗路徑上的結束錯誤會被原始錯誤取代）。
    pub fn with_session<T>(
        &self,
        database: Option<&Path>,
        visible: bool,
        commit: SaveMode,
        work: impl FnOnce(&mut dyn HostSession) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        let mut session = self.driver.open(database, visible)?;
        match work(session.as_mut()) {
            Ok(value) => {
                session.quit(commit)?;
                Ok(value)
            }
            Err(err) => {
                let _ = session.quit(SaveMode::No);
                Err(err)
            }
        }
    }
}

/// Returns the production driver for the current platform.
/// 回傳目前平台的正式驅動程式。
#[cfg(target_os = "windows")]
pub fn native_driver() -> Result<Box<dyn HostDriver>, HostError> {
    Ok(Box::new(com::ComHost::new()?))
}

/// Returns the production driver for the current platform.
/// 回傳目前平台的正式驅動程式。
#[cfg(not(target_os = "windows"))]
pub fn native_driver() -> Result<Box<dyn HostDriver>, HostError> {
    Err(HostError::Unavailable(
        "the Access automation host is only available on Windows".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeDatabase, FakeHost};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn force_close_stops_at_the_retry_bound() {
        let host = FakeHost::new();
        host.set_window_open(true);
        host.set_close_resistance(100);

        let manager = SessionManager::new(&host);
        assert_eq!(manager.force_close(), FORCE_CLOSE_ATTEMPTS);
        assert!(host.is_running(), "stubborn host stays open / 頑固主機仍開啟");
    }

    #[test]
    fn force_close_returns_early_once_the_window_is_gone() {
        let host = FakeHost::new();
        host.set_window_open(true);
        host.set_close_resistance(3);

        let manager = SessionManager::new(&host);
        assert_eq!(manager.force_close(), 3);
        assert!(!host.is_running());

        // A second sweep has nothing to do.
        assert_eq!(manager.force_close(), 0);
    }

    #[test]
    fn with_session_commits_on_success() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("sample.accdb");
        let host = FakeHost::new();
        host.seed_database(&db, FakeDatabase::default()).unwrap();

        let manager = SessionManager::new(&host);
        let names = manager
            .with_session(Some(&db), true, SaveMode::Yes, |session| {
                session.object_names(ObjectKind::Form)
            })
            .unwrap();

        assert!(names.is_empty());
        assert_eq!(host.live_sessions(), 0);
        assert_eq!(host.quit_modes(), vec![SaveMode::Yes]);
    }

    #[test]
    fn with_session_discards_changes_on_failure() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("sample.accdb");
        let host = FakeHost::new();
        host.seed_database(&db, FakeDatabase::default()).unwrap();

        let manager = SessionManager::new(&host);
        let err = manager
            .with_session(Some(&db), true, SaveMode::Yes, |session| {
                session.delete_object(&ObjectDescriptor::new(ObjectKind::Form, "missing"))
            })
            .unwrap_err();

        assert!(matches!(err, HostError::ObjectOperation { .. }));
        assert_eq!(host.live_sessions(), 0);
        assert_eq!(host.quit_modes(), vec![SaveMode::No]);
    }

    #[test]
    fn second_open_reports_a_busy_session() {
        let host = FakeHost::new();
        let first = host.open(None, false).unwrap();
        let err = host.open(None, false).unwrap_err();
        assert!(matches!(err, HostError::SessionBusy));
        first.quit(SaveMode::No).unwrap();
        assert_eq!(host.live_sessions(), 0);
    }

    #[test]
    fn reference_paths_compare_case_insensitively() {
        let reference = Reference::new(r"C:\Windows\System32\stdole2.tlb");
        assert!(reference.matches_path(r"c:\windows\system32\STDOLE2.TLB"));
        assert!(!reference.matches_path(r"c:\windows\system32\other.tlb"));
    }
}
