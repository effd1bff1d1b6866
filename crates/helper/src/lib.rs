//! Kit around the external decompose/recombine helper script (`vbac.wsf`).
//! 外部分解／重組輔助腳本（`vbac.wsf`）的工具組。
//!
//! The script converts forms, reports, modules and (once patched) queries
//! between the database's binary project and plain text source files. This
//! crate keeps the script available, patches its configuration, and wraps
//! the two subprocess calls the rebuild pipeline makes.
//! 該腳本負責在資料庫的二進位專案與純文字原始檔之間轉換表單、報表、
//! 模組與（修補後的）查詢。本 crate 負責確保腳本可用、修補其設定，
//! 並包裝重建流程所需的兩個子程序呼叫。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod fetch;
pub mod invoke;

use fetch::{FetchError, ScriptFetcher};
use invoke::{CommandSpec, InvokeError, Invoker};

/// Helper script filename, expected in the working root.
/// 輔助腳本檔名，應位於工作根目錄。
pub const SCRIPT_FILE: &str = "vbac.wsf";

/// License text fetched alongside the script.
/// 隨腳本一併下載的授權文字。
pub const LICENSE_FILE: &str = "LICENSE.txt";

/// Remote location the script is fetched from when permitted.
/// 允許下載時，腳本的遠端來源位置。
pub const RELEASE_BASE_URL: &str = "https://raw.githubusercontent.com/vbaidiot/ariawase/master/";

/// Configuration line that disables query export in the stock script.
/// 原版腳本中停用查詢匯出的設定行。
const QUERY_PARAM: &str = "param.incQuery = false;";

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("helper script '{0}' is not available; download it manually or allow fetching")]
    /// 找不到輔助腳本，請手動下載或允許自動取得。
    ScriptMissing(PathBuf),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("I/O error on '{0}'")]
    /// 檔案系統操作失敗。
    Io(PathBuf, #[source] io::Error),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("helper '{action}' exited with {exit_code:?}: {stderr}")]
    /// 輔助腳本以非零狀態結束。
    CommandFailed {
        action: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Handle on the helper script inside one working root. The script always
/// runs with that root as its working directory; it resolves the `bin/`
/// and `src/` trees relative to itself.
/// 單一工作根目錄中輔助腳本的握把。腳本一律以該根目錄為工作目錄執行，
/// 並以自身位置解析 `bin/` 與 `src/` 目錄。
pub struct HelperKit {
    root: PathBuf,
}

impl HelperKit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join(SCRIPT_FILE)
    }

    /// Makes sure the script exists, fetching it (plus its license text)
    /// when `allow_download` permits. Missing and not downloadable is
    /// fatal for the pipeline.
    /// 確認腳本存在；`allow_download` 允許時會連同授權文字一併下載。
    /// 腳本缺失且不可下載時對流程而言是致命錯誤。
    pub fn ensure_available(
        &self,
        allow_download: bool,
        fetcher: &dyn ScriptFetcher,
    ) -> Result<(), HelperError> {
        let script = self.script_path();
        if script.is_file() {
            return Ok(());
        }
        if !allow_download {
            return Err(HelperError::ScriptMissing(script));
        }
        log::info!("helper script missing, fetching from {RELEASE_BASE_URL}");
        fetcher.fetch(&format!("{RELEASE_BASE_URL}{SCRIPT_FILE}"), &script)?;
        fetcher.fetch(
            &format!("{RELEASE_BASE_URL}{LICENSE_FILE}"),
            &self.root.join(LICENSE_FILE),
        )?;
        Ok(())
    }

    /// Comments out the script's `incQuery = false` line so queries are
    /// exported too. Idempotent: the commented marker is checked before
    /// patching, so a second application changes nothing. Returns whether
    /// the file was modified.
    /// 將腳本中 `incQuery = false` 設定行註解掉，使查詢也被匯出。
    /// 具冪等性：修補前會先檢查註解標記，重複套用不會再改動檔案。
    /// 回傳檔案是否被修改。
    pub fn enable_query_export(&self) -> Result<bool, HelperError> {
        let script = self.script_path();
        let text =
            fs::read_to_string(&script).map_err(|err| HelperError::Io(script.clone(), err))?;
        if text.contains(&format!("//{QUERY_PARAM}")) || !text.contains(QUERY_PARAM) {
            return Ok(false);
        }
        let patched = text.replace(QUERY_PARAM, &format!("//{QUERY_PARAM}"));
        fs::write(&script, patched).map_err(|err| HelperError::Io(script, err))?;
        log::debug!("enabled query export in {SCRIPT_FILE}");
        Ok(true)
    }

    /// Decomposes the database objects under `source_dir` into text files,
    /// queries and binary artifacts included.
    /// 將 `source_dir` 下資料庫的物件分解為文字檔，包含查詢與二進位資產。
    pub fn decompose(&self, invoker: &dyn Invoker, source_dir: &Path) -> Result<(), HelperError> {
        let spec = CommandSpec::new("cscript")
            .with_args([
                SCRIPT_FILE.to_string(),
                "decombine".to_string(),
                "/incQuery:true".to_string(),
                format!("/binary:{}", source_dir.display()),
            ])
            .with_working_dir(&self.root);
        self.run_checked(invoker, "decombine", &spec)
    }

    /// Imports the decomposed forms/reports/modules text back into the
    /// working database's project. Queries are imported separately by the
    /// pipeline itself.
    /// 將分解後的表單／報表／模組文字匯回工作資料庫的專案。
    /// 查詢由流程自身另行匯入。
    pub fn recombine(&self, invoker: &dyn Invoker) -> Result<(), HelperError> {
        let spec = CommandSpec::new("cscript")
            .with_args([SCRIPT_FILE, "combine"])
            .with_working_dir(&self.root);
        self.run_checked(invoker, "combine", &spec)
    }

    fn run_checked(
        &self,
        invoker: &dyn Invoker,
        action: &'static str,
        spec: &CommandSpec,
    ) -> Result<(), HelperError> {
        log::info!("helper {action} in {}", self.root.display());
        let output = invoker.run(spec)?;
        if output.success() {
            Ok(())
        } else {
            Err(HelperError::CommandFailed {
                action,
                exit_code: output.exit_code,
                stderr: output.stderr_text(),
            })
        }
    }
}
