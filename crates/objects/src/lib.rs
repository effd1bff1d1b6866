//! Object repository accessor and delimited-text bridge.
//! 物件儲存庫存取與分隔文字橋接。
//!
//! Covers the bulk operations performed against an open database: stripping
//! every non-table object, exporting table data as delimited text, and
//! re-importing query definitions from decomposed source files. All batch
//! operations are best-effort per object and report per-item outcomes
//! instead of aborting on the first damaged entry.
//! 涵蓋針對已開啟資料庫的批次操作：移除所有非資料表物件、將資料表內容匯出為
//! 分隔文字、以及自分解後的原始檔重新匯入查詢定義。所有批次操作對單一物件
//! 皆為盡力而為，回報逐項結果而非在第一個損壞項目就中止。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use accrebuild_host::{
    HostDriver, HostError, ObjectDescriptor, ObjectKind, SaveMode, SessionManager,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name prefix marking system tables that must never be touched.
/// 系統資料表的名稱前綴，這些資料表絕不可被碰觸。
pub const SYSTEM_TABLE_PREFIX: &str = "MSys";

/// Subdirectory receiving exported table data.
/// 存放匯出資料表內容的子目錄。
pub const TABLE_DATA_DIR: &str = "TableData";

/// Filename prefix for exported table data.
/// 匯出資料表檔案的檔名前綴。
pub const TABLE_DATA_PREFIX: &str = "Table_";

/// Extension of decomposed query definition files (matched without case).
/// 分解後查詢定義檔的副檔名（比對時不分大小寫）。
pub const QUERY_EXTENSION: &str = "qry";

/// Object kinds removed by the strip step, in deletion order. Tables carry
/// the data being preserved; macros are owned by the decompose helper.
/// 移除步驟所刪除的物件種類及其順序。資料表承載要保留的資料；
/// 巨集則由分解工具負責。
pub const STRIP_KINDS: [ObjectKind; 4] = [
    ObjectKind::Form,
    ObjectKind::Report,
    ObjectKind::Module,
    ObjectKind::Query,
];

/// Errors from the accessor that are fatal for the whole batch, as opposed
/// to the per-item failures recorded inside a [`BatchReport`].
/// 對整個批次而言屬致命的錯誤；單項失敗則記錄於 [`BatchReport`] 中。
#[derive(Debug, Error)]
pub enum ObjectsError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("I/O error on '{0}'")]
    /// 檔案系統操作失敗。
    Io(PathBuf, #[source] io::Error),
}

/// Outcome of one object inside a batch operation.
/// 批次操作中單一物件的結果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Succeeded,
    Failed(String),
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub name: String,
    pub status: ItemStatus,
}

/// Per-item record of one batch operation over objects of a single kind.
/// 針對單一種類物件之批次操作的逐項紀錄。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub kind: ObjectKind,
    pub items: Vec<BatchOutcome>,
}

impl BatchReport {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    fn record(&mut self, name: &str, result: Result<(), HostError>) {
        let status = match result {
            Ok(()) => ItemStatus::Succeeded,
            Err(err) => ItemStatus::Failed(err.to_string()),
        };
        self.items.push(BatchOutcome {
            name: name.to_string(),
            status,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Result of importing decomposed query definitions.
/// 匯入分解後查詢定義的結果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryImport {
    /// Queries loaded, in import order.
    /// 已載入的查詢，依匯入順序排列。
    Imported(Vec<String>),
    /// The source directory held no query files. A database legitimately
    /// may have no queries, so this is a warning, not a failure.
    /// 來源目錄沒有任何查詢檔。資料庫本來就可能沒有查詢，
    /// 故此為警告而非失敗。
    NoDefinitionsFound,
}

/// Deletes every form, report, module and query from `database`, keeping
/// all tables. Each kind's name list is snapshotted first and traversed in
/// reverse, because the host's collection indices shift when earlier
/// elements are removed mid-iteration. A failed close or delete on one
/// object never aborts the batch.
/// 刪除 `database` 中所有表單、報表、模組與查詢，保留全部資料表。
/// 每種物件先取得名稱快照並反向走訪，因為主機的集合索引會在走訪途中
/// 因刪除前面元素而位移。單一物件的關閉或刪除失敗不會中止整個批次。
pub fn strip_objects(
    driver: &dyn HostDriver,
    database: &Path,
) -> Result<Vec<BatchReport>, ObjectsError> {
    let manager = SessionManager::new(driver);
    let reports = manager.with_session(Some(database), true, SaveMode::Yes, |session| {
        let mut reports = Vec::with_capacity(STRIP_KINDS.len());
        for kind in STRIP_KINDS {
            let names = session.object_names(kind)?;
            let mut report = BatchReport::new(kind);
            for name in names.iter().rev() {
                let object = ObjectDescriptor::new(kind, name.clone());
                // The object may not be open; that failure is ignorable.
                if let Err(err) = session.close_object(&object) {
                    log::debug!("close before delete failed for {object}: {err}");
                }
                log::info!("deleting {object}");
                let result = session.delete_object(&object);
                if let Err(err) = &result {
                    log::warn!("could not delete {object}: {err}");
                }
                report.record(name, result);
            }
            reports.push(report);
        }
        Ok(reports)
    })?;
    Ok(reports)
}

/// Exports every user table of `database` as delimited text with a leading
/// field-name row, to `export_root/TableData/Table_<name>.txt`. System
/// tables (prefix `MSys`) are skipped; one table's failure does not block
/// the others.
/// 將 `database` 中所有使用者資料表匯出為含欄位名稱列的分隔文字，
/// 路徑為 `export_root/TableData/Table_<name>.txt`。系統資料表
/// （前綴 `MSys`）會被略過；單一資料表的失敗不會阻擋其他資料表。
pub fn export_tables(
    driver: &dyn HostDriver,
    database: &Path,
    export_root: &Path,
) -> Result<BatchReport, ObjectsError> {
    let data_dir = export_root.join(TABLE_DATA_DIR);
    fs::create_dir_all(&data_dir).map_err(|err| ObjectsError::Io(data_dir.clone(), err))?;

    let manager = SessionManager::new(driver);
    let report = manager.with_session(Some(database), true, SaveMode::Yes, |session| {
        let mut report = BatchReport::new(ObjectKind::Table);
        for name in session.object_names(ObjectKind::Table)? {
            if name.starts_with(SYSTEM_TABLE_PREFIX) {
                continue;
            }
            let dest = data_dir.join(format!("{TABLE_DATA_PREFIX}{name}.txt"));
            log::info!("exporting table '{name}' to {}", dest.display());
            let result = session.export_delimited(&name, &dest, true);
            if let Err(err) = &result {
                log::warn!("could not export table '{name}': {err}");
            }
            report.record(&name, result);
        }
        Ok(report)
    })?;
    Ok(report)
}

/// Loads every `*.qry` definition in `source_dir` (flat scan, extension
/// matched case-insensitively) into `database`, deriving each query's name
/// from the filename stem. Import order follows the filename sort so runs
/// are deterministic across platforms.
/// 將 `source_dir` 中所有 `*.qry` 定義載入 `database`（單層掃描，
/// 副檔名不分大小寫），查詢名稱取自檔名主幹。依檔名排序匯入，
/// 使執行結果在不同平台上一致。
pub fn import_queries(
    driver: &dyn HostDriver,
    database: &Path,
    source_dir: &Path,
) -> Result<QueryImport, ObjectsError> {
    let mut files = query_files(source_dir)?;
    if files.is_empty() {
        log::warn!(
            "no query definitions found under {}",
            source_dir.display()
        );
        return Ok(QueryImport::NoDefinitionsFound);
    }
    files.sort();

    let manager = SessionManager::new(driver);
    let imported = manager.with_session(Some(database), true, SaveMode::Yes, |session| {
        let mut imported = Vec::with_capacity(files.len());
        for file in &files {
            let Some(name) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            log::info!("importing query '{name}'");
            session.load_query(name, file)?;
            imported.push(name.to_string());
        }
        Ok(imported)
    })?;
    Ok(QueryImport::Imported(imported))
}

fn query_files(source_dir: &Path) -> Result<Vec<PathBuf>, ObjectsError> {
    let entries =
        fs::read_dir(source_dir).map_err(|err| ObjectsError::Io(source_dir.to_path_buf(), err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ObjectsError::Io(source_dir.to_path_buf(), err))?;
        let path = entry.path();
        let is_query = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(QUERY_EXTENSION))
            .unwrap_or(false);
        if path.is_file() && is_query {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrebuild_host::fake::{FakeDatabase, FakeHost};
    use tempfile::tempdir;

    fn seeded_host(dir: &Path) -> (FakeHost, PathBuf) {
        let db_path = dir.join("sample.accdb");
        let host = FakeHost::new();
        host.seed_database(
            &db_path,
            FakeDatabase {
                tables: vec![
                    "MSysObjects".into(),
                    "Customers".into(),
                    "Orders".into(),
                ],
                queries: vec!["qryTotals".into(), "qryOpen".into()],
                forms: vec!["frmMain".into(), "frmDetail".into()],
                reports: vec!["rptSummary".into()],
                modules: vec!["basUtil".into()],
                ..FakeDatabase::default()
            },
        )
        .unwrap();
        (host, db_path)
    }

    #[test]
    fn strip_removes_every_non_table_object() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());

        let reports = strip_objects(&host, &db_path).unwrap();
        assert!(reports.iter().all(BatchReport::is_clean));

        let db = host.database(&db_path).unwrap();
        assert!(db.forms.is_empty());
        assert!(db.reports.is_empty());
        assert!(db.modules.is_empty());
        assert!(db.queries.is_empty());
        assert_eq!(db.tables.len(), 3, "tables are never deleted / 資料表不可被刪除");
    }

    #[test]
    fn strip_tolerates_a_damaged_object() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());
        host.fail_delete(ObjectKind::Form, "frmMain");

        let reports = strip_objects(&host, &db_path).unwrap();
        let forms = reports
            .iter()
            .find(|report| report.kind == ObjectKind::Form)
            .unwrap();
        assert_eq!(forms.failed(), 1);
        assert_eq!(forms.succeeded(), 1);

        let db = host.database(&db_path).unwrap();
        assert_eq!(db.forms, vec!["frmMain"], "only the damaged form remains");
        assert!(db.queries.is_empty(), "later batches still run / 後續批次仍須執行");
    }

    #[test]
    fn export_skips_system_tables() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());
        let export_root = dir.path().join("src");

        let report = export_tables(&host, &db_path, &export_root).unwrap();
        assert_eq!(report.items.len(), 2);
        assert!(report.is_clean());

        let data_dir = export_root.join(TABLE_DATA_DIR);
        assert!(data_dir.join("Table_Customers.txt").is_file());
        assert!(data_dir.join("Table_Orders.txt").is_file());
        assert!(!data_dir.join("Table_MSysObjects.txt").exists());

        let contents = fs::read_to_string(data_dir.join("Table_Customers.txt")).unwrap();
        assert!(
            contents.lines().next().unwrap().contains(','),
            "first row carries field names / 首列需為欄位名稱"
        );
    }

    #[test]
    fn export_records_per_table_failures() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());
        host.fail_export("Customers");

        let report = export_tables(&host, &db_path, &dir.path().join("src")).unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
    }

    #[test]
    fn import_loads_queries_by_filename_stem() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());
        // Start from a stripped database.
        strip_objects(&host, &db_path).unwrap();

        let source = dir.path().join("decomposed");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("qryTotals.qry"), "SELECT 1;").unwrap();
        fs::write(source.join("qryOpen.QRY"), "SELECT 2;").unwrap();
        fs::write(source.join("frmMain.frm"), "not a query").unwrap();

        let outcome = import_queries(&host, &db_path, &source).unwrap();
        assert_eq!(
            outcome,
            QueryImport::Imported(vec!["qryOpen".into(), "qryTotals".into()])
        );
        let db = host.database(&db_path).unwrap();
        assert_eq!(db.queries.len(), 2);
    }

    #[test]
    fn import_with_no_query_files_is_a_warning() {
        let dir = tempdir().unwrap();
        let (host, db_path) = seeded_host(dir.path());
        let source = dir.path().join("decomposed");
        fs::create_dir_all(&source).unwrap();

        let outcome = import_queries(&host, &db_path, &source).unwrap();
        assert_eq!(outcome, QueryImport::NoDefinitionsFound);
        assert_eq!(host.live_sessions(), 0, "no session is opened / 不應開啟工作階段");
    }
}
