//! The rebuild state machine.
//! 重建流程的狀態機。
//!
//! A fixed, strictly sequential pipeline over a working copy of the
//! database. Each stage is gated on the success of the previous one;
//! per-object failures inside batch stages are collected into the report
//! instead of aborting the run. There is no rollback — an interrupted run
//! leaves the working directories for the next run's prepare stage.
//! 對資料庫工作副本執行的固定、嚴格循序流程。每個階段以前一階段成功
//! 為前提；批次階段中的單一物件失敗會收進報告而非中止整次執行。
//! 沒有復原機制——被中斷的執行留下的工作目錄由下次執行的準備階段處理。

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use accrebuild_compact::{compact_and_repair, compact_cycles, CompactError, REPAIR_PASSES};
use accrebuild_helper::fetch::ScriptFetcher;
use accrebuild_helper::invoke::Invoker;
use accrebuild_helper::{HelperError, HelperKit};
use accrebuild_host::{HostDriver, HostError, Reference, SessionManager};
use accrebuild_objects::{
    export_tables, import_queries, strip_objects, BatchReport, ObjectsError, QueryImport,
};
use accrebuild_refsync::{add_missing, list_references};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workdir::{WorkdirError, Workspace};

/// Caller-supplied knobs for one rebuild run.
/// 單次重建執行的呼叫端設定。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildOptions {
    /// Database file to rebuild.
    /// 要重建的資料庫檔案。
    pub input_file: PathBuf,
    /// Build into a blank database the helper creates, instead of a copy
    /// of the input.
    /// 重建至輔助腳本建立的空白資料庫，而非輸入檔的副本。
    #[serde(default)]
    pub create_new_db: bool,
    /// Fetch the helper script when it is missing.
    /// 輔助腳本缺失時自動下載。
    #[serde(default)]
    pub download_script: bool,
    /// Also export table contents as delimited text into the source tree.
    /// 另將資料表內容匯出為分隔文字，放入原始檔樹。
    #[serde(default)]
    pub export_table_data: bool,
    /// Root of the working directory layout.
    /// 工作目錄配置的根。
    pub working_root: PathBuf,
}

/// Stages of the pipeline, in execution order.
/// 流程的各個階段，依執行順序排列。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    AcquireHelper,
    ExportTableData,
    StageWorkingCopy,
    Decompose,
    ImportQueries,
    Recombine,
    SyncReferences,
    CleanWorkingDir,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Prepare => "prepare",
            Stage::AcquireHelper => "acquire helper",
            Stage::ExportTableData => "export table data",
            Stage::StageWorkingCopy => "stage working copy",
            Stage::Decompose => "decompose",
            Stage::ImportQueries => "import queries",
            Stage::Recombine => "recombine",
            Stage::SyncReferences => "synchronize references",
            Stage::CleanWorkingDir => "clean working directory",
            Stage::Finalize => "finalize",
        };
        f.write_str(label)
    }
}

/// What one completed run did, per stage.
/// 一次完成的執行在各階段所做的事。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub working_file: PathBuf,
    pub stripped: Vec<BatchReport>,
    pub table_export: Option<BatchReport>,
    pub queries: QueryImport,
    pub references_added: Vec<Reference>,
    pub removed_files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("input file does not exist: '{0}'")]
    /// 輸入檔不存在。
    InputNotFound(PathBuf),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Objects(#[from] ObjectsError),
    #[error(transparent)]
    Compact(#[from] CompactError),
    #[error(transparent)]
    Helper(#[from] HelperError),
    #[error(transparent)]
    Workdir(#[from] WorkdirError),
    #[error("could not copy '{from}' to '{to}'")]
    /// 無法複製檔案。
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One rebuild run over a driver, an invoker and a fetcher.
/// 以驅動程式、執行器與下載器組成的一次重建執行。
pub struct Rebuild<'a> {
    driver: &'a dyn HostDriver,
    invoker: &'a dyn Invoker,
    fetcher: &'a dyn ScriptFetcher,
    options: RebuildOptions,
}

impl<'a> Rebuild<'a> {
    pub fn new(
        driver: &'a dyn HostDriver,
        invoker: &'a dyn Invoker,
        fetcher: &'a dyn ScriptFetcher,
        options: RebuildOptions,
    ) -> Self {
        Self {
            driver,
            invoker,
            fetcher,
            options,
        }
    }

    fn enter(stage: Stage) {
        log::info!("stage: {stage}");
    }

    /// Walks the whole pipeline. Fatal errors abort the run; batch-level
    /// per-object failures and the no-queries case end up in the report.
    /// 走完整條流程。致命錯誤會中止執行；批次中的單一物件失敗與
    /// 「沒有查詢」的情形則記入報告。
    pub fn run(&self) -> Result<RebuildReport, RebuildError> {
        let input = self.options.input_file.as_path();
        let workspace = Workspace::new(&self.options.working_root);
        let manager = SessionManager::new(self.driver);
        let mut warnings = Vec::new();

        Self::enter(Stage::Prepare);
        manager.force_close();
        if !input.is_file() {
            return Err(RebuildError::InputNotFound(input.to_path_buf()));
        }
        workspace.prepare()?;
        let working = workspace.working_file(input);

        Self::enter(Stage::AcquireHelper);
        let kit = HelperKit::new(workspace.root());
        kit.ensure_available(self.options.download_script, self.fetcher)?;

        let mut table_export = None;
        if self.options.export_table_data {
            Self::enter(Stage::ExportTableData);
            let report = export_tables(self.driver, input, &workspace.src_dir())?;
            if !report.is_clean() {
                warnings.push(format!("{} table(s) failed to export", report.failed()));
            }
            table_export = Some(report);
        }

        let mut stripped = Vec::new();
        if !self.options.create_new_db {
            Self::enter(Stage::StageWorkingCopy);
            fs::copy(input, &working).map_err(|source| RebuildError::Copy {
                from: input.to_path_buf(),
                to: working.clone(),
                source,
            })?;
            compact_and_repair(self.driver, &working)?;
            stripped = strip_objects(self.driver, &working)?;
            for report in &stripped {
                if !report.is_clean() {
                    warnings.push(format!(
                        "{} {}(s) could not be deleted",
                        report.failed(),
                        report.kind
                    ));
                }
            }
            compact_cycles(self.driver, &working, REPAIR_PASSES)?;
        }

        Self::enter(Stage::Decompose);
        kit.enable_query_export()?;
        let original_dir = input.parent().unwrap_or_else(|| Path::new("."));
        kit.decompose(self.invoker, original_dir)?;

        Self::enter(Stage::ImportQueries);
        let queries = import_queries(self.driver, &working, &workspace.source_tree_for(&working))?;
        if queries == QueryImport::NoDefinitionsFound {
            warnings.push("no query definitions found in the decomposed source".into());
        }

        Self::enter(Stage::Recombine);
        kit.recombine(self.invoker)?;

        let mut references_added = Vec::new();
        let mut removed_files = Vec::new();
        if self.options.create_new_db {
            Self::enter(Stage::SyncReferences);
            let candidates = list_references(self.driver, input)?;
            references_added = add_missing(self.driver, &working, &candidates)?;
        } else {
            Self::enter(Stage::CleanWorkingDir);
            removed_files = workspace.clean_bin_except(&working)?;
        }

        Self::enter(Stage::Finalize);
        compact_cycles(self.driver, &working, REPAIR_PASSES)?;
        log::info!("rebuild completed: {}", working.display());

        Ok(RebuildReport {
            working_file: working,
            stripped,
            table_export,
            queries,
            references_added,
            removed_files,
            warnings,
        })
    }
}
