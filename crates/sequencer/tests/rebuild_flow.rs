//! End-to-end pipeline runs against the fake host and a scripted helper.
//! 以假主機與腳本化輔助工具執行完整流程的端對端測試。

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use accrebuild_helper::fetch::{FetchError, ScriptFetcher};
use accrebuild_helper::invoke::{CommandOutput, CommandSpec, InvokeError, Invoker};
use accrebuild_helper::{HelperError, LICENSE_FILE, SCRIPT_FILE};
use accrebuild_host::fake::{FakeDatabase, FakeHost};
use accrebuild_host::{ObjectKind, Reference};
use accrebuild_objects::QueryImport;
use accrebuild_sequencer::{Rebuild, RebuildError, RebuildOptions, Workspace};
use tempfile::tempdir;

const QUERY_PARAM_LINE: &str = "param.incQuery = false;";

/// Stand-in for `cscript vbac.wsf ...`: materializes a decomposed source
/// tree on `decombine` and stray definition files on `combine`.
/// `cscript vbac.wsf ...` 的替身：`decombine` 時產生分解後的原始檔樹，
/// `combine` 時產生殘留的定義檔。
struct FakeVbac {
    workspace: Workspace,
    working: PathBuf,
    host: FakeHost,
    queries: Vec<&'static str>,
    blank_db: Option<FakeDatabase>,
    stray_files: Vec<&'static str>,
    calls: RefCell<Vec<String>>,
}

impl FakeVbac {
    fn new(workspace: Workspace, working: PathBuf, host: FakeHost) -> Self {
        Self {
            workspace,
            working,
            host,
            queries: Vec::new(),
            blank_db: None,
            stray_files: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Invoker for FakeVbac {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InvokeError> {
        let action = spec.args.get(1).cloned().unwrap_or_default();
        self.calls.borrow_mut().push(action.clone());
        match action.as_str() {
            "decombine" => {
                let tree = self.workspace.source_tree_for(&self.working);
                fs::create_dir_all(&tree).unwrap();
                for name in &self.queries {
                    fs::write(tree.join(format!("{name}.qry")), "SELECT 1;").unwrap();
                }
                if let Some(blank) = &self.blank_db {
                    self.host
                        .seed_database(&self.working, blank.clone())
                        .unwrap();
                }
            }
            "combine" => {
                for name in &self.stray_files {
                    fs::write(self.workspace.bin_dir().join(name), "").unwrap();
                }
            }
            _ => panic!("unexpected helper action '{action}'"),
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

struct NoFetch;

impl ScriptFetcher for NoFetch {
    fn fetch(&self, url: &str, _dest: &Path) -> Result<(), FetchError> {
        panic!("unexpected fetch of {url}");
    }
}

struct PlantedFetcher;

impl ScriptFetcher for PlantedFetcher {
    fn fetch(&self, _url: &str, dest: &Path) -> Result<(), FetchError> {
        fs::write(dest, "// planted helper\n").unwrap();
        Ok(())
    }
}

fn write_script(root: &Path) {
    fs::write(
        root.join(SCRIPT_FILE),
        format!("var param = {{}};\n{QUERY_PARAM_LINE}\nrun();\n"),
    )
    .unwrap();
}

fn options(input: &Path, root: &Path) -> RebuildOptions {
    RebuildOptions {
        input_file: input.to_path_buf(),
        create_new_db: false,
        download_script: false,
        export_table_data: false,
        working_root: root.to_path_buf(),
    }
}

fn setup(dir: &Path) -> (FakeHost, PathBuf, PathBuf) {
    let root = dir.join("ariawase");
    fs::create_dir_all(&root).unwrap();
    write_script(&root);

    let data = dir.join("data");
    fs::create_dir_all(&data).unwrap();
    let input = data.join("orders.accdb");
    let host = FakeHost::new();
    host.seed_database(
        &input,
        FakeDatabase {
            tables: vec!["Customers".into(), "Orders".into(), "Items".into()],
            queries: vec!["qryOld".into(), "qryStale".into()],
            forms: vec!["frmMain".into()],
            ..FakeDatabase::default()
        },
    )
    .unwrap();
    (host, input, root)
}

#[test]
fn rebuild_from_a_working_copy_retains_tables_and_reimports_queries() {
    let dir = tempdir().unwrap();
    let (host, input, root) = setup(dir.path());
    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);

    let mut invoker = FakeVbac::new(workspace.clone(), working.clone(), host.clone());
    invoker.queries = vec!["qryTotals", "qryOpen"];
    invoker.stray_files = vec!["orders.def"];

    let report = Rebuild::new(&host, &invoker, &NoFetch, options(&input, &root))
        .run()
        .unwrap();

    let db = host.database(&working).unwrap();
    assert_eq!(db.tables.len(), 3, "tables carried forward");
    assert!(db.forms.is_empty(), "old forms replaced");
    assert_eq!(db.queries, vec!["qryOpen", "qryTotals"]);
    assert_eq!(
        report.queries,
        QueryImport::Imported(vec!["qryOpen".into(), "qryTotals".into()])
    );
    assert!(report.stripped.iter().all(|batch| batch.is_clean()));
    assert!(report.warnings.is_empty());

    // The working directory holds exactly the rebuilt file.
    assert!(working.is_file());
    assert_eq!(fs::read_dir(workspace.bin_dir()).unwrap().count(), 1);
    assert_eq!(report.removed_files.len(), 1);

    // Helper ran decompose before recombine, and the patch landed once.
    assert_eq!(invoker.calls.borrow().as_slice(), ["decombine", "combine"]);
    let script = fs::read_to_string(root.join(SCRIPT_FILE)).unwrap();
    assert!(script.contains(&format!("//{QUERY_PARAM_LINE}")));

    // The original input is never modified.
    let original = host.database(&input).unwrap();
    assert_eq!(original.forms, vec!["frmMain"]);
    assert_eq!(host.live_sessions(), 0);
}

#[test]
fn rebuild_into_a_blank_database_synchronizes_references() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ariawase");
    fs::create_dir_all(&root).unwrap();
    write_script(&root);

    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    let input = data.join("orders.accdb");
    let host = FakeHost::new();
    host.seed_database(
        &input,
        FakeDatabase {
            references: vec!["libA.dll".into(), "libB.dll".into()],
            forms: vec!["frmMain".into()],
            ..FakeDatabase::default()
        },
    )
    .unwrap();

    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);
    let mut invoker = FakeVbac::new(workspace, working.clone(), host.clone());
    invoker.blank_db = Some(FakeDatabase {
        references: vec!["libA.dll".into()],
        ..FakeDatabase::default()
    });

    let mut opts = options(&input, &root);
    opts.create_new_db = true;
    let report = Rebuild::new(&host, &invoker, &NoFetch, opts).run().unwrap();

    assert_eq!(report.references_added, vec![Reference::new("libB.dll")]);
    let db = host.database(&working).unwrap();
    assert_eq!(db.references, vec!["libA.dll", "libB.dll"], "union, no duplicates");

    // Blank-target runs skip the strip and cleanup stages...
    assert!(report.stripped.is_empty());
    assert!(report.removed_files.is_empty());
    // ...and a source tree without queries is only a warning.
    assert_eq!(report.queries, QueryImport::NoDefinitionsFound);
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn damaged_objects_surface_as_warnings_not_failures() {
    let dir = tempdir().unwrap();
    let (host, input, root) = setup(dir.path());
    host.fail_delete(ObjectKind::Form, "frmMain");

    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);
    let mut invoker = FakeVbac::new(workspace, working.clone(), host.clone());
    invoker.queries = vec!["qryTotals"];

    let report = Rebuild::new(&host, &invoker, &NoFetch, options(&input, &root))
        .run()
        .unwrap();

    assert!(report.warnings.iter().any(|w| w.contains("form")));
    let db = host.database(&working).unwrap();
    assert_eq!(db.forms, vec!["frmMain"], "damaged object survives");
    assert!(db.queries.contains(&"qryTotals".to_string()), "run continued");
}

#[test]
fn exporting_table_data_writes_delimited_files() {
    let dir = tempdir().unwrap();
    let (host, input, root) = setup(dir.path());
    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);
    let mut invoker = FakeVbac::new(workspace.clone(), working, host.clone());
    invoker.queries = vec!["qryTotals"];

    let mut opts = options(&input, &root);
    opts.export_table_data = true;
    let report = Rebuild::new(&host, &invoker, &NoFetch, opts).run().unwrap();

    let export = report.table_export.expect("export report present");
    assert_eq!(export.items.len(), 3);
    assert!(workspace
        .src_dir()
        .join("TableData/Table_Customers.txt")
        .is_file());
}

#[test]
fn missing_input_file_is_fatal() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ariawase");
    fs::create_dir_all(&root).unwrap();
    write_script(&root);

    let host = FakeHost::new();
    let workspace = Workspace::new(&root);
    let invoker = FakeVbac::new(workspace, root.join("bin/none.accdb"), host.clone());
    let opts = options(&dir.path().join("missing.accdb"), &root);

    let err = Rebuild::new(&host, &invoker, &NoFetch, opts).run().unwrap_err();
    assert!(matches!(err, RebuildError::InputNotFound(_)));
}

#[test]
fn missing_helper_script_is_fatal_without_download() {
    let dir = tempdir().unwrap();
    let (host, input, root) = setup(dir.path());
    fs::remove_file(root.join(SCRIPT_FILE)).unwrap();

    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);
    let invoker = FakeVbac::new(workspace, working, host.clone());

    let err = Rebuild::new(&host, &invoker, &NoFetch, options(&input, &root))
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        RebuildError::Helper(HelperError::ScriptMissing(_))
    ));
}

#[test]
fn download_flag_fetches_script_and_license() {
    let dir = tempdir().unwrap();
    let (host, input, root) = setup(dir.path());
    fs::remove_file(root.join(SCRIPT_FILE)).unwrap();

    let workspace = Workspace::new(&root);
    let working = workspace.working_file(&input);
    let mut invoker = FakeVbac::new(workspace, working, host.clone());
    invoker.queries = vec!["qryTotals"];

    let mut opts = options(&input, &root);
    opts.download_script = true;
    Rebuild::new(&host, &invoker, &PlantedFetcher, opts)
        .run()
        .unwrap();

    assert!(root.join(SCRIPT_FILE).is_file());
    assert!(root.join(LICENSE_FILE).is_file());
}
