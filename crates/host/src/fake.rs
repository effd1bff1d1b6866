//! In-memory stand-in for the automation host, shared by unit and
//! integration tests across the workspace.
//! 工作區內各單元與整合測試共用的記憶體版自動化主機替身。
//!
//! Seeded databases are backed by real files carrying a marker line, so a
//! plain `fs::copy` of a seeded file behaves like a copied database: the
//! first session opened on the copy gets its own independent object lists.
//! 以標記行寫入實際檔案來代表資料庫，因此對已播種檔案做 `fs::copy`
//! 的行為就如同複製資料庫：首次開啟副本的工作階段會取得獨立的物件清單。

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    HostDriver, HostError, HostSession, ObjectDescriptor, ObjectKind, Reference, SaveMode,
};

/// First-line marker identifying a fake database file.
/// 辨識假資料庫檔案的首行標記。
pub const MARKER_PREFIX: &str = "fakedb:";

/// Object and reference content of one fake database.
/// 單一假資料庫的物件與參考內容。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeDatabase {
    pub tables: Vec<String>,
    pub queries: Vec<String>,
    pub forms: Vec<String>,
    pub reports: Vec<String>,
    pub macros: Vec<String>,
    pub modules: Vec<String>,
    pub references: Vec<String>,
}

impl FakeDatabase {
    pub fn objects(&self, kind: ObjectKind) -> &Vec<String> {
        match kind {
            ObjectKind::Table => &self.tables,
            ObjectKind::Query => &self.queries,
            ObjectKind::Form => &self.forms,
            ObjectKind::Report => &self.reports,
            ObjectKind::Macro => &self.macros,
            ObjectKind::Module => &self.modules,
        }
    }

    fn objects_mut(&mut self, kind: ObjectKind) -> &mut Vec<String> {
        match kind {
            ObjectKind::Table => &mut self.tables,
            ObjectKind::Query => &mut self.queries,
            ObjectKind::Form => &mut self.forms,
            ObjectKind::Report => &mut self.reports,
            ObjectKind::Macro => &mut self.macros,
            ObjectKind::Module => &mut self.modules,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    seeds: HashMap<String, FakeDatabase>,
    instances: HashMap<PathBuf, FakeDatabase>,
    next_seed: usize,
    window_open: bool,
    close_resistance: usize,
    close_signals: usize,
    live_sessions: usize,
    fail_open: bool,
    fail_compact: bool,
    fail_delete: HashSet<(ObjectKind, String)>,
    fail_export: HashSet<String>,
    quit_modes: Vec<SaveMode>,
}

/// Cloneable handle to one fake host; clones share all state.
/// 假主機的可複製握把；所有複本共享同一份狀態。
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.lock().close_resistance = 1;
        host
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake host state poisoned")
    }

    /// Registers `database` and writes its marker file at `path`.
    /// 註冊 `database` 並在 `path` 寫入其標記檔。
    pub fn seed_database(&self, path: &Path, database: FakeDatabase) -> io::Result<()> {
        let mut state = self.lock();
        let id = state.next_seed.to_string();
        state.next_seed += 1;
        fs::write(path, format!("{MARKER_PREFIX}{id}\n"))?;
        state.seeds.insert(id, database);
        Ok(())
    }

    /// Snapshot of the database currently associated with `path`, if any.
    /// 目前與 `path` 關聯的資料庫快照（若存在）。
    pub fn database(&self, path: &Path) -> Option<FakeDatabase> {
        let state = self.lock();
        if let Some(instance) = state.instances.get(path) {
            return Some(instance.clone());
        }
        let id = read_marker(path).ok()?;
        state.seeds.get(&id).cloned()
    }

    pub fn set_window_open(&self, open: bool) {
        let mut state = self.lock();
        state.window_open = open;
        state.close_signals = 0;
    }

    /// Number of close signals the window absorbs before disappearing.
    /// 視窗在消失前會吸收的關閉訊號數。
    pub fn set_close_resistance(&self, signals: usize) {
        self.lock().close_resistance = signals;
    }

    pub fn close_signals(&self) -> usize {
        self.lock().close_signals
    }

    pub fn set_open_failure(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_compact_failure(&self, fail: bool) {
        self.lock().fail_compact = fail;
    }

    /// Makes deleting the given object fail, as a locked or damaged object
    /// would in the real host.
    /// 讓刪除指定物件時失敗，模擬真實主機中被鎖定或損壞的物件。
    pub fn fail_delete(&self, kind: ObjectKind, name: &str) {
        self.lock().fail_delete.insert((kind, name.to_string()));
    }

    pub fn fail_export(&self, table: &str) {
        self.lock().fail_export.insert(table.to_string());
    }

    pub fn live_sessions(&self) -> usize {
        self.lock().live_sessions
    }

    /// Save modes of every session quit so far, in order.
    /// 迄今每個工作階段結束時使用的儲存模式，依序排列。
    pub fn quit_modes(&self) -> Vec<SaveMode> {
        self.lock().quit_modes.clone()
    }
}

fn read_marker(path: &Path) -> Result<String, HostError> {
    let text = fs::read_to_string(path)
        .map_err(|err| HostError::OpenFailed(path.to_path_buf(), err.to_string()))?;
    text.lines()
        .next()
        .and_then(|line| line.strip_prefix(MARKER_PREFIX))
        .map(|id| id.trim().to_string())
        .ok_or_else(|| {
            HostError::OpenFailed(path.to_path_buf(), "not a fake database file".into())
        })
}

fn resolve_instance(state: &mut FakeState, path: &Path) -> Result<PathBuf, HostError> {
    if state.instances.contains_key(path) {
        return Ok(path.to_path_buf());
    }
    let id = read_marker(path)?;
    let seed = state.seeds.get(&id).cloned().ok_or_else(|| {
        HostError::OpenFailed(path.to_path_buf(), format!("unknown database id '{id}'"))
    })?;
    state.instances.insert(path.to_path_buf(), seed);
    Ok(path.to_path_buf())
}

impl HostDriver for FakeHost {
    fn is_running(&self) -> bool {
        self.lock().window_open
    }

    fn request_close(&self) {
        let mut state = self.lock();
        if !state.window_open {
            return;
        }
        state.close_signals += 1;
        if state.close_signals >= state.close_resistance {
            state.window_open = false;
        }
    }

    fn open(
        &self,
        database: Option<&Path>,
        _visible: bool,
    ) -> Result<Box<dyn HostSession>, HostError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(HostError::Unavailable(
                "injected instantiation failure".into(),
            ));
        }
        if state.live_sessions > 0 {
            return Err(HostError::SessionBusy);
        }
        let database = match database {
            Some(path) => Some(resolve_instance(&mut state, path)?),
            None => None,
        };
        state.live_sessions += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            database,
            closed: false,
        }))
    }
}

/// Session handle produced by [`FakeHost::open`].
/// 由 [`FakeHost::open`] 產生的工作階段握把。
#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    database: Option<PathBuf>,
    closed: bool,
}

impl FakeSession {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake host state poisoned")
    }

    fn database_key(&self) -> Result<&PathBuf, HostError> {
        self.database.as_ref().ok_or(HostError::NoDatabase)
    }
}

impl HostSession for FakeSession {
    fn object_names(&self, kind: ObjectKind) -> Result<Vec<String>, HostError> {
        let key = self.database_key()?.clone();
        let state = self.lock();
        let db = state.instances.get(&key).expect("instance registered");
        Ok(db.objects(kind).clone())
    }

    fn close_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError> {
        let key = self.database_key()?.clone();
        let state = self.lock();
        let db = state.instances.get(&key).expect("instance registered");
        if db.objects(object.kind).iter().any(|name| name == &object.name) {
            Ok(())
        } else {
            Err(HostError::ObjectOperation {
                object: object.clone(),
                reason: "object is not open".into(),
            })
        }
    }

    fn delete_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError> {
        let key = self.database_key()?.clone();
        let mut state = self.lock();
        let blocked = state
            .fail_delete
            .iter()
            .any(|(kind, name)| *kind == object.kind && name == &object.name);
        if blocked {
            return Err(HostError::ObjectOperation {
                object: object.clone(),
                reason: "injected delete failure".into(),
            });
        }
        let db = state.instances.get_mut(&key).expect("instance registered");
        let list = db.objects_mut(object.kind);
        match list.iter().position(|name| name == &object.name) {
            Some(index) => {
                list.remove(index);
                Ok(())
            }
            None => Err(HostError::ObjectOperation {
                object: object.clone(),
                reason: "no such object".into(),
            }),
        }
    }

    fn export_delimited(
        &mut self,
        table: &str,
        dest: &Path,
        include_field_names: bool,
    ) -> Result<(), HostError> {
        let key = self.database_key()?.clone();
        let state = self.lock();
        let failure = |reason: String| HostError::ObjectOperation {
            object: ObjectDescriptor::new(ObjectKind::Table, table),
            reason,
        };
        if state.fail_export.contains(table) {
            return Err(failure("injected export failure".into()));
        }
        let db = state.instances.get(&key).expect("instance registered");
        if !db.tables.iter().any(|name| name == table) {
            return Err(failure("no such table".into()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| failure(err.to_string()))?;
        }
        let mut payload = String::new();
        if include_field_names {
            payload.push_str("ID,Name\n");
        }
        payload.push_str(&format!("1,{table}\n"));
        fs::write(dest, payload).map_err(|err| failure(err.to_string()))
    }

    fn load_query(&mut self, name: &str, source: &Path) -> Result<(), HostError> {
        let key = self.database_key()?.clone();
        fs::read_to_string(source).map_err(|err| HostError::ObjectOperation {
            object: ObjectDescriptor::new(ObjectKind::Query, name),
            reason: format!("cannot read definition: {err}"),
        })?;
        let mut state = self.lock();
        let db = state.instances.get_mut(&key).expect("instance registered");
        if !db.queries.iter().any(|existing| existing == name) {
            db.queries.push(name.to_string());
        }
        Ok(())
    }

    fn references(&self) -> Result<Vec<Reference>, HostError> {
        let key = self.database_key()?.clone();
        let state = self.lock();
        let db = state.instances.get(&key).expect("instance registered");
        Ok(db.references.iter().map(Reference::new).collect())
    }

    fn add_reference(&mut self, path: &str) -> Result<(), HostError> {
        let key = self.database_key()?.clone();
        let mut state = self.lock();
        let db = state.instances.get_mut(&key).expect("instance registered");
        db.references.push(path.to_string());
        Ok(())
    }

    fn compact_repair(&mut self, source: &Path, dest: &Path) -> Result<(), HostError> {
        let state = self.lock();
        if state.fail_compact {
            return Err(HostError::RepairFailed(
                source.to_path_buf(),
                "injected repair failure".into(),
            ));
        }
        drop(state);
        let bytes = fs::read(source)
            .map_err(|err| HostError::RepairFailed(source.to_path_buf(), err.to_string()))?;
        fs::write(dest, bytes)
            .map_err(|err| HostError::RepairFailed(source.to_path_buf(), err.to_string()))
    }

    fn quit(mut self: Box<Self>, mode: SaveMode) -> Result<(), HostError> {
        self.closed = true;
        let mut state = self.lock();
        state.live_sessions = state.live_sessions.saturating_sub(1);
        state.quit_modes.push(mode);
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        // Leaked sessions (dropped without quit) still release their slot.
        if !self.closed {
            let mut state = self.state.lock().expect("fake host state poisoned");
            state.live_sessions = state.live_sessions.saturating_sub(1);
        }
    }
}
