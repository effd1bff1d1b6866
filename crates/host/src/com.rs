//! COM automation binding for the real host application.
//! 真實主機應用程式的 COM 自動化綁定。
//!
//! Late-bound dispatch only: every property and method goes through
//! `IDispatch::GetIDsOfNames` / `Invoke`, so no type library import is
//! needed at build time. The host's main window class is `OMain`.
//! 僅使用晚期繫結：所有屬性與方法都經由 `IDispatch::GetIDsOfNames` 與
//! `Invoke` 呼叫，建置時不需匯入型別程式庫。主機主視窗類別為 `OMain`。

use std::path::Path;

use windows::core::{Interface, BSTR, GUID, HSTRING, PCWSTR, VARIANT};
use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, CoInitializeEx, IDispatch, CLSCTX_LOCAL_SERVER,
    COINIT_APARTMENTTHREADED, DISPATCH_FLAGS, DISPATCH_METHOD, DISPATCH_PROPERTYGET,
    DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
};
use windows::Win32::UI::WindowsAndMessaging::{FindWindowW, PostMessageW, WM_CLOSE};

use crate::{HostDriver, HostError, HostSession, ObjectDescriptor, ObjectKind, Reference, SaveMode};

/// ProgID the automation server is registered under.
/// 自動化伺服器註冊的 ProgID。
const PROG_ID: &str = "Access.Application";

/// Window class of the host's main window.
/// 主機主視窗的視窗類別。
const MAIN_WINDOW_CLASS: PCWSTR = windows::core::w!("OMain");

const LOCALE_USER_DEFAULT: u32 = 0x0400;
const DISPID_PROPERTYPUT: i32 = -3;
/// `DISP_E_PARAMNOTFOUND`, the scode of an omitted optional argument.
const PARAM_NOT_FOUND: i32 = 0x8002_0004u32 as i32;
/// VT_ERROR variant type tag.
const VT_ERROR: u16 = 10;

/// `AcTextTransferType` code for delimited export.
const TRANSFER_EXPORT_DELIM: i32 = 2;
/// `AcObjectType` code accepted by `LoadFromText` for queries.
const LOAD_AS_QUERY: i32 = 1;

fn com_error(context: &str, err: windows::core::Error) -> HostError {
    HostError::Unavailable(format!("{context}: {err}"))
}

/// Placeholder VARIANT for an omitted optional dispatch argument.
/// 省略之選擇性引數所用的佔位 VARIANT。
fn missing_arg() -> VARIANT {
    // VT_ERROR with DISP_E_PARAMNOTFOUND is the documented encoding of a
    // skipped optional parameter; windows-core has no constructor for it.
    unsafe {
        let mut raw: windows::core::imp::VARIANT = core::mem::zeroed();
        raw.Anonymous.Anonymous.vt = VT_ERROR;
        raw.Anonymous.Anonymous.Anonymous.scode = PARAM_NOT_FOUND;
        VARIANT::from_raw(raw)
    }
}

/// Thin late-binding wrapper over one automation object.
/// 單一自動化物件的晚期繫結薄包裝。
#[derive(Debug)]
struct Dispatch(IDispatch);

impl Dispatch {
    fn dispid(&self, name: &str) -> Result<i32, HostError> {
        let wide = HSTRING::from(name);
        let pname = PCWSTR(wide.as_ptr());
        let mut dispid = 0i32;
        unsafe {
            self.0
                .GetIDsOfNames(&GUID::zeroed(), &pname, 1, LOCALE_USER_DEFAULT, &mut dispid)
        }
        .map_err(|err| com_error(&format!("member '{name}' not found"), err))?;
        Ok(dispid)
    }

    /// Invokes `name` with `args` in call order; the DISPPARAMS encoding
    /// wants them reversed.
    /// 以呼叫順序的 `args` 執行 `name`；DISPPARAMS 要求反序排列。
    fn invoke(
        &self,
        name: &str,
        flags: DISPATCH_FLAGS,
        args: &[VARIANT],
    ) -> Result<VARIANT, HostError> {
        let dispid = self.dispid(name)?;
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let mut named_put = DISPID_PROPERTYPUT;
        let mut params = DISPPARAMS {
            rgvarg: reversed.as_mut_ptr(),
            cArgs: reversed.len() as u32,
            ..Default::default()
        };
        if flags.0 & DISPATCH_PROPERTYPUT.0 != 0 {
            params.rgdispidNamedArgs = &mut named_put;
            params.cNamedArgs = 1;
        }
        let mut result = VARIANT::default();
        let mut excep = EXCEPINFO::default();
        let invoked = unsafe {
            self.0.Invoke(
                dispid,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(&mut result),
                Some(&mut excep),
                None,
            )
        };
        match invoked {
            Ok(()) => Ok(result),
            Err(err) => {
                let description = excep.bstrDescription.to_string();
                let detail = if description.is_empty() {
                    err.to_string()
                } else {
                    description
                };
                Err(HostError::Unavailable(format!("'{name}' failed: {detail}")))
            }
        }
    }

    fn get(&self, name: &str) -> Result<VARIANT, HostError> {
        self.invoke(name, DISPATCH_PROPERTYGET, &[])
    }

    fn put(&self, name: &str, value: VARIANT) -> Result<(), HostError> {
        self.invoke(name, DISPATCH_PROPERTYPUT, &[value])?;
        Ok(())
    }

    fn call(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, HostError> {
        self.invoke(name, DISPATCH_METHOD, args)
    }

    fn get_object(&self, name: &str) -> Result<Dispatch, HostError> {
        let value = self.get(name)?;
        as_dispatch(name, &value)
    }

    /// Element `index` of a collection; `Item` answers to both method and
    /// property-get dispatch depending on the collection.
    /// 取得集合第 `index` 個元素；`Item` 依集合不同可能以方法或屬性回應。
    fn item(&self, index: i32) -> Result<Dispatch, HostError> {
        let value = self.invoke(
            "Item",
            DISPATCH_METHOD | DISPATCH_PROPERTYGET,
            &[VARIANT::from(index)],
        )?;
        as_dispatch("Item", &value)
    }

    fn count(&self) -> Result<i32, HostError> {
        let value = self.get("Count")?;
        i32::try_from(&value).map_err(|err| com_error("'Count' is not numeric", err))
    }

    fn get_string(&self, name: &str) -> Result<String, HostError> {
        let value = self.get(name)?;
        BSTR::try_from(&value)
            .map(|text| text.to_string())
            .map_err(|err| com_error(&format!("'{name}' is not a string"), err))
    }
}

fn as_dispatch(name: &str, value: &VARIANT) -> Result<Dispatch, HostError> {
    IDispatch::try_from(value)
        .map(Dispatch)
        .map_err(|err| com_error(&format!("'{name}' is not an object"), err))
}

fn path_arg(path: &Path) -> VARIANT {
    VARIANT::from(BSTR::from(path.to_string_lossy().as_ref()))
}

/// Driver over the registered automation server.
/// 以已註冊自動化伺服器為後端的驅動程式。
pub struct ComHost;

impl ComHost {
    pub fn new() -> Result<Self, HostError> {
        // Balanced by process teardown; the tool is a one-shot CLI.
        let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
        if hr.is_err() {
            return Err(HostError::Unavailable(format!(
                "COM initialization failed: {hr}"
            )));
        }
        Ok(Self)
    }

    fn find_window() -> Option<windows::Win32::Foundation::HWND> {
        unsafe { FindWindowW(MAIN_WINDOW_CLASS, PCWSTR::null()) }.ok()
    }
}

impl HostDriver for ComHost {
    fn is_running(&self) -> bool {
        Self::find_window().is_some()
    }

    fn request_close(&self) {
        if let Some(window) = Self::find_window() {
            // Advisory only. The window may refuse (modal dialog open).
            let _ = unsafe { PostMessageW(window, WM_CLOSE, WPARAM(0), LPARAM(0)) };
        }
    }

    fn open(
        &self,
        database: Option<&Path>,
        visible: bool,
    ) -> Result<Box<dyn HostSession>, HostError> {
        let clsid = unsafe { CLSIDFromProgID(PCWSTR(HSTRING::from(PROG_ID).as_ptr())) }
            .map_err(|err| com_error("ProgID is not registered", err))?;
        let app: IDispatch =
            unsafe { CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER) }
                .map_err(|err| com_error("could not start the automation server", err))?;
        let app = Dispatch(app);
        app.put("Visible", VARIANT::from(visible))?;
        let has_database = match database {
            Some(path) => {
                log::debug!("opening database {}", path.display());
                app.call("OpenCurrentDatabase", &[path_arg(path)])
                    .map_err(|err| {
                        HostError::OpenFailed(path.to_path_buf(), err.to_string())
                    })?;
                true
            }
            None => false,
        };
        Ok(Box::new(ComSession { app, has_database }))
    }
}

/// One live automation server instance.
/// 一個執行中的自動化伺服器實例。
#[derive(Debug)]
pub struct ComSession {
    app: Dispatch,
    has_database: bool,
}

impl ComSession {
    fn require_database(&self) -> Result<(), HostError> {
        if self.has_database {
            Ok(())
        } else {
            Err(HostError::NoDatabase)
        }
    }

    fn do_cmd(&self) -> Result<Dispatch, HostError> {
        self.app.get_object("DoCmd")
    }

    /// Collection holding objects of `kind`. Tables come from the data
    /// engine's `TableDefs`; the rest from the project's `All*`
    /// collections.
    /// 依 `kind` 取得對應的物件集合。資料表來自資料引擎的 `TableDefs`，
    /// 其餘取自專案的 `All*` 集合。
    fn collection(&self, kind: ObjectKind) -> Result<Dispatch, HostError> {
        match kind {
            ObjectKind::Table => {
                let db = as_dispatch("CurrentDb", &self.app.call("CurrentDb", &[])?)?;
                db.get_object("TableDefs")
            }
            ObjectKind::Query => self.app.get_object("CurrentData")?.get_object("AllQueries"),
            ObjectKind::Form => self
                .app
                .get_object("CurrentProject")?
                .get_object("AllForms"),
            ObjectKind::Report => self
                .app
                .get_object("CurrentProject")?
                .get_object("AllReports"),
            ObjectKind::Macro => self
                .app
                .get_object("CurrentProject")?
                .get_object("AllMacros"),
            ObjectKind::Module => self
                .app
                .get_object("CurrentProject")?
                .get_object("AllModules"),
        }
    }
}

impl HostSession for ComSession {
    fn object_names(&self, kind: ObjectKind) -> Result<Vec<String>, HostError> {
        self.require_database()?;
        let collection = self.collection(kind)?;
        let count = collection.count()?;
        let mut names = Vec::with_capacity(count as usize);
        // The object collections enumerate 0-based.
        for index in 0..count {
            names.push(collection.item(index)?.get_string("Name")?);
        }
        Ok(names)
    }

    fn close_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError> {
        self.require_database()?;
        self.do_cmd()?
            .call(
                "Close",
                &[
                    VARIANT::from(object.kind.automation_code()),
                    VARIANT::from(BSTR::from(object.name.as_str())),
                    VARIANT::from(SaveMode::No.automation_code()),
                ],
            )
            .map_err(|err| HostError::ObjectOperation {
                object: object.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn delete_object(&mut self, object: &ObjectDescriptor) -> Result<(), HostError> {
        self.require_database()?;
        self.do_cmd()?
            .call(
                "DeleteObject",
                &[
                    VARIANT::from(object.kind.automation_code()),
                    VARIANT::from(BSTR::from(object.name.as_str())),
                ],
            )
            .map_err(|err| HostError::ObjectOperation {
                object: object.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn export_delimited(
        &mut self,
        table: &str,
        dest: &Path,
        include_field_names: bool,
    ) -> Result<(), HostError> {
        self.require_database()?;
        self.do_cmd()?
            .call(
                "TransferText",
                &[
                    VARIANT::from(TRANSFER_EXPORT_DELIM),
                    missing_arg(),
                    VARIANT::from(BSTR::from(table)),
                    path_arg(dest),
                    VARIANT::from(include_field_names),
                ],
            )
            .map_err(|err| HostError::ObjectOperation {
                object: ObjectDescriptor::new(ObjectKind::Table, table),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn load_query(&mut self, name: &str, source: &Path) -> Result<(), HostError> {
        self.require_database()?;
        self.app
            .call(
                "LoadFromText",
                &[
                    VARIANT::from(LOAD_AS_QUERY),
                    VARIANT::from(BSTR::from(name)),
                    path_arg(source),
                ],
            )
            .map_err(|err| HostError::ObjectOperation {
                object: ObjectDescriptor::new(ObjectKind::Query, name),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn references(&self) -> Result<Vec<Reference>, HostError> {
        let references = self.app.get_object("References")?;
        let count = references.count()?;
        let mut paths = Vec::with_capacity(count as usize);
        // The References collection enumerates 1-based.
        for index in 1..=count {
            let full_path = references.item(index)?.get_string("FullPath")?;
            paths.push(Reference::new(full_path));
        }
        Ok(paths)
    }

    fn add_reference(&mut self, path: &str) -> Result<(), HostError> {
        let references = self.app.get_object("References")?;
        references
            .call("AddFromFile", &[VARIANT::from(BSTR::from(path))])
            .map_err(|err| HostError::Reference(path.to_string(), err.to_string()))?;
        Ok(())
    }

    fn compact_repair(&mut self, source: &Path, dest: &Path) -> Result<(), HostError> {
        self.app
            .call(
                "CompactRepair",
                &[path_arg(source), path_arg(dest), VARIANT::from(false)],
            )
            .map_err(|err| {
                HostError::RepairFailed(source.to_path_buf(), err.to_string())
            })?;
        Ok(())
    }

    fn quit(self: Box<Self>, mode: SaveMode) -> Result<(), HostError> {
        self.app
            .call("Quit", &[VARIANT::from(mode.automation_code())])
            .map_err(|err| HostError::Quit(err.to_string()))?;
        Ok(())
    }
}
