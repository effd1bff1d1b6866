//! Remote acquisition of the helper script.
//! 自遠端取得輔助腳本。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for '{0}' failed")]
    /// 對遠端位址的要求失敗。
    Request(String, #[source] Box<ureq::Error>),
    #[error("could not write download to '{0}'")]
    /// 下載內容無法寫入目的檔案。
    Write(PathBuf, #[source] io::Error),
}

/// Retrieves one remote file onto disk.
/// 將單一遠端檔案取回至磁碟。
pub trait ScriptFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Production fetcher over plain HTTP(S).
/// 正式環境使用的 HTTP(S) 下載器。
pub struct HttpFetcher;

impl ScriptFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        log::info!("fetching {url}");
        let response = ureq::get(url)
            .call()
            .map_err(|err| FetchError::Request(url.to_string(), Box::new(err)))?;
        let mut reader = response.into_reader();
        let mut file =
            fs::File::create(dest).map_err(|err| FetchError::Write(dest.to_path_buf(), err))?;
        io::copy(&mut reader, &mut file)
            .map_err(|err| FetchError::Write(dest.to_path_buf(), err))?;
        Ok(())
    }
}
