use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser};
use accrebuild_helper::fetch::HttpFetcher;
use accrebuild_helper::invoke::SystemInvoker;
use accrebuild_host::native_driver;
use accrebuild_sequencer::{Rebuild, RebuildOptions, RebuildReport, WORK_DIR_NAME};
use accrebuild_objects::QueryImport;

#[derive(Parser)]
#[command(
    name = "accrebuild",
    about = "Rebuild an Access database by decomposing it to text and back",
    author,
    version
)]
struct Cli {
    /// 要重建的資料庫檔案。 / Database file to rebuild.
    #[arg(short = 'i', long, value_name = "FILE")]
    input_file: PathBuf,

    /// 重建至輔助腳本建立的空白資料庫，而非輸入檔的副本。 / Rebuild into a blank database created by the helper, instead of a copy of the input.
    #[arg(short = 'c', long)]
    create_new_db: bool,

    /// 輔助腳本缺失時自動下載。 / Download the helper script when it is missing.
    #[arg(short = 'd', long)]
    download_script: bool,

    /// 另將資料表內容匯出為分隔文字。 / Also export table contents as delimited text.
    #[arg(long)]
    export_table_data: bool,

    /// 工作目錄根；預設為家目錄下的 ariawase。 / Working root; defaults to <home>/ariawase.
    #[arg(long, value_name = "DIR")]
    working_root: Option<PathBuf>,

    /// 以 JSON 輸出執行報告。 / Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let input_file = resolve_input_path(&cli.input_file)?;
    if !input_file.is_file() {
        let usage = Cli::command().render_usage().to_string();
        bail!(
            "input file '{}' does not exist\n\n{usage}",
            input_file.display()
        );
    }

    let working_root = match cli.working_root {
        Some(root) => root,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow!("could not determine the home directory"))?
            .join(WORK_DIR_NAME),
    };

    let options = RebuildOptions {
        input_file,
        create_new_db: cli.create_new_db,
        download_script: cli.download_script,
        export_table_data: cli.export_table_data,
        working_root,
    };

    let driver = native_driver().context("automation host is not available")?;
    let invoker = SystemInvoker;
    let fetcher = HttpFetcher;
    let report = Rebuild::new(driver.as_ref(), &invoker, &fetcher, options)
        .run()
        .context("rebuild failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    reveal_in_explorer(&report.working_file);
    Ok(())
}

fn print_report(report: &RebuildReport) {
    println!("Rebuilt database: {}", report.working_file.display());
    for batch in &report.stripped {
        println!(
            "  Removed {} {}(s){}",
            batch.succeeded(),
            batch.kind,
            if batch.is_clean() {
                String::new()
            } else {
                format!(" ({} failed)", batch.failed())
            }
        );
    }
    if let Some(export) = &report.table_export {
        println!(
            "  Exported {} table(s) as delimited text",
            export.succeeded()
        );
    }
    match &report.queries {
        QueryImport::Imported(names) => println!("  Imported {} quer(y/ies)", names.len()),
        QueryImport::NoDefinitionsFound => {}
    }
    for reference in &report.references_added {
        println!("  Added reference {reference}");
    }
    if !report.removed_files.is_empty() {
        println!(
            "  Cleaned {} stray file(s) from the working directory",
            report.removed_files.len()
        );
    }
    for warning in &report.warnings {
        println!("  Warning: {warning}");
    }
}

#[cfg(target_os = "windows")]
fn reveal_in_explorer(path: &Path) {
    // Best effort only; the rebuild already succeeded at this point.
    let _ = std::process::Command::new("explorer")
        .arg(format!("/select,{}", path.display()))
        .spawn();
}

#[cfg(not(target_os = "windows"))]
fn reveal_in_explorer(path: &Path) {
    log::debug!("not revealing {} (no file explorer here)", path.display());
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
