//! Top-level rebuild sequencer: composes the host session manager, object
//! accessor, text bridge, reference synchronizer, compaction pipeline and
//! helper kit into the full rebuild workflow.
//! 最上層的重建排程器：將主機工作階段管理、物件存取、文字橋接、
//! 參考同步、壓縮流程與輔助工具組組合成完整的重建工作流程。

pub mod pipeline;
pub mod workdir;

pub use pipeline::{Rebuild, RebuildError, RebuildOptions, RebuildReport, Stage};
pub use workdir::{Workspace, WORK_DIR_NAME};
