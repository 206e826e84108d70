//! # Sheet Sleuth
//!
//! A layout-agnostic inference engine for spreadsheet-like evidence files. Given files of
//! unknown layout, it works out what each sheet holds and summarizes it without exposing
//! raw values.
//!
//! ## Features
//!
//! - **Multi-format loading**: OpenXML (`.xlsx`, `.xlsm`, ...), OpenDocument (`.ods`),
//!   BIFF8 (`.xls`) and delimited text, with a salvage reader for damaged packages
//! - **Structure detection**: tables at arbitrary offsets, stacked tables, key-value
//!   lists and mixed regions, each with a confidence score
//! - **Extraction**: header resolution with merged cells, hierarchical key-value trees
//! - **Recognition**: value types, heterogeneous date and period notations, named entities
//! - **Privacy-safe output**: names, types, statistics and bounded samples only
//! - **Batch processing**: concurrent files with per-file timeouts, cancellation and
//!   optional process isolation
//!
//! ## Usage
//!
//! ```no_run
//! use sheet_sleuth::batch::expand_inputs;
//! use sheet_sleuth::BatchOrchestrator;
//! use sheet_sleuth::EngineConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), sheet_sleuth::SheetSleuthError> {
//! let config = Arc::new(EngineConfig::from_toml_str("profile = \"thorough_analysis\"")?);
//! let inputs = expand_inputs(&["evidence/*.xlsx"])?;
//! let batch = BatchOrchestrator::new(config).run(inputs).await;
//! println!("{}", serde_json::to_string_pretty(&batch)?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod helpers;
pub mod inference;
pub mod metadata;
pub mod pipeline;
pub mod spreadsheet;

pub use crate::batch::BatchOrchestrator;
pub use crate::batch::FileEvent;
pub use crate::batch::FileState;
pub use crate::config::EngineConfig;
pub use crate::config::Profile;
pub use crate::error::SheetSleuthError;
pub use crate::helpers::budget::Budget;
pub use crate::helpers::reader::Input;
pub use crate::metadata::BatchResult;
pub use crate::metadata::FileResult;
pub use crate::metadata::SheetMetadata;
pub use crate::metadata::Status;
pub use crate::pipeline::FileProcessor;
pub use crate::pipeline::Pipeline;
