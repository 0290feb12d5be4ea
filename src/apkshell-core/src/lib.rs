//! apkshell core library
//!
//! Builds a protected ("shelled") variant of an Android package.
//!
//! This crate provides:
//! - **workspace**: Per-job build directory (apk/instrument/native layout)
//! - **archive**: Zip unpack/repack with traversal protection, tar.gz snapshots
//! - **instrument**: Instrumentor contract and the external-program implementation
//! - **template**: Native skeleton staging and sentinel patching
//! - **native**: NDK toolchain resolution and the supervised ndk-build run
//! - **execution**: Process supervision with timeout and process-group kill
//! - **abi**, **assemble**: ABI selection and artifact placement
//! - **metadata**: Signing metadata removal
//! - **package**: Output naming and final repackaging
//! - **pipeline**: The staged job runner tying all of the above together
//! - **config**: `.apkshell.yaml` format
//!
//! # Example
//!
//! ```no_run
//! use apkshell_core::{CommandInstrumentor, Shell, ShellConfig, ShellRequest};
//!
//! let config = ShellConfig::default();
//! let instrumentor = CommandInstrumentor::from_spec(&config.instrumentor);
//! let report = Shell::new(config, instrumentor)
//!     .run(&ShellRequest::new("app.apk", "out"))?;
//! println!("{}", report.output.display());
//! # Ok::<(), apkshell_core::ShellError>(())
//! ```

pub mod abi;
pub mod archive;
pub mod assemble;
pub mod config;
pub mod error;
pub mod execution;
pub mod inspect;
pub mod instrument;
pub mod metadata;
pub mod native;
pub mod package;
pub mod pipeline;
pub mod template;
pub mod workspace;

// Re-export commonly used types at crate root
pub use abi::{AbiSelection, AbiTarget};
pub use config::{parse_config_file, parse_config_yaml, Retention, RetentionSpec, ShellConfig};
pub use error::{ShellError, Stage};
pub use inspect::{inspect_package, Inspection};
pub use instrument::{CommandInstrumentor, InstrumentError, InstrumentOutput, InstrumentRequest, Instrumentor};
pub use pipeline::{BuildJob, Shell, ShellReport, ShellRequest};
pub use workspace::Workspace;
