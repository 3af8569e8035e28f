//! s3fs: hierarchical file system emulation over an S3 bucket
//!
//! Object stores only know flat keys. This library maps URIs such as
//! `public://images/a.jpg` onto keys, keeps a metadata index that gives
//! the bucket real directories, and derives the URLs files are served
//! from.
//!
//! # Architecture
//!
//! - **Key mapping** (`keymap`): pure URI ↔ key translation.
//! - **Metadata index** (`store`): `MetadataStore` trait with in-memory and
//!   SQLite implementations; the only record of which paths exist.
//! - **Directory engine** (`fs`): stat, mkdir, rmdir, rename, unlink and
//!   readdir against the index.
//! - **Flush** (`flush`): uploads, waits for read-after-write visibility
//!   (`waiter`) and then indexes the object.
//! - **URL policy** (`url`): plain, CNAME, presigned, forced-download and
//!   torrent URLs driven by pattern rules (`rules`).
//! - **Backends** (`backend`): `ObjectBackend` trait over S3 and memory.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use s3fs::backend::s3::S3Backend;
//! use s3fs::config::Config;
//! use s3fs::fs::DirectoryEngine;
//! use s3fs::store::open_store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::shared_from_file(&"s3fs.yaml".into())?;
//! let backend = Arc::new(S3Backend::new(&config).await?);
//! let store = open_store(&config.index)?;
//!
//! let engine = DirectoryEngine::new(config, backend, store);
//! engine.mkdir("public://images/2024", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod env;
pub mod error;
pub mod flush;
pub mod fs;
pub mod keymap;
pub mod rules;
pub mod store;
pub mod url;
pub mod waiter;

pub use error::{Result, S3fsError};
