//! # biblio-containers
//!
//! Container layer for compressed bibliographic corpora.
//!
//! A *container* is the unit a corpus is partitioned into: one file of a
//! directory, one member of a tar or zip archive, or a whole file acting as
//! the single implicit partition. This crate enumerates containers cheaply
//! (names only, optionally sampled), decodes one container on demand into a
//! list of [`serde_json::Value`] records, and keeps the last decoded
//! container in a single-slot [`ContainerCache`].
//!
//! ## Sources
//!
//! | Source                  | Container                                   |
//! |-------------------------|---------------------------------------------|
//! | [`DirectoryContainers`] | file in a directory (`.gz`, `.zip` or plain) |
//! | [`TarContainers`]       | regular member of a (gzip) tar archive       |
//! | [`ZipContainers`]       | member of a zip archive                      |
//! | [`SingleContainer`]     | the whole file, container 0                  |
//!
//! ## Quick start
//!
//! ```no_run
//! use biblio_containers::{sample, ContainerCache, DirectoryContainers, PayloadFormat};
//!
//! let source = DirectoryContainers::open(
//!     "/data/crossref",
//!     ".json.gz",
//!     PayloadFormat::json_items("items"),
//!     Some(sample::random_fraction(0.01, 42)),
//! )
//! .unwrap();
//!
//! let mut cache = ContainerCache::new(source);
//! let works = cache.get(0).unwrap();
//! println!("{} works in {:?}", works.len(), cache.name(0));
//! ```

pub mod cache;
pub mod directory;
pub mod error;
pub mod payload;
pub mod record;
pub mod sample;
pub mod single;
pub mod source;
pub mod tar_stream;
pub mod xml;
pub mod zip_archive;

// Re-exports for convenience.
pub use cache::{ContainerCache, Records};
pub use directory::DirectoryContainers;
pub use error::ContainerError;
pub use payload::PayloadFormat;
pub use sample::SamplePredicate;
pub use single::SingleContainer;
pub use source::{ContainerId, ContainerSource};
pub use tar_stream::TarContainers;
pub use zip_archive::ZipContainers;
