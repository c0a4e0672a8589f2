pub mod config;
pub mod file_index;
pub mod file_store;
pub mod image_ops;
pub mod invalidation;
pub mod mimetype_detector;
pub mod naming;
pub mod preview_store;
pub mod preview_types;
pub mod providers;
pub mod resolver;

pub use config::PreviewConfig;
pub use file_index::{FileIndex, MemoryFileIndex, SourceFile};
pub use file_store::{FileStore, LocalFileStore, StoreEntry};
pub use invalidation::PendingDelete;
pub use preview_types::{PreviewError, PreviewImage, PreviewMode, PreviewRequest, PreviewResult};
pub use providers::{ImageProvider, MimePattern, ProviderRegistration, RenderProvider};
pub use resolver::{PreviewResolver, PreviewResolverBuilder};
