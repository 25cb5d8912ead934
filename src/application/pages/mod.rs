//! Page commands and queries.

pub mod archive;
pub mod published;
pub mod validation;

pub use archive::{ArchivePageCommand, ArchivePageError, ArchivePageService, RetryPolicy};
pub use published::{PUBLISHED_CACHE_NAME, PublishedPageService};
pub use validation::{FieldError, ValidationErrors};
