pub mod archive;
pub mod compositor;
pub mod error;
pub mod export;
pub mod host;
pub mod navigator;
pub mod panic_handler;
pub mod range;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use compositor::{CompositedPage, PageSpec, TileDescriptor, composite_page};
pub use error::{ExportError, RangeError, TileDefect};
pub use export::{Archive, ExportJob, ExportRequest, Exporter};
pub use navigator::PageNavigator;
pub use range::{IntervalSet, PageInterval, parse_ranges};
