pub mod exporter;
pub mod filename;
pub mod job;
pub mod save;
pub mod surface;

pub use exporter::{Archive, ExportOptions, Exporter};
pub use filename::{resolve_archive_name, sanitize_filename};
pub use job::{ExportJob, ExportRequest};
pub use save::{DirectorySaver, FileSaver};
pub use surface::{ConsoleSurface, ExportSurface, Progress};
