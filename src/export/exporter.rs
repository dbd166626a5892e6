use std::path::PathBuf;

use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveBuilder, Compression};
use crate::compositor::{CompositeOptions, composite_page};
use crate::error::{ExportError, Result};
use crate::export::job::ExportJob;
use crate::export::save::FileSaver;
use crate::export::surface::{ExportSurface, Progress};
use crate::host::{HostDocument, HostReader};
use crate::navigator::{NavigatorOptions, PageNavigator};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    pub navigation: NavigatorOptions,
    pub composite: CompositeOptions,
    pub compression: Compression,
}

impl ExportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            navigation: NavigatorOptions {
                poll_interval: settings.poll_interval(),
                timeout: settings.timeout(),
                tiles_per_page: settings.tiles_per_page,
            },
            composite: CompositeOptions {
                expected_tiles: settings.tiles_per_page,
                jpeg_quality: settings.jpeg_quality,
            },
            compression: settings.compression,
        }
    }
}

/// A finished, saved export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub file_name: String,
    pub entries: Vec<String>,
    pub size: usize,
    pub path: PathBuf,
}

/// Holds the reader and the form for the duration of a job and hands both
/// back when dropped, whatever the outcome.
struct JobGuard<'a, H: HostReader, S: ExportSurface> {
    host: &'a H,
    surface: &'a S,
}

impl<'a, H: HostReader, S: ExportSurface> JobGuard<'a, H, S> {
    fn acquire(host: &'a H, surface: &'a S) -> Self {
        surface.set_controls_locked(true);
        host.set_interaction_locked(true);
        Self { host, surface }
    }
}

impl<H: HostReader, S: ExportSurface> Drop for JobGuard<'_, H, S> {
    fn drop(&mut self) {
        self.host.set_interaction_locked(false);
        self.surface.set_controls_locked(false);
        self.surface.reset_progress();
    }
}

/// Runs export jobs against one reader.
///
/// Pages are visited strictly in ascending order: the reader has a single
/// current page, so there is never more than one navigation in flight.
pub struct Exporter<'a, H, F, S> {
    host: &'a H,
    saver: &'a F,
    surface: &'a S,
    options: ExportOptions,
}

impl<'a, H, F, S> Exporter<'a, H, F, S>
where
    H: HostReader + HostDocument,
    F: FileSaver,
    S: ExportSurface,
{
    pub fn new(host: &'a H, saver: &'a F, surface: &'a S, options: ExportOptions) -> Self {
        Self {
            host,
            saver,
            surface,
            options,
        }
    }

    /// Exports every page of `job` into one archive and saves it.
    ///
    /// Any failure aborts the whole job; nothing is saved in that case.
    pub async fn run_export(&self, job: ExportJob, cancel: &CancellationToken) -> Result<Archive> {
        let _guard = JobGuard::acquire(self.host, self.surface);

        let result = self.export_pages(job, cancel).await;
        if let Err(err) = &result {
            error!("Export aborted: {err}");
            self.surface.report_failure(err);
        }
        result
    }

    async fn export_pages(&self, mut job: ExportJob, cancel: &CancellationToken) -> Result<Archive> {
        info!(
            "Exporting {} pages ({}) to {}",
            job.total_pages(),
            job.intervals(),
            job.archive_name()
        );

        let navigator = PageNavigator::new(self.host, self.options.navigation);
        let mut builder = ArchiveBuilder::new(self.options.compression);
        let pages: Vec<u32> = job.intervals().pages().collect();

        for page in pages {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }

            let spec = navigator.go_to_page(page, cancel).await?;
            let composited = composite_page(&spec, &self.options.composite)?;
            let name = builder.add(composited);

            let percent = job.record_page();
            info!("Added {name} ({percent}%)");
            self.surface.report_progress(&Progress::Pages {
                completed: job.completed_pages(),
                total: job.total_pages(),
                percent,
            });

            // Compositing is synchronous; let other tasks run between pages.
            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let entries = builder.entry_names();
        let bytes = builder.finish(|percent| {
            self.surface
                .report_progress(&Progress::Finalizing { percent });
        })?;

        let path = self.saver.save(job.archive_name(), &bytes)?;
        self.surface
            .report_progress(&Progress::Saved { path: path.clone() });

        Ok(Archive {
            file_name: job.archive_name().to_string(),
            entries,
            size: bytes.len(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemorySaver, RecordingSurface, SimulatedReader, SurfaceEvent};

    #[tokio::test(start_paused = true)]
    async fn test_guard_releases_after_success() {
        let host = SimulatedReader::new(3);
        let saver = MemorySaver::new();
        let surface = RecordingSurface::new();
        let exporter = Exporter::new(&host, &saver, &surface, ExportOptions::default());

        let job = ExportJob::new(crate::range::parse_ranges("1", 3).unwrap(), "one.zip");
        exporter
            .run_export(job, &CancellationToken::new())
            .await
            .unwrap();

        let events = surface.events();
        assert_eq!(events.first(), Some(&SurfaceEvent::ControlsLocked(true)));
        assert_eq!(
            &events[events.len() - 2..],
            &[SurfaceEvent::ControlsLocked(false), SurfaceEvent::ProgressReset]
        );
        assert_eq!(host.lock_history(), vec![true, false]);
    }

    #[test]
    fn test_options_follow_settings() {
        let mut settings = Settings::default();
        settings.tiles_per_page = 4;
        settings.jpeg_quality = 90;
        settings.navigation.timeout_ms = 1500;

        let options = ExportOptions::from_settings(&settings);
        assert_eq!(options.navigation.tiles_per_page, 4);
        assert_eq!(options.composite.expected_tiles, 4);
        assert_eq!(options.composite.jpeg_quality, 90);
        assert_eq!(options.navigation.timeout.as_millis(), 1500);
    }
}
