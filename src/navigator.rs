//! Drives the reader to a page and waits until its tiles are loaded.
//!
//! The reader keeps only a window of pages around the current one rendered,
//! so the container is looked up again after every wake-up. Wake-ups come from
//! the reader's render notifications when it has them, and from a poll timer
//! otherwise. The whole wait is bounded by a single deadline.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::compositor::{DEFAULT_TILES_PER_PAGE, PageSpec};
use crate::error::{ExportError, Result, TileDefect};
use crate::host::{HostDocument, HostReader, page_container_id};

/// Wake-up interval while render notifications are available; they are a hint,
/// the container is still re-checked on this timer.
const EVENT_FALLBACK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub tiles_per_page: usize,
}

impl Default for NavigatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            tiles_per_page: DEFAULT_TILES_PER_PAGE,
        }
    }
}

pub struct PageNavigator<'a, H> {
    host: &'a H,
    options: NavigatorOptions,
    events: Option<flume::Receiver<u32>>,
}

impl<'a, H: HostReader + HostDocument> PageNavigator<'a, H> {
    pub fn new(host: &'a H, options: NavigatorOptions) -> Self {
        let events = host.render_events();
        if events.is_none() {
            debug!(
                "Host has no render notifications, polling every {:?}",
                options.poll_interval
            );
        }
        Self {
            host,
            options,
            events,
        }
    }

    /// Moves the reader to one-based `page` and resolves with the page as
    /// rendered once all of its tiles have loaded.
    ///
    /// Fails with `PageLoadTimeout` when the page never becomes ready within
    /// the wait budget, or with `IncompleteTile` when it rendered with a tile
    /// layout that cannot be composited.
    pub async fn go_to_page(&self, page: u32, cancel: &CancellationToken) -> Result<PageSpec> {
        let total = self.host.total_pages();
        if page == 0 || page > total {
            return Err(ExportError::host(format!(
                "page {page} is outside the comic (1-{total})"
            )));
        }

        self.drain_stale_events();
        self.host.move_to(page - 1)?;

        let started = Instant::now();
        let deadline = started + self.options.timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }

            let defect = match self.observe(page) {
                Ok(spec) => {
                    info!("Page {page} ready after {:?}", started.elapsed());
                    return Ok(spec);
                }
                Err(defect) => defect,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(self.give_up(page, defect, now - started));
            }
            debug!("Page {page} not ready: {defect}");

            let pause = self.wake_interval().min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExportError::Cancelled),
                _ = self.wait_for_render(page, pause) => {}
            }
        }
    }

    /// Current state of `page` in the host document.
    pub fn observe(&self, page: u32) -> std::result::Result<PageSpec, TileDefect> {
        let markup = self
            .host
            .query_container(&page_container_id(page))
            .ok_or(TileDefect::MissingContainer)?;
        let spec = markup.to_page_spec(page)?;
        spec.validate(self.options.tiles_per_page)?;
        Ok(spec)
    }

    fn wake_interval(&self) -> Duration {
        if self.events.is_some() {
            self.options.poll_interval.max(EVENT_FALLBACK_INTERVAL)
        } else {
            self.options.poll_interval
        }
    }

    async fn wait_for_render(&self, page: u32, pause: Duration) {
        let Some(events) = &self.events else {
            tokio::time::sleep(pause).await;
            return;
        };

        let _ = tokio::time::timeout(pause, async {
            while let Ok(rendered) = events.recv_async().await {
                if rendered == page {
                    return;
                }
            }
            // Host dropped its sender; only the timer is left.
            std::future::pending::<()>().await;
        })
        .await;
    }

    fn drain_stale_events(&self) {
        if let Some(events) = &self.events {
            let stale = events.drain().count();
            if stale > 0 {
                debug!("Dropped {stale} stale render notifications");
            }
        }
    }

    // A page that never showed up or never finished loading timed out. One
    // that rendered with some other tile layout is reported as such.
    fn give_up(&self, page: u32, defect: TileDefect, waited: Duration) -> ExportError {
        match defect {
            TileDefect::MissingContainer | TileDefect::NotLoaded { .. } => {
                warn!("Page {page} did not render within {waited:?}: {defect}");
                ExportError::PageLoadTimeout { page, waited }
            }
            defect => {
                warn!("Page {page} rendered with an unexpected layout: {defect}");
                ExportError::IncompleteTile { page, defect }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_utils::{RenderScript, SimulatedReader};

    fn options() -> NavigatorOptions {
        NavigatorOptions {
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
            tiles_per_page: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_once_tiles_load() {
        let host = SimulatedReader::new(10).with_script(4, RenderScript::AfterPolls(3));
        let navigator = PageNavigator::new(&host, options());

        let spec = navigator
            .go_to_page(4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(spec.page_number, 4);
        assert_eq!(spec.tiles.len(), 3);
        assert_eq!(host.moves(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_page_never_renders() {
        let host = SimulatedReader::new(10).with_script(2, RenderScript::Never);
        let navigator = PageNavigator::new(&host, options());

        let started = Instant::now();
        let err = navigator
            .go_to_page(2, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::PageLoadTimeout { page: 2, .. }));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiles_that_never_load_time_out() {
        let host = SimulatedReader::new(10).with_script(2, RenderScript::Unloaded);
        let navigator = PageNavigator::new(&host, options());

        let err = navigator
            .go_to_page(2, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::PageLoadTimeout { page: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_layout_is_reported_as_incomplete_tiles() {
        let host = SimulatedReader::new(10).with_script(5, RenderScript::TileCount(4));
        let navigator = PageNavigator::new(&host, options());

        let err = navigator
            .go_to_page(5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::IncompleteTile {
                page: 5,
                defect: TileDefect::Count {
                    expected: 3,
                    found: 4
                }
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_notifications_wake_the_wait() {
        let host = SimulatedReader::new(10)
            .with_render_events()
            .with_script(7, RenderScript::AfterPolls(1));
        let navigator = PageNavigator::new(&host, options());

        let started = Instant::now();
        let spec = navigator
            .go_to_page(7, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(spec.page_number, 7);
        // The notification queued by the move wakes the wait at once.
        assert!(started.elapsed() < options().poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_notification_ends_the_wait_before_the_timer() {
        let host = Arc::new(
            SimulatedReader::new(10)
                .with_render_events()
                .with_script(7, RenderScript::WhenNotified),
        );
        let navigator = PageNavigator::new(&*host, options());

        let renderer = Arc::clone(&host);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            renderer.notify_rendered(7);
        });

        let started = Instant::now();
        let spec = navigator
            .go_to_page(7, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(spec.page_number, 7);
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert!(
            started.elapsed() < Duration::from_millis(150),
            "woke after {:?}",
            started.elapsed()
        );
        // One lookup before waiting, one after the notification.
        assert_eq!(host.lookups(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_for_another_page_keeps_waiting() {
        let host = Arc::new(
            SimulatedReader::new(10)
                .with_render_events()
                .with_script(7, RenderScript::WhenNotified),
        );
        let navigator = PageNavigator::new(&*host, options());

        let renderer = Arc::clone(&host);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            renderer.notify_rendered(6);
            tokio::time::sleep(Duration::from_millis(280)).await;
            renderer.notify_rendered(7);
        });

        let started = Instant::now();
        navigator
            .go_to_page(7, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < EVENT_FALLBACK_INTERVAL);
        assert_eq!(host.lookups(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_still_rechecks_without_a_notification() {
        let host = Arc::new(
            SimulatedReader::new(10)
                .with_render_events()
                .with_script(2, RenderScript::WhenNotified),
        );
        let navigator = PageNavigator::new(&*host, options());

        // Rendered, but the notification was never delivered.
        let renderer = Arc::clone(&host);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            renderer.render_without_notice(2);
        });

        let started = Instant::now();
        navigator
            .go_to_page(2, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= EVENT_FALLBACK_INTERVAL);
        assert!(started.elapsed() < EVENT_FALLBACK_INTERVAL + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_the_wait() {
        let host = SimulatedReader::new(10).with_script(3, RenderScript::Never);
        let navigator = PageNavigator::new(&host, options());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = navigator.go_to_page(3, &cancel).await.unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_outside_comic_is_rejected_without_moving() {
        let host = SimulatedReader::new(3);
        let navigator = PageNavigator::new(&host, options());

        let err = navigator
            .go_to_page(4, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Host(_)));
        assert!(host.moves().is_empty());
    }
}
