use std::io::{Cursor, Read};
use std::time::Duration;

use image::{Rgb, RgbImage};
use speedbinb_export::export::{
    DirectorySaver, ExportJob, ExportOptions, ExportRequest, Exporter, Progress,
};
use speedbinb_export::host::HostReader;
use speedbinb_export::host::snapshot::{SESSION_FILENAME, SnapshotReader};
use speedbinb_export::navigator::NavigatorOptions;
use speedbinb_export::test_utils::{
    MemorySaver, PAGE_HEIGHT, PAGE_WIDTH, RecordingSurface, RenderScript, SimulatedReader,
    SurfaceEvent, tile_color,
};
use speedbinb_export::{ExportError, TileDefect};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn options() -> ExportOptions {
    ExportOptions {
        navigation: NavigatorOptions {
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
            tiles_per_page: 3,
        },
        ..ExportOptions::default()
    }
}

fn job_for(pages: &str, name: &str, host: &SimulatedReader) -> ExportJob {
    let request = ExportRequest {
        pages: pages.to_string(),
        all_pages: false,
        archive_name: name.to_string(),
    };
    let title = host.title();
    ExportJob::from_request(&request, host.total_pages(), title.as_deref()).unwrap()
}

fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

fn assert_released(surface: &RecordingSurface, host: &SimulatedReader) {
    let events = surface.events();
    assert_eq!(events.first(), Some(&SurfaceEvent::ControlsLocked(true)));
    let tail = &events[events.len() - 2..];
    assert_eq!(
        tail,
        &[SurfaceEvent::ControlsLocked(false), SurfaceEvent::ProgressReset]
    );
    assert_eq!(host.lock_history(), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_two_page_export_end_to_end() {
    let host = SimulatedReader::new(10)
        .with_title("Test Comic")
        .with_default_script(RenderScript::AfterPolls(2));
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let archive = exporter
        .run_export(job_for("2-3", "", &host), &CancellationToken::new())
        .await
        .unwrap();

    // Zero-based navigation indices, one per page, in ascending order.
    assert_eq!(host.moves(), vec![1, 2]);
    assert_eq!(archive.file_name, "Test Comic.zip");
    assert_eq!(archive.entries, vec!["2.jpeg", "3.jpeg"]);
    assert_eq!(surface.page_percents(), vec![50, 100]);

    let saved = saver.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "Test Comic.zip");
    assert_eq!(archive.size, saved[0].1.len());

    let entries = unzip(&saved[0].1);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "2.jpeg");
    assert_eq!(entries[1].0, "3.jpeg");

    let page = image::load_from_memory(&entries[1].1).unwrap().to_rgb8();
    assert_eq!(page.dimensions(), (PAGE_WIDTH, PAGE_HEIGHT));
    // Middle of the bottom band carries page 3's third tile color.
    let pixel = page.get_pixel(PAGE_WIDTH / 2, PAGE_HEIGHT - 5).0;
    let expected = tile_color(3, 2).0;
    for channel in 0..3 {
        assert!(
            pixel[channel].abs_diff(expected[channel]) < 12,
            "{pixel:?} vs {expected:?}"
        );
    }

    assert!(surface.events().iter().any(|event| matches!(
        event,
        SurfaceEvent::Progress(Progress::Finalizing { percent: 100 })
    )));
    assert!(
        surface
            .events()
            .iter()
            .any(|event| matches!(event, SurfaceEvent::Progress(Progress::Saved { .. })))
    );
    assert_released(&surface, &host);
}

#[tokio::test(start_paused = true)]
async fn test_pages_follow_interval_order() {
    let host = SimulatedReader::new(20);
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let archive = exporter
        .run_export(job_for("11-12, 3, 5-6, 4", "mix", &host), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(host.moves(), vec![2, 3, 4, 5, 10, 11]);
    assert_eq!(
        archive.entries,
        vec!["3.jpeg", "4.jpeg", "5.jpeg", "6.jpeg", "11.jpeg", "12.jpeg"]
    );
    assert_eq!(surface.page_percents(), vec![17, 33, 50, 67, 83, 100]);
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout_fails_the_job() {
    let host = SimulatedReader::new(10).with_script(3, RenderScript::Never);
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let err = exporter
        .run_export(job_for("2-4", "x", &host), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::PageLoadTimeout { page: 3, .. }));
    // Page 4 is never attempted and nothing is saved.
    assert_eq!(host.moves(), vec![1, 2]);
    assert!(saver.saved().is_empty());
    assert_eq!(surface.page_percents(), vec![33]);
    assert!(
        surface
            .events()
            .iter()
            .any(|event| matches!(event, SurfaceEvent::Failure(msg) if msg.contains("page 3")))
    );
    assert_released(&surface, &host);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_tile_layout_fails_the_job() {
    let host = SimulatedReader::new(5).with_script(1, RenderScript::TileCount(2));
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let err = exporter
        .run_export(job_for("1", "x", &host), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExportError::IncompleteTile {
            page: 1,
            defect: TileDefect::Count {
                expected: 3,
                found: 2
            }
        }
    ));
    assert!(saver.saved().is_empty());
    assert_released(&surface, &host);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_releases_controls() {
    let host = SimulatedReader::new(10);
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = exporter
        .run_export(job_for("1-3", "x", &host), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Cancelled));
    assert!(host.moves().is_empty());
    assert!(saver.saved().is_empty());
    assert_released(&surface, &host);
}

#[tokio::test(start_paused = true)]
async fn test_save_failure_fails_the_job() {
    let host = SimulatedReader::new(3);
    let saver = MemorySaver::failing(std::io::ErrorKind::PermissionDenied);
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let err = exporter
        .run_export(job_for("1-2", "x", &host), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Save { .. }));
    assert_released(&surface, &host);
}

#[tokio::test(start_paused = true)]
async fn test_event_driven_host() {
    let host = SimulatedReader::new(4)
        .with_render_events()
        .with_default_script(RenderScript::AfterPolls(1));
    let saver = MemorySaver::new();
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&host, &saver, &surface, options());

    let started = tokio::time::Instant::now();
    let archive = exporter
        .run_export(job_for("", "all", &host), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(archive.entries.len(), 4);
    assert_eq!(surface.page_percents(), vec![25, 50, 75, 100]);
    // Every page was woken by its notification, none by a timer.
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "took {:?}",
        started.elapsed()
    );
}

fn write_snapshot(dir: &std::path::Path, pages: u32) {
    let (width, height, tile_height) = (30u32, 60u32, 22u32);
    let mut page_json = Vec::new();
    for page in 1..=pages {
        let mut tiles = Vec::new();
        for (idx, top) in ["0%", "33.3333%", "66.6667%"].iter().enumerate() {
            let name = format!("tile-{page}-{idx}.png");
            RgbImage::from_pixel(width, tile_height, Rgb([40 * idx as u8, 200, 10]))
                .save(dir.join(&name))
                .unwrap();
            tiles.push(format!(r#"{{"top":"{top}","src":"{name}"}}"#));
        }
        page_json.push(format!(
            r#"{{"width":{width},"height":{height},"tiles":[{}]}}"#,
            tiles.join(",")
        ));
    }
    std::fs::write(
        dir.join(SESSION_FILENAME),
        format!(
            r#"{{"title":"Snapshot: Vol 1","pages":[{}]}}"#,
            page_json.join(",")
        ),
    )
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_session_export_to_directory() {
    let session = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_snapshot(session.path(), 6);

    let reader = SnapshotReader::open(session.path()).unwrap().with_window(1);
    let saver = DirectorySaver::new(output.path());
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&reader, &saver, &surface, options());

    let request = ExportRequest {
        pages: "5-6, 1".to_string(),
        all_pages: false,
        archive_name: String::new(),
    };
    let title = reader.title();
    let job = ExportJob::from_request(&request, reader.total_pages(), title.as_deref()).unwrap();

    let archive = exporter
        .run_export(job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(archive.path, output.path().join("Snapshot_ Vol 1.zip"));
    assert!(!reader.is_interaction_locked());

    let bytes = std::fs::read(&archive.path).unwrap();
    let entries = unzip(&bytes);
    let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["1.jpeg", "5.jpeg", "6.jpeg"]);

    let page = image::load_from_memory(&entries[2].1).unwrap();
    assert_eq!((page.width(), page.height()), (30, 60));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_snapshot_tile_fails_without_waiting() {
    let session = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_snapshot(session.path(), 3);
    std::fs::write(session.path().join("tile-2-1.png"), b"truncated").unwrap();

    let reader = SnapshotReader::open(session.path()).unwrap().with_window(0);
    let saver = DirectorySaver::new(output.path());
    let surface = RecordingSurface::new();
    let exporter = Exporter::new(&reader, &saver, &surface, options());

    let request = ExportRequest {
        pages: "1-3".to_string(),
        all_pages: false,
        archive_name: "broken".to_string(),
    };
    let job = ExportJob::from_request(&request, reader.total_pages(), None).unwrap();

    let started = tokio::time::Instant::now();
    let err = exporter
        .run_export(job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, ExportError::Host(msg) if msg.contains("page 2")), "{err}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(surface.page_percents(), vec![33]);
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
    assert!(!reader.is_interaction_locked());
}
