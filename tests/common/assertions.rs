//! Custom test assertions for end-to-end tests

use gallery_export::{ArchiveDownload, ExportEvent, StreamOutcome};
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::mpsc;

/// How an export's event stream ended
#[derive(Debug)]
pub enum WaitResult {
    /// `download_ready` received
    Ready(ExportEvent),
    /// `error` received
    Failed(String),
    /// Stream closed without a terminal event
    ChannelClosed,
    /// Timeout waiting for a terminal event
    Timeout,
}

/// Read export events until a terminal one, collecting everything seen
pub async fn wait_for_terminal(
    events: &mut mpsc::Receiver<ExportEvent>,
    timeout: Duration,
) -> (WaitResult, Vec<ExportEvent>) {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            seen.push(event.clone());
            match event {
                ExportEvent::DownloadReady { .. } => return WaitResult::Ready(event),
                ExportEvent::Error { message } => return WaitResult::Failed(message),
                _ => continue,
            }
        }
        WaitResult::ChannelClosed
    })
    .await;

    (result.unwrap_or(WaitResult::Timeout), seen)
}

/// Drain a download into memory, returning its bytes and outcome
pub async fn collect_download(mut download: ArchiveDownload) -> (Vec<u8>, StreamOutcome) {
    let mut bytes = Vec::new();
    while let Some(chunk) = download.body.recv().await {
        match chunk {
            Ok(data) => bytes.extend(data),
            Err(e) => panic!("archive stream failed: {}", e),
        }
    }
    let outcome = match download.handle.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => panic!("download failed: {}", e),
        Err(e) => panic!("download task panicked: {}", e),
    };
    (bytes, outcome)
}

/// Entry names of a ZIP archive, in archive order
pub fn archive_entries(bytes: &[u8]) -> Vec<String> {
    let mut archive = match zip::ZipArchive::new(Cursor::new(bytes.to_vec())) {
        Ok(archive) => archive,
        Err(e) => panic!("not a readable ZIP archive: {}", e),
    };
    (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .collect()
}
