//! Formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use mbl_core::ProgressEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One status line for a progress event.
pub fn event_line(event: &ProgressEvent) -> String {
    format!("==> {}", event.message)
}

/// Print progress events until every emitter is dropped.
pub fn print_events(mut rx: broadcast::Receiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("{}", event_line(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbl_core::EventEmitter;

    #[test]
    fn test_format_bytes_zero() {
        assert_eq!(format_bytes(0), "0 B");
    }

    #[test]
    fn test_format_bytes_small() {
        assert_eq!(format_bytes(1), "1 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_kilobytes() {
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
    }

    #[test]
    fn test_format_bytes_megabytes() {
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(100 * 1048576), "100.0 MB");
    }

    #[test]
    fn test_format_bytes_gigabytes() {
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_new_table_with_rows() {
        let mut table = new_table(&["ENDPOINT", "ARCH"]);
        table.add_row(["tcp://resin.local:2375", "aarch64"]);
        let output = table.to_string();
        assert!(output.contains("ENDPOINT"));
        assert!(output.contains("tcp://resin.local:2375"));
        assert!(output.contains("aarch64"));
    }

    #[test]
    fn test_event_line() {
        let event = ProgressEvent::new("build.started", "Building mbed-app from .");
        assert_eq!(event_line(&event), "==> Building mbed-app from .");
    }

    #[tokio::test]
    async fn test_print_events_stops_when_emitters_drop() {
        let emitter = EventEmitter::default();
        let printer = print_events(emitter.subscribe());
        emitter.message("build.started", "Building");
        drop(emitter);
        printer.await.unwrap();
    }
}
