//! Packet-line listener.
//!
//! Some stations only talk to a fixed cloud endpoint. Their uploads can
//! still be picked up off the wire by an external capture tool that prints
//! one request per line (for example `tcpdump -l -A`). The listener reads
//! those lines from a [`PacketSource`], keeps the ones that look like
//! reports, cuts the encoded payload out and feeds it to the common
//! ingestion pipeline.
//!
//! The source is reopened after it ends or fails, so a restarted capture
//! tool or a re-created FIFO is picked up again.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use weather_types::{extract_payload, looks_like_telemetry};

use crate::config::PacketSourceConfig;
use crate::ingest::{IngestOutcome, ingest};
use crate::state::AppState;

/// Longest line accepted from a capture source.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Lines produced by one opening of a [`PacketSource`].
pub type LineStream = BoxStream<'static, io::Result<String>>;

/// A restartable source of captured text lines.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Start a fresh sequence of lines.
    async fn open(&self) -> io::Result<LineStream>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Reads lines from a file or FIFO.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PacketSource for FileSource {
    async fn open(&self) -> io::Result<LineStream> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(lines(file))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Runs a capture command and reads its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    /// Create a source from an argv list. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl PacketSource for CommandSource {
    async fn open(&self) -> io::Result<LineStream> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("capture command has no stdout"))?;

        // The stream owns the child; dropping the stream kills the command.
        let stream = lines(stdout).map(move |line| {
            let _ = &child;
            line
        });
        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        format!("command {} {}", self.program, self.args.join(" "))
    }
}

fn lines<R: AsyncRead + Send + 'static>(reader: R) -> LineStream {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
        .filter_map(|line| async move {
            match line {
                Ok(line) => Some(Ok(line)),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    debug!("Skipping capture line longer than {} bytes", MAX_LINE_LENGTH);
                    None
                }
                Err(LinesCodecError::Io(e)) => Some(Err(e)),
            }
        })
        .boxed()
}

/// Build the configured source.
pub fn source_from_config(config: &PacketSourceConfig) -> Option<Arc<dyn PacketSource>> {
    match config {
        PacketSourceConfig::File(path) => Some(Arc::new(FileSource::new(path.clone()))),
        PacketSourceConfig::Command(argv) => {
            CommandSource::from_argv(argv).map(|s| Arc::new(s) as Arc<dyn PacketSource>)
        }
    }
}

/// Counters for one pass over a line stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStats {
    /// Lines read.
    pub lines: usize,
    /// Lines that carried a report payload.
    pub reports: usize,
    /// Reports stored as new readings.
    pub stored: usize,
}

/// Feeds captured lines into the ingestion pipeline.
pub struct PacketListener {
    state: Arc<AppState>,
    source: Arc<dyn PacketSource>,
}

impl PacketListener {
    /// Create a listener over `source`.
    pub fn new(state: Arc<AppState>, source: Arc<dyn PacketSource>) -> Self {
        Self { state, source }
    }

    /// Decode and store a single captured line, if it carries a report.
    pub async fn handle_line(&self, line: &str) -> Option<IngestOutcome> {
        if !looks_like_telemetry(line) {
            return None;
        }
        let payload = extract_payload(line)?;
        let received_at = self.state.local_now();
        Some(
            ingest(
                &self.state,
                payload,
                self.state.config.ingest.packet_timestamp,
                received_at,
            )
            .await,
        )
    }

    /// Consume one opening of the source until it ends.
    ///
    /// An I/O error ends the pass like end-of-stream does; it is returned
    /// alongside the counters.
    pub async fn process(&self, mut lines: LineStream) -> (ListenerStats, Option<io::Error>) {
        let mut stats = ListenerStats::default();

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => return (stats, Some(e)),
            };
            stats.lines += 1;

            if let Some(outcome) = self.handle_line(&line).await {
                stats.reports += 1;
                if outcome.is_stored() {
                    stats.stored += 1;
                }
            }
        }

        (stats, None)
    }

    /// Run forever, reopening the source after it ends or fails.
    pub fn start(self) -> JoinHandle<()> {
        let delay = Duration::from_secs(self.state.config.ingest.restart_delay_secs);
        info!("Starting packet listener on {}", self.source.describe());

        tokio::spawn(async move {
            loop {
                match self.source.open().await {
                    Ok(lines) => {
                        let (stats, error) = self.process(lines).await;
                        match error {
                            Some(e) => warn!(
                                "Packet source {} failed after {} lines: {}",
                                self.source.describe(),
                                stats.lines,
                                e
                            ),
                            None => info!(
                                "Packet source {} ended ({} lines, {} reports, {} stored)",
                                self.source.describe(),
                                stats.lines,
                                stats.reports,
                                stats.stored
                            ),
                        }
                    }
                    Err(e) => warn!("Failed to open {}: {}", self.source.describe(), e),
                }
                tokio::time::sleep(delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed set of lines on every open.
    struct ScriptedSource {
        lines: Vec<&'static str>,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl PacketSource for ScriptedSource {
        async fn open(&self) -> io::Result<LineStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let lines: Vec<io::Result<String>> =
                self.lines.iter().map(|l| Ok(l.to_string())).collect();
            Ok(futures::stream::iter(lines).boxed())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    const CAPTURE: [&str; 5] = [
        "12:00:01.000 IP 192.168.1.50.43122 > 47.88.1.2.80: Flags [P.]",
        "E..,..@.@...",
        "GET /data/report/?PASSKEY=ABC&dateutc=2024-05-01+03:00:00&tempf=68&humidity=50 HTTP/1.1",
        "Host: rtpdata.ecowitt.net",
        "GET /data/report/?PASSKEY=ABC&dateutc=2024-05-01+03:00:00&tempf=68&humidity=50 HTTP/1.1",
    ];

    fn listener(lines: Vec<&'static str>) -> (tempfile::TempDir, PacketListener) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("weather.db");
        let state = AppState::open(config, None).unwrap();
        let source = Arc::new(ScriptedSource {
            lines,
            opens: AtomicUsize::new(0),
        });
        (dir, PacketListener::new(state, source))
    }

    #[tokio::test]
    async fn test_process_stores_each_report_once() {
        let (_dir, listener) = listener(CAPTURE.to_vec());
        let lines = listener.source.open().await.unwrap();

        let (stats, error) = listener.process(lines).await;
        assert!(error.is_none());
        assert_eq!(
            stats,
            ListenerStats {
                lines: 5,
                reports: 2,
                stored: 1
            }
        );

        // Packet lines use the device clock: 03:00 UTC + 7h.
        let latest = listener
            .state
            .db
            .run(|store| store.latest())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            latest.reading.timestamp,
            time::macros::datetime!(2024-05-01 10:00:00)
        );
        assert_eq!(latest.reading.passkey, "ABC");
    }

    #[tokio::test]
    async fn test_handle_line_ignores_noise() {
        let (_dir, listener) = listener(Vec::new());
        assert!(listener.handle_line("Host: example.com").await.is_none());
        // Marker present but no payload anchor.
        assert!(listener.handle_line("humidity=50 only").await.is_none());
    }

    #[tokio::test]
    async fn test_process_stops_on_io_error() {
        let (_dir, listener) = listener(Vec::new());
        let lines: LineStream = futures::stream::iter(vec![
            Ok("tempf=70&humidity=40".to_string()),
            Err(io::Error::other("capture died")),
            Ok("tempf=71&humidity=41".to_string()),
        ])
        .boxed();

        let (stats, error) = listener.process(lines).await;
        assert_eq!(stats.lines, 1);
        assert_eq!(error.unwrap().to_string(), "capture died");
    }

    #[tokio::test]
    async fn test_file_source_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.txt");
        std::fs::write(&path, CAPTURE.join("\n")).unwrap();

        let source = FileSource::new(&path);
        let lines: Vec<String> = source
            .open()
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines.len(), 5);
        assert!(lines[2].starts_with("GET /data/report/"));

        // Reopening starts over.
        let again: Vec<_> = source.open().await.unwrap().collect().await;
        assert_eq!(again.len(), 5);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("/nonexistent/capture.fifo");
        assert!(source.open().await.is_err());
        assert!(source.describe().contains("/nonexistent/capture.fifo"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_source_reads_stdout() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'tempf=70&humidity=40'; echo other".to_string(),
        ];
        let source = CommandSource::from_argv(&argv).unwrap();
        let lines: Vec<String> = source
            .open()
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["tempf=70&humidity=40", "other"]);
    }

    #[test]
    fn test_source_from_config() {
        assert!(source_from_config(&PacketSourceConfig::Command(Vec::new())).is_none());
        let source =
            source_from_config(&PacketSourceConfig::File(PathBuf::from("/tmp/x"))).unwrap();
        assert_eq!(source.describe(), "file /tmp/x");
    }
}
