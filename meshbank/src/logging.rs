//! Log outputs.
//!
//! Diagnostics go through `tracing` to stderr. The event log and the pipes
//! log are plain append-only text files shared by every participant process;
//! each line is written with a single `write` so lines from different
//! processes do not interleave.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use meshbank_core::ParticipantId;
use meshbank_transport::{ChannelDescriptor, ChannelTable};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::RunError;
use crate::events::{EventSink, LedgerEvent};

/// Install the global subscriber: `RUST_LOG` filter (default `info`), fmt to stderr.
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(io::stderr),
        )
        .try_init();
}

fn open_append(path: &Path) -> Result<File, RunError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RunError::Output {
            path: path.display().to_string(),
            source,
        })
}

fn write_line(mut file: &File, line: &str) -> io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
}

/// The classic event log: one line per event, appended to a file and echoed to stdout.
#[derive(Debug)]
pub struct EventLog {
    file: Option<(PathBuf, File)>,
    echo: bool,
}

impl EventLog {
    /// Open `path` for appending; `None` only echoes to stdout.
    pub fn open(path: Option<&Path>) -> Result<Self, RunError> {
        let file = match path {
            Some(path) => Some((path.to_path_buf(), open_append(path)?)),
            None => None,
        };
        Ok(Self { file, echo: true })
    }

    /// Stop echoing to stdout.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl EventSink for EventLog {
    fn record(&self, event: &LedgerEvent) {
        let line = event.to_string();
        if let Some((path, file)) = &self.file {
            if let Err(e) = write_line(file, &line) {
                tracing::warn!(path = %path.display(), error = %e, "failed to append event");
            }
        }
        if self.echo {
            let mut stdout = io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
                tracing::warn!(error = %e, "failed to echo event");
            }
        }
        tracing::debug!(participant = %event.participant(), time = event.time(), "event recorded");
    }
}

/// Record of every descriptor the fabric created and each participant kept.
#[derive(Debug)]
pub struct PipesLog {
    path: PathBuf,
    file: File,
}

impl PipesLog {
    /// Open `path` for appending.
    pub fn open(path: &Path) -> Result<Self, RunError> {
        Ok(Self {
            path: path.to_path_buf(),
            file: open_append(path)?,
        })
    }

    fn line(&self, line: &str) {
        if let Err(e) = write_line(&self.file, line) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append to pipes log");
        }
    }

    /// Log every channel of a freshly built fabric.
    pub fn record_fabric(&self, descriptors: &[ChannelDescriptor]) {
        for d in descriptors.iter().filter(|d| d.owner < d.peer) {
            self.line(&format!(
                "[fabric] open duplex channel between processes {} and {}",
                d.owner, d.peer
            ));
        }
        for d in descriptors {
            self.line(&format!(
                "[fabric] process {} to {}: read_fd={} write_fd={}",
                d.owner, d.peer, d.read_fd, d.write_fd
            ));
        }
    }

    /// Log the descriptors `table`'s owner kept after releasing the others.
    pub fn record_retained(&self, table: &ChannelTable) {
        for d in table.descriptors() {
            self.line(&format!(
                "[retain] process {} keeps channel to {} (read_fd={} write_fd={})",
                d.owner, d.peer, d.read_fd, d.write_fd
            ));
        }
    }

    /// Log that `owner` closed its channels at exit.
    pub fn record_closed(&self, owner: ParticipantId, peers: usize) {
        self.line(&format!(
            "[close] process {owner} closes its {peers} channels"
        ));
    }
}

#[cfg(test)]
mod tests {
    use meshbank_transport::ChannelFabric;

    use super::*;

    #[test]
    fn test_event_log_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.log");
        let log = EventLog::open(Some(&path)).expect("open").without_echo();
        let id = ParticipantId::new(1);
        log.record(&LedgerEvent::ReceivedAllStarted { time: 2, id });
        log.record(&LedgerEvent::ReceivedAllDone { time: 8, id });
        drop(log);

        // A second writer appends instead of truncating.
        let log = EventLog::open(Some(&path)).expect("reopen").without_echo();
        log.record(&LedgerEvent::Done { time: 9, id, balance: 4 });

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "2: process 1 received all STARTED messages\n\
             8: process 1 received all DONE messages\n\
             9: process 1 has DONE with balance $ 4\n"
        );
    }

    #[test]
    fn test_pipes_log_lists_channels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipes.log");
        let log = PipesLog::open(&path).expect("open");

        let fabric = ChannelFabric::build(3).expect("fabric");
        log.record_fabric(&fabric.descriptors());
        let table = fabric
            .into_table(ParticipantId::new(1))
            .expect("table");
        log.record_retained(&table);
        log.record_closed(table.owner(), 2);

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("open duplex channel").count(), 3);
        assert_eq!(text.matches("[retain] process 1").count(), 2);
        assert!(text.contains("[close] process 1 closes its 2 channels"));
    }
}
