//! Per-request access log.
//!
//! One CSV line per completed request:
//!
//! ```text
//! unixTimestamp,requestURI,clientIP,referer,statusCode,bytesWritten,userID,durationNanoseconds
//! ```
//!
//! Every write takes the sink's lock, appends one line, flushes and releases.
//! There is no batching, so a killed process loses at most the request that
//! was being written. Write failures never reach the request path; they are
//! reported through `tracing` and the failure counter instead.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::observability::metrics;

/// Suffix of the daily access log file, e.g. `2024-05-01.http.txt`.
pub const ACCESS_LOG_SUFFIX: &str = "http.txt";

/// One completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogRecord {
    /// Seconds since the Unix epoch at completion.
    pub timestamp: i64,
    /// Path and query as requested.
    pub uri: String,
    /// `X-Real-Ip`, first `X-Forwarded-For` hop, or the peer address.
    pub client_ip: String,
    /// Empty when the request carried none.
    pub referer: String,
    pub status: u16,
    /// Body bytes sent to the client.
    pub bytes_written: u64,
    /// 0 for anonymous requests.
    pub user_id: u64,
    /// From request arrival until the body finished.
    pub duration: Duration,
}

impl AccessLogRecord {
    /// Serialize as a single CSV line, terminated by `\n`.
    pub fn to_csv_line(&self) -> String {
        let mut line = String::with_capacity(64 + self.uri.len() + self.referer.len());
        let _ = write!(line, "{},", self.timestamp);
        push_field(&mut line, &self.uri);
        line.push(',');
        push_field(&mut line, &self.client_ip);
        line.push(',');
        push_field(&mut line, &self.referer);
        let nanos = u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = writeln!(
            line,
            ",{},{},{},{}",
            self.status, self.bytes_written, self.user_id, nanos
        );
        line
    }
}

fn needs_quotes(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    field.contains([',', '"', '\r', '\n']) || field.starts_with(char::is_whitespace)
}

fn push_field(line: &mut String, field: &str) {
    if !needs_quotes(field) {
        line.push_str(field);
        return;
    }
    line.push('"');
    for c in field.chars() {
        if c == '"' {
            line.push('"');
        }
        line.push(c);
    }
    line.push('"');
}

/// Mutex-guarded, append-only access log shared by all request tasks.
#[derive(Clone)]
pub struct AccessLogSink {
    target: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl AccessLogSink {
    /// Open a sink writing to `<dir>/<YYYY-MM-DD>.http.txt`, rotated daily (UTC).
    pub fn daily(dir: &Path) -> io::Result<Self> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_suffix(ACCESS_LOG_SUFFIX)
            .build(dir)
            .map_err(io::Error::other)?;
        tracing::info!(dir = %dir.display(), "Access log opened");
        Ok(Self::from_writer(appender))
    }

    /// Wrap an arbitrary writer.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            target: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Append one record. Never fails from the caller's point of view.
    pub fn write(&self, record: &AccessLogRecord) {
        let line = record.to_csv_line();
        let result = {
            let mut target = self.target.lock();
            target
                .write_all(line.as_bytes())
                .and_then(|()| target.flush())
        };
        if let Err(e) = result {
            metrics::record_access_log_failure();
            tracing::error!(error = %e, uri = %record.uri, "Failed to write access log record");
        }
    }
}

impl std::fmt::Debug for AccessLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogSink").finish_non_exhaustive()
    }
}
