// access_log.rs - Per-host access logging
// Entries are queued on an unbounded channel and appended to
// `<dir>/<host>.access.log` and `<dir>/.access.log` by a writer task.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use log::{info, warn};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::hostname;
use super::http_request::HttpRequest;

/// File that receives every entry regardless of host
const COMBINED_LOG: &str = ".access.log";

/// One served request
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    pub client_ip: IpAddr,
    pub timestamp: DateTime<FixedOffset>,
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub protocol: String,
    pub status: u16,
    pub bytes: usize,
    pub referer: String,
    pub user_agent: String,
}

impl AccessLogEntry {
    /// Build an entry for a request answered now
    pub fn new(request: &HttpRequest, client_ip: IpAddr, status: u16, bytes: usize) -> Self {
        Self {
            client_ip,
            timestamp: Local::now().fixed_offset(),
            method: request.method.as_str().to_string(),
            host: request.host().unwrap_or("").to_string(),
            path: request.path().to_string(),
            query: request.query().to_string(),
            protocol: request.version.to_string(),
            status,
            bytes,
            referer: request.header("referer").unwrap_or("").to_string(),
            user_agent: request.header("user-agent").unwrap_or("").to_string(),
        }
    }

    /// `ip - [local_time] "method host path query protocol" status bytes "referer" "user_agent"`
    pub fn format_line(&self) -> String {
        format!(
            "{} - [{}] \"{} {} {} {} {}\" {} {} \"{}\" \"{}\"",
            self.client_ip,
            self.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.host,
            self.path,
            self.query,
            self.protocol,
            self.status,
            self.bytes,
            self.referer,
            self.user_agent,
        )
    }

    /// Per-host log file name; hosts that are not valid names share one file
    fn file_name(&self) -> String {
        match hostname::canonicalize(&self.host) {
            Ok(host) => format!("{}.access.log", host),
            Err(_) => "_invalid-host.access.log".to_string(),
        }
    }
}

/// Handle used on the request path; never blocks
#[derive(Debug, Clone)]
pub struct AccessLog {
    sender: mpsc::UnboundedSender<AccessLogEntry>,
}

impl AccessLog {
    /// Start the writer task; must be called from within a tokio runtime
    pub fn start(dir: impl Into<PathBuf>, console: bool) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AccessLogEntry>();
        let writer = AccessLogWriter::new(dir.into(), console);

        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(e) = writer.write(&entry).await {
                    warn!("Failed to write access log entry for {}: {}", entry.host, e);
                }
            }
        });

        Self { sender }
    }

    /// Queue an entry for writing
    pub fn record(&self, entry: AccessLogEntry) {
        if self.sender.send(entry).is_err() {
            warn!("Access log writer has stopped; dropping entry");
        }
    }
}

/// Appends formatted entries to the log files
#[derive(Debug)]
pub struct AccessLogWriter {
    dir: PathBuf,
    console: bool,
}

impl AccessLogWriter {
    pub fn new(dir: PathBuf, console: bool) -> Self {
        Self { dir, console }
    }

    pub async fn write(&self, entry: &AccessLogEntry) -> std::io::Result<()> {
        let line = entry.format_line();

        fs::create_dir_all(&self.dir).await?;
        append_line(&self.dir.join(entry.file_name()), &line).await?;
        append_line(&self.dir.join(COMBINED_LOG), &line).await?;

        if self.console {
            info!("{}", line);
        }
        Ok(())
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn entry(host: &str) -> AccessLogEntry {
        let request = HttpRequest::parse(&format!(
            "GET /docs/page?x=1 HTTP/1.1\r\nHost: {}\r\nReferer: https://ref.example/\r\nUser-Agent: curl/8.0",
            host
        ))
        .unwrap();
        let mut entry = AccessLogEntry::new(&request, "203.0.113.9".parse().unwrap(), 200, 512);
        entry.timestamp = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2017, 3, 4, 15, 4, 5)
            .unwrap();
        entry
    }

    #[test]
    fn test_format_line() {
        assert_eq!(
            entry("Site.Example").format_line(),
            "203.0.113.9 - [04/Mar/2017:15:04:05 -0500] \"GET Site.Example /docs/page x=1 HTTP/1.1\" 200 512 \"https://ref.example/\" \"curl/8.0\""
        );
    }

    #[test]
    fn test_file_name_uses_canonical_host() {
        assert_eq!(entry("Site.Example:443").file_name(), "site.example.access.log");
        assert_eq!(entry("../../etc").file_name(), "_invalid-host.access.log");
    }

    #[tokio::test]
    async fn test_writer_appends_to_host_and_combined_logs() {
        let dir = tempdir().unwrap();
        let writer = AccessLogWriter::new(dir.path().join("logs"), false);

        writer.write(&entry("a.example")).await.unwrap();
        writer.write(&entry("b.example")).await.unwrap();
        writer.write(&entry("a.example")).await.unwrap();

        let a = std::fs::read_to_string(dir.path().join("logs/a.example.access.log")).unwrap();
        let combined = std::fs::read_to_string(dir.path().join("logs/.access.log")).unwrap();
        assert_eq!(a.lines().count(), 2);
        assert_eq!(combined.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_record_does_not_block() {
        let dir = tempdir().unwrap();
        let log = AccessLog::start(dir.path().to_path_buf(), false);
        for _ in 0..100 {
            log.record(entry("a.example"));
        }
    }
}
