//! Append-only JSONL journal of emitted notifications, rotated hourly.

use crate::notify::{Notification, Subscription};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

const BUFFER_BYTES: usize = 64 * 1024;

pub fn journal_path(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("notifications_{}.jsonl", at.format("%Y%m%d%H")))
}

struct HourlyWriter {
    dir: PathBuf,
    hour: String,
    buffer: BufWriter<File>,
}

impl HourlyWriter {
    fn open(dir: &Path, at: DateTime<Utc>) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            hour: at.format("%Y%m%d%H").to_string(),
            buffer: Self::open_file(dir, at)?,
        })
    }

    fn open_file(dir: &Path, at: DateTime<Utc>) -> io::Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal_path(dir, at))?;
        Ok(BufWriter::with_capacity(BUFFER_BYTES, file))
    }

    fn write(&mut self, notification: &Notification) -> io::Result<()> {
        let hour = notification.emitted_at.format("%Y%m%d%H").to_string();
        if hour != self.hour {
            self.buffer.flush()?;
            self.buffer = Self::open_file(&self.dir, notification.emitted_at)?;
            self.hour = hour;
        }
        serde_json::to_writer(&mut self.buffer, notification)?;
        self.buffer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

/// Dedicated thread; returns when the hub is dropped.
pub struct NotificationJournal;

impl NotificationJournal {
    pub fn spawn(
        mut subscription: Subscription,
        dir: PathBuf,
    ) -> io::Result<thread::JoinHandle<()>> {
        let mut writer = HourlyWriter::open(&dir, Utc::now())?;

        thread::Builder::new()
            .name("nexus-journal".into())
            .spawn(move || {
                info!(dir = %dir.display(), "Notification journal active");

                while let Some(notification) = subscription.blocking_recv() {
                    write_logged(&mut writer, &notification);
                    while let Some(queued) = subscription.try_recv() {
                        write_logged(&mut writer, &queued);
                    }
                    if let Err(e) = writer.flush() {
                        warn!(error = %e, "Failed to flush notification journal");
                    }
                }

                if let Err(e) = writer.flush() {
                    error!(error = %e, "Final journal flush failed");
                }
                info!(
                    lagged = subscription.lagged(),
                    "Notification journal stopped"
                );
            })
    }
}

fn write_logged(writer: &mut HourlyWriter, notification: &Notification) {
    if let Err(e) = writer.write(notification) {
        warn!(error = %e, event = %notification.event, "Failed to journal notification");
    }
}
