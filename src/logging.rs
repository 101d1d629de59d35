use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Shared slot holding the current run's log file. Empty until a run row
/// exists; every formatted event is copied into it while set.
#[derive(Clone, Default)]
pub(crate) struct RunLogSlot {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLogSlot {
    /// Starts capturing into `path`. `append` reopens an existing log for a
    /// resumed run; otherwise the file is created fresh.
    pub fn attach(&self, path: &Path, append: bool) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        *self.file.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
        Ok(())
    }

    pub fn detach(&self) {
        let mut slot = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut file) = slot.take() {
            let _ = file.flush();
        }
    }
}

#[derive(Clone)]
pub(crate) struct RunLogMakeWriter {
    pub slot: RunLogSlot,
}

impl<'a> MakeWriter<'a> for RunLogMakeWriter {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            slot: self.slot.clone(),
        }
    }
}

pub(crate) struct RunLogWriter {
    slot: RunLogSlot,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        let mut slot = self.slot.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = slot.as_mut() {
            // Losing the file copy must not break stdout logging.
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()?;
        let mut slot = self.slot.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = slot.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

/// Installs the process-wide subscriber. Level defaults to INFO and can be
/// overridden with `RUST_LOG`. The returned slot receives the run log file.
pub(crate) fn init_tracing() -> RunLogSlot {
    let slot = RunLogSlot::default();
    let make_writer = RunLogMakeWriter { slot: slot.clone() };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_tees_into_attached_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run_1.log");
        let slot = RunLogSlot::default();
        let make_writer = RunLogMakeWriter { slot: slot.clone() };

        make_writer.make_writer().write_all(b"before\n").unwrap();
        slot.attach(&path, false).unwrap();
        make_writer.make_writer().write_all(b"first\n").unwrap();
        slot.detach();
        make_writer.make_writer().write_all(b"detached\n").unwrap();

        slot.attach(&path, true).unwrap();
        make_writer.make_writer().write_all(b"resumed\n").unwrap();
        slot.detach();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nresumed\n");
    }
}
