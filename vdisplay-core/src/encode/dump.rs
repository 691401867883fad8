//! Raw packet dump
//!
//! Every packet emitted by the encoder is appended to the file with no
//! framing, producing an elementary stream that standard tools can play.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;

/// Sequential writer for encoded packets
pub struct PacketDump {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl PacketDump {
    /// Create (truncate) the dump file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        info!("Dumping encoded packets to {:?}", path);
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Append one packet. Write errors are logged and otherwise ignored.
    pub fn write(&mut self, data: &[u8]) {
        match self.writer.write_all(data) {
            Ok(()) => self.bytes_written += data.len() as u64,
            Err(e) => warn!("Packet dump write to {:?} failed: {}", self.path, e),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for PacketDump {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush packet dump {:?}: {}", self.path, e);
        }
    }
}
