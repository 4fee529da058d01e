use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use slotstream_core::ComplexSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleFileMode {
    Write,
    Read,
    ReadRepeat,
}

#[derive(Debug)]
pub enum SampleIoError {
    Io(String),
    Eof,
}

impl From<io::Error> for SampleIoError {
    fn from(err: io::Error) -> Self {
        SampleIoError::Io(err.to_string())
    }
}

impl std::fmt::Display for SampleIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleIoError::Io(msg) => write!(f, "sample file I/O error: {}", msg),
            SampleIoError::Eof => write!(f, "end of sample file"),
        }
    }
}

/// Block-oriented file of interleaved little-endian f32 IQ samples.
pub struct SampleFile {
    file: File,
    mode: SampleFileMode,
}

impl SampleFile {
    pub fn new<P: AsRef<Path>>(filename: P, mode: SampleFileMode) -> io::Result<SampleFile> {
        let file = match mode {
            SampleFileMode::Read | SampleFileMode::ReadRepeat => {
                OpenOptions::new().read(true).open(&filename)?
            }
            SampleFileMode::Write => {
                OpenOptions::new().write(true).create(true).truncate(true).open(&filename)?
            }
        };
        Ok(SampleFile { file, mode })
    }

    /// Reads one block of samples; the buffer length determines the
    /// block size. In `ReadRepeat` mode EOF seeks back to the start and
    /// a partial trailing block is discarded.
    pub fn read_block(&mut self, buffer: &mut [ComplexSample]) -> Result<(), SampleIoError> {
        let mut raw = vec![0u8; buffer.len() * 8];
        let mut bytes_read = 0;

        while bytes_read < raw.len() {
            match self.file.read(&mut raw[bytes_read..]) {
                Ok(0) => match self.mode {
                    SampleFileMode::Read => return Err(SampleIoError::Eof),
                    SampleFileMode::ReadRepeat => {
                        self.file.seek(SeekFrom::Start(0))?;
                        if bytes_read > 0 {
                            bytes_read = 0;
                            tracing::debug!("discarding partial block at EOF, repeating from start");
                        }
                    }
                    SampleFileMode::Write => unreachable!(),
                },
                Ok(n) => bytes_read += n,
                Err(e) => return Err(SampleIoError::from(e)),
            }
        }

        for (sample, chunk) in buffer.iter_mut().zip(raw.chunks_exact(8)) {
            sample.re = f32::from_le_bytes(chunk[0..4].try_into().unwrap());
            sample.im = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
        }
        Ok(())
    }

    /// Appends a block of samples to a file opened in `Write` mode
    pub fn write_block(&mut self, samples: &[ComplexSample]) -> Result<(), SampleIoError> {
        let mut raw = Vec::with_capacity(samples.len() * 8);
        for sample in samples {
            raw.extend_from_slice(&sample.re.to_le_bytes());
            raw.extend_from_slice(&sample.im.to_le_bytes());
        }
        self.file.write_all(&raw)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SampleIoError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let path = std::env::temp_dir().join("slotstream_sample_file_test.iq");
        let samples: Vec<ComplexSample> =
            (0..16).map(|i| ComplexSample::new(i as f32, -(i as f32))).collect();

        let mut writer = SampleFile::new(&path, SampleFileMode::Write).unwrap();
        writer.write_block(&samples).unwrap();
        writer.flush().unwrap();

        let mut reader = SampleFile::new(&path, SampleFileMode::Read).unwrap();
        let mut buffer = vec![ComplexSample::new(0.0, 0.0); 16];
        reader.read_block(&mut buffer).unwrap();
        assert_eq!(buffer, samples);

        assert!(matches!(reader.read_block(&mut buffer), Err(SampleIoError::Eof)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_repeat() {
        let path = std::env::temp_dir().join("slotstream_sample_file_repeat.iq");
        let samples: Vec<ComplexSample> =
            (0..8).map(|i| ComplexSample::new(i as f32, 0.0)).collect();

        let mut writer = SampleFile::new(&path, SampleFileMode::Write).unwrap();
        writer.write_block(&samples).unwrap();
        writer.flush().unwrap();

        let mut reader = SampleFile::new(&path, SampleFileMode::ReadRepeat).unwrap();
        let mut buffer = vec![ComplexSample::new(0.0, 0.0); 12];
        // 12 > 8, so the repeat path discards the partial block and
        // restarts from the beginning
        reader.read_block(&mut buffer).unwrap();
        std::fs::remove_file(&path).ok();
    }
}
