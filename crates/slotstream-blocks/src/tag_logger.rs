use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use slotstream_core::StreamTag;

use crate::stream::StreamWindow;

struct TagLoggerInner {
    out: BufWriter<File>,
    display: bool,
    /// Tags observed by the last work call
    tags: Vec<StreamTag>,
}

/// Bit bucket that logs every tag it receives.
///
/// Attach it next to any block to watch the tags streaming out of that
/// block. Samples are ignored; each tag becomes one line in the log
/// file. The tags of the last work call are retained and can be
/// fetched with `current_tags()`.
pub struct TagLogger {
    inner: Mutex<TagLoggerInner>,
}

impl TagLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<TagLogger> {
        let out = BufWriter::new(File::create(path)?);
        Ok(TagLogger {
            inner: Mutex::new(TagLoggerInner { out, display: true, tags: Vec::new() }),
        })
    }

    /// Turn writing of tag lines on or off
    pub fn set_display(&self, display: bool) {
        self.inner.lock().unwrap().display = display;
    }

    /// Tags observed as of the last call to `work`
    pub fn current_tags(&self) -> Vec<StreamTag> {
        self.inner.lock().unwrap().tags.clone()
    }

    /// Logs the tags of one or more input windows. Always consumes
    /// every window whole.
    pub fn work<T>(&self, windows: &[StreamWindow<T>]) {
        let mut inner = self.inner.lock().unwrap();

        for (stream, window) in windows.iter().enumerate() {
            inner.tags.clear();
            inner.tags.extend_from_slice(window.tags);

            if !inner.display {
                continue;
            }
            if !window.tags.is_empty() {
                let _ = writeln!(inner.out, "Input Stream:\t{}", stream);
            }
            for tag in window.tags {
                let _ = writeln!(
                    inner.out,
                    "Offset:\t{}\tSource:\t{}\tKey:\t{}\tValue:\t{}",
                    tag.offset, tag.srcid, tag.key, tag.value
                );
            }
        }
        let _ = inner.out.flush();
    }
}
