use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::stream::DataStream;
use crate::table::{Table, TableMeta};
use crate::types::ColumnType;
use crate::util::lock_recover;

const COLUMN_NAMES: [&str; 4] = ["Title", "Audio", "Channels", "Sample Rate"];
const AUDIO_COLUMN: usize = 1;

struct AudioFile {
    reader: hound::WavReader<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    num_frames: u64,
}

impl AudioFile {
    fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| Error::new(ErrorKind::OpenFailed, format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        let num_frames = reader.duration() as u64;
        debug!(
            "{}: {} frames, {} channels, {} Hz",
            path.display(),
            num_frames,
            spec.channels,
            spec.sample_rate
        );
        Ok(Self {
            reader,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            num_frames,
        })
    }

    /// Decodes `frames` frames starting at frame `offset` into
    /// interleaved f32 samples.
    fn read(&mut self, offset: u64, frames: u64) -> Result<Vec<f32>> {
        self.reader
            .seek(offset as u32)
            .map_err(|e| Error::new(ErrorKind::GetFailed, e.to_string()))?;
        let wanted = (frames * self.channels as u64) as usize;
        let mut buffer = Vec::with_capacity(wanted.min(1 << 20));

        let spec = self.reader.spec();
        match spec.sample_format {
            hound::SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    buffer.push(sample.map_err(|e| Error::new(ErrorKind::GetFailed, e.to_string()))?);
                }
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    let value =
                        sample.map_err(|e| Error::new(ErrorKind::GetFailed, e.to_string()))?;
                    buffer.push(value as f32 * scale);
                }
            }
        }
        Ok(buffer)
    }
}

/// Read-only one-row table over an audio file: metadata columns plus a
/// vector column decoding sample data on demand. Keys are
/// `(track)` or `(track, from, to)` frame ranges.
pub struct AudioTable {
    file: Arc<Mutex<AudioFile>>,
    meta: TableMeta,
}

impl AudioTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = AudioFile::open(path.as_ref())?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            meta: TableMeta::new(vec![ColumnType::Int64]).with_human_readable_key(),
        })
    }

    pub fn num_frames(&self) -> u64 {
        self.lock().num_frames
    }

    fn lock(&self) -> MutexGuard<'_, AudioFile> {
        lock_recover(&self.file, "audio file")
    }

    fn cursor(&self, track: i64, from: i64, to: i64) -> Box<dyn Cursor> {
        Box::new(AudioCursor {
            file: Arc::clone(&self.file),
            track,
            from,
            to,
            data: None,
            past_end: false,
            bind_index: 0,
        })
    }
}

impl Table for AudioTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    fn num_fields(&self) -> usize {
        COLUMN_NAMES.len()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        match column_index {
            0 => ColumnType::Varchar,
            1 => ColumnType::Vector,
            2 | 3 => ColumnType::Int,
            _ => ColumnType::Any,
        }
    }

    fn column_name(&self, column_index: usize) -> String {
        COLUMN_NAMES
            .get(column_index)
            .map(|name| name.to_string())
            .unwrap_or_default()
    }

    fn add_column(&mut self, _name: &str, _type: ColumnType, _unique: bool, _decimals: u32) -> Result<()> {
        Err(Error::read_only("audio"))
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        Ok(Some(self.cursor(0, 0, 0)))
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        let track = key.get_int64(0);
        if track != 0 {
            return Ok(None);
        }
        if key.size() >= 3 {
            Ok(Some(self.cursor(track, key.get_int64(1), key.get_int64(2))))
        } else {
            Ok(Some(self.cursor(track, 0, 0)))
        }
    }

    fn insert(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("audio"))
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("audio"))
    }

    fn increment(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("audio"))
    }

    fn assign(&self, _columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("audio"))
    }

    fn remove(&self, _key: &Key) -> Result<()> {
        Err(Error::read_only("audio"))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::read_only("audio"))
    }

    fn open_row(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("audio"))
    }
}

struct AudioCursor {
    file: Arc<Mutex<AudioFile>>,
    track: i64,
    from: i64,
    to: i64,
    data: Option<Vec<f32>>,
    past_end: bool,
    bind_index: usize,
}

impl AudioCursor {
    fn lock(&self) -> MutexGuard<'_, AudioFile> {
        lock_recover(&self.file, "audio file")
    }
}

impl DataStream for AudioCursor {
    fn execute(&mut self) -> Result<usize> {
        Err(Error::read_only("audio"))
    }

    fn next(&mut self) -> Result<bool> {
        // single-row table
        self.data = None;
        self.past_end = true;
        Ok(false)
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        self.past_end || column_index >= COLUMN_NAMES.len()
    }

    fn num_fields(&self) -> usize {
        COLUMN_NAMES.len()
    }

    fn column_name(&self, column_index: usize) -> String {
        COLUMN_NAMES
            .get(column_index)
            .map(|name| name.to_string())
            .unwrap_or_default()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        match column_index {
            0 => ColumnType::Varchar,
            1 => ColumnType::Vector,
            2 | 3 => ColumnType::Int,
            _ => ColumnType::Any,
        }
    }

    fn get_text(&mut self, column_index: usize, default_value: &str) -> String {
        match column_index {
            2 => self.lock().channels.to_string(),
            3 => self.lock().sample_rate.to_string(),
            _ => default_value.to_string(),
        }
    }

    fn get_blob(&mut self, _column_index: usize) -> Vec<u8> {
        Vec::new()
    }

    fn get_vector(&mut self, column_index: usize) -> Vec<f32> {
        if column_index != AUDIO_COLUMN || self.past_end {
            return Vec::new();
        }
        if self.data.is_none() {
            let mut file = self.lock();
            let decoded = if self.from == 0 && self.to == 0 {
                let frames = file.num_frames;
                file.read(0, frames)
            } else {
                file.read(self.from as u64, (self.to - self.from).max(0) as u64)
            };
            drop(file);
            match decoded {
                Ok(samples) => self.data = Some(samples),
                Err(e) => {
                    log::warn!("audio decode failed: {e}");
                    return Vec::new();
                }
            }
        }
        self.data.clone().unwrap_or_default()
    }

    fn set_text(&mut self, _column_index: usize, _value: &str, _is_defined: bool) -> Result<()> {
        Err(Error::read_only("audio"))
    }

    fn set_blob(&mut self, _column_index: usize, _data: &[u8], _is_defined: bool) -> Result<()> {
        Err(Error::read_only("audio"))
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl Cursor for AudioCursor {
    fn row_key(&self) -> Key {
        let mut key = Key::from_int(self.track);
        if self.from != 0 || self.to != 0 {
            key.add_int(self.from);
            key.add_int(self.to);
        }
        key
    }

    fn update(&mut self, _key: &Key) -> Result<usize> {
        Err(Error::read_only("audio"))
    }
}

#[cfg(test)]
mod audio_tests;
