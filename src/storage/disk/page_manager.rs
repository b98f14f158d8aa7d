use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::file_header::{FileHeader, FILE_HEADER_SIZE};
use crate::storage::page::PageId;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Reads and writes whole pages at `page_id * page_size`. No caching: every
/// call goes to the file.
pub struct PageManager {
    file: File,
    page_size: usize,
    sync_writes: bool,
}

impl PageManager {
    /// Create (or truncate) a database file.
    pub fn create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::from_file(file, page_size))
    }

    /// Open an existing database file.
    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self::from_file(file, page_size))
    }

    /// Open a database file, creating an empty one if it does not exist.
    pub fn open_or_create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self::from_file(file, page_size))
    }

    fn from_file(file: File, page_size: usize) -> Self {
        Self {
            file,
            page_size,
            sync_writes: true,
        }
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Peek at the file header of `path` without opening it for writing.
    /// Returns `None` for a missing, empty or never-initialised file.
    pub fn read_file_header(path: &Path) -> StorageResult<Option<FileHeader>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len() as usize;
        let mut buf = [0u8; FILE_HEADER_SIZE];
        let available = len.min(FILE_HEADER_SIZE);
        file.read_exact(&mut buf[..available])?;

        if FileHeader::is_blank(&buf) {
            return Ok(None);
        }
        FileHeader::decode(&buf).map(Some)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fill `buf` with page `page_id`. Bytes past the end of the file read as
    /// zero, so a page that was never written comes back zero-filled.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        self.check_buffer(buf.len())?;
        buf.fill(0);

        let offset = self.page_offset(page_id);
        let file_size = self.file.metadata()?.len();
        if offset >= file_size {
            return Ok(());
        }

        let available = ((file_size - offset) as usize).min(self.page_size);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf[..available])?;

        Ok(())
    }

    /// Write `data` at page `page_id`, extending the file if needed.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        self.check_buffer(data.len())?;

        let offset = self.page_offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }

        Ok(())
    }

    /// Number of whole pages currently in the file.
    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size as u64) as u32)
    }

    fn check_buffer(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffer size must be the page size ({}), got {}",
                    self.page_size, len
                ),
            )));
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id.0 as u64 * self.page_size as u64
    }
}
