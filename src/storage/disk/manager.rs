use std::{
    collections::HashSet,
    fmt,
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use tracing::{debug, info};

use crate::{
    context::OpContext,
    error::{Error, Result},
    storage::page::{Page, PageId, PAGE_SIZE},
};

/// Durable fixed-size block storage addressed by page id.
pub trait PageStore: Send + Sync {
    /// Reserves a page id, reusing the most recently freed one first.
    fn allocate(&self, ctx: &OpContext) -> Result<PageId>;

    fn read(&self, ctx: &OpContext, id: PageId) -> Result<Page>;

    /// Persists the page at `id * PAGE_SIZE` and clears its dirty flag.
    fn write(&self, ctx: &OpContext, page: &mut Page) -> Result<()>;

    /// Returns `id` to the free list. Fails with `PageNotFound` for an id that
    /// was never allocated or is already free.
    fn free(&self, ctx: &OpContext, id: PageId) -> Result<()>;

    /// Forces written pages to stable storage.
    fn sync(&self, ctx: &OpContext) -> Result<()>;
}

struct StoreFile {
    file: File,
    // LIFO list of page ids returned by `free`
    free_slots: Vec<PageId>,
    // Same ids as `free_slots`, for membership checks
    freed: HashSet<PageId>,
}

/// Page store backed by a single flat file: page `i` occupies bytes
/// `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)`, no header and no checksum.
pub struct FilePageStore {
    path: PathBuf,
    inner: Mutex<StoreFile>,
    next_page_id: AtomicU32,
}

impl FilePageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let next_page_id = len.div_ceil(PAGE_SIZE as u64) as PageId;
        info!(path = %path.display(), pages = next_page_id, "opened page file");

        Ok(Self {
            path,
            inner: Mutex::new(StoreFile {
                file,
                free_slots: Vec::new(),
                freed: HashSet::new(),
            }),
            next_page_id: AtomicU32::new(next_page_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One past the highest page id ever allocated or written.
    pub fn num_pages(&self) -> PageId {
        self.next_page_id.load(Ordering::Acquire)
    }

    pub fn free_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.free_slots.len())
    }

    fn offset(id: PageId) -> u64 {
        id as u64 * PAGE_SIZE as u64
    }
}

impl PageStore for FilePageStore {
    fn allocate(&self, ctx: &OpContext) -> Result<PageId> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;

        if let Some(page_id) = inner.free_slots.pop() {
            inner.freed.remove(&page_id);
            debug!(page_id, "reusing freed page");
            return Ok(page_id);
        }

        let page_id = self.next_page_id.fetch_add(1, Ordering::AcqRel);
        debug!(page_id, "allocated page");
        Ok(page_id)
    }

    fn read(&self, ctx: &OpContext, id: PageId) -> Result<Page> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;

        if id >= self.next_page_id.load(Ordering::Acquire) {
            return Err(Error::PageNotFound(id));
        }

        // Allocated pages that were never written read back as zeroes
        let mut data = Box::new([0u8; PAGE_SIZE]);
        inner.file.seek(SeekFrom::Start(Self::offset(id)))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            match inner.file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Page::from_bytes(id, data))
    }

    fn write(&self, ctx: &OpContext, page: &mut Page) -> Result<()> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;

        inner.file.seek(SeekFrom::Start(Self::offset(page.id())))?;
        inner.file.write_all(page.data())?;
        inner.file.flush()?;

        self.next_page_id.fetch_max(page.id() + 1, Ordering::AcqRel);
        page.set_dirty(false);
        Ok(())
    }

    fn free(&self, ctx: &OpContext, id: PageId) -> Result<()> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;
        if id >= self.next_page_id.load(Ordering::Acquire) || !inner.freed.insert(id) {
            return Err(Error::PageNotFound(id));
        }
        inner.free_slots.push(id);
        debug!(page_id = id, "freed page");
        Ok(())
    }

    fn sync(&self, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        let inner = self.inner.lock()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

impl fmt::Debug for FilePageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePageStore")
            .field("path", &self.path)
            .field("next_page_id", &self.num_pages())
            .finish_non_exhaustive()
    }
}
