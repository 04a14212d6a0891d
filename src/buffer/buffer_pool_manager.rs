use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, RwLock},
};

use tracing::{debug, warn};

use crate::{
    context::OpContext,
    error::{Error, Result},
    storage::{
        disk::manager::PageStore,
        page::{Page, PageId},
    },
    utils::replacer::{LruReplacer, Replacer},
};

pub type FrameId = usize;

/// Shared handle to a resident page. Callers must drop any guard taken on it
/// before unpinning the page.
pub type PageRef = Arc<RwLock<Page>>;

struct FrameHeader {
    page: PageRef,
    pin_count: u32,
    // Set by `unpin_page(.., true)`; ORed with the page's own flag on write-back
    is_dirty: bool,
}

struct PoolState {
    // The frames that this buffer pool manages, indexed by FrameId
    frames: Vec<Option<FrameHeader>>,
    // Resident page id -> frame holding it
    page_table: HashMap<PageId, FrameId>,
    free_frames: VecDeque<FrameId>,
    // Candidates for eviction: frames whose pin count dropped to zero
    replacer: LruReplacer<FrameId>,
}

pub struct BufferPoolManager {
    num_frames: usize,
    state: Mutex<PoolState>,
    store: Arc<dyn PageStore>,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, store: Arc<dyn PageStore>) -> Self {
        let mut frames = Vec::with_capacity(num_frames);
        let mut free_frames = VecDeque::with_capacity(num_frames);

        for frame_id in 0..num_frames {
            frames.push(None);
            free_frames.push_back(frame_id);
        }

        Self {
            num_frames,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(num_frames),
                free_frames,
                replacer: LruReplacer::new(num_frames),
            }),
            store,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns the page, pinned. Reads it from the page store into a free or
    /// evicted frame when it is not resident.
    pub fn fetch_page(&self, ctx: &OpContext, page_id: PageId) -> Result<PageRef> {
        ctx.check()?;
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = state.frame_mut(frame_id, page_id)?;
            frame.pin_count += 1;
            let page = Arc::clone(&frame.page);
            state.replacer.pin(frame_id);
            return Ok(page);
        }

        let frame_id = state.acquire_frame(ctx, self.store.as_ref())?;

        let page = match self.store.read(ctx, page_id) {
            Ok(page) => page,
            Err(err) => {
                state.free_frames.push_back(frame_id);
                return Err(err);
            }
        };

        Ok(state.install(frame_id, page, false))
    }

    /// Allocates a fresh page through the page store and pins it in a frame.
    pub fn new_page(&self, ctx: &OpContext) -> Result<PageRef> {
        ctx.check()?;
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        // Reserve the frame first so a full pool does not leak a page id
        let frame_id = state.acquire_frame(ctx, self.store.as_ref())?;

        let page_id = match self.store.allocate(ctx) {
            Ok(page_id) => page_id,
            Err(err) => {
                state.free_frames.push_back(frame_id);
                return Err(err);
            }
        };

        Ok(state.install(frame_id, Page::new(page_id), true))
    }

    /// Drops one pin. At pin count zero the page becomes an eviction candidate.
    pub fn unpin_page(&self, ctx: &OpContext, page_id: PageId, is_dirty: bool) -> Result<()> {
        ctx.check()?;
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(Error::PageNotFound(page_id))?;
        let frame = state.frame_mut(frame_id, page_id)?;

        frame.is_dirty |= is_dirty;
        let pins = frame.pin_count;
        match pins {
            0 => warn!(page_id, "unpin of a page that is not pinned"),
            1 => {
                frame.pin_count = 0;
                state.replacer.unpin(frame_id);
            }
            _ => frame.pin_count -= 1,
        }
        Ok(())
    }

    /// Writes a resident page back to the page store, dirty or not.
    pub fn flush_page(&self, ctx: &OpContext, page_id: PageId) -> Result<()> {
        ctx.check()?;
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(Error::PageNotFound(page_id))?;
        let frame = state.frame_mut(frame_id, page_id)?;
        write_back(ctx, self.store.as_ref(), frame)
    }

    /// Writes every resident page back and syncs the page file.
    pub fn flush_all_pages(&self, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        let mut guard = self.state.lock()?;

        for frame in guard.frames.iter_mut().flatten() {
            write_back(ctx, self.store.as_ref(), frame)?;
        }
        drop(guard);

        self.store.sync(ctx)
    }

    /// Drops an unpinned page from the pool and returns its id to the page
    /// store's free list. Returns `false` when the page is pinned, and
    /// `PageNotFound` when the id is not currently allocated.
    pub fn delete_page(&self, ctx: &OpContext, page_id: PageId) -> Result<bool> {
        ctx.check()?;
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        let resident = state.page_table.get(&page_id).copied();
        if let Some(frame_id) = resident {
            if state.frame_mut(frame_id, page_id)?.pin_count > 0 {
                return Ok(false);
            }
        }

        // The store rejects ids that are already free before the frame is touched
        self.store.free(ctx, page_id)?;

        if let Some(frame_id) = resident {
            state.frames[frame_id] = None;
            state.page_table.remove(&page_id);
            state.replacer.pin(frame_id);
            state.free_frames.push_back(frame_id);
        }
        Ok(true)
    }

    /// Pin count of a resident page, `None` when the page is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Result<Option<u32>> {
        let guard = self.state.lock()?;
        Ok(guard
            .page_table
            .get(&page_id)
            .and_then(|&frame_id| guard.frames[frame_id].as_ref())
            .map(|frame| frame.pin_count))
    }

    pub fn is_resident(&self, page_id: PageId) -> Result<bool> {
        Ok(self.state.lock()?.page_table.contains_key(&page_id))
    }
}

impl PoolState {
    fn frame_mut(&mut self, frame_id: FrameId, page_id: PageId) -> Result<&mut FrameHeader> {
        self.frames[frame_id]
            .as_mut()
            .ok_or(Error::PageNotFound(page_id))
    }

    /// Takes a free frame, or evicts the least recently unpinned page. A dirty
    /// victim is written back before its frame is handed out.
    fn acquire_frame(&mut self, ctx: &OpContext, store: &dyn PageStore) -> Result<FrameId> {
        if let Some(frame_id) = self.free_frames.pop_front() {
            return Ok(frame_id);
        }

        let victim = self.replacer.victim().ok_or(Error::NoFrameAvailable)?;
        let Some(mut frame) = self.frames[victim].take() else {
            return Ok(victim);
        };

        let evicted = {
            let page_id = frame.page.read()?.id();
            write_back_if_dirty(ctx, store, &mut frame).map(|_| page_id)
        };

        match evicted {
            Ok(page_id) => {
                self.page_table.remove(&page_id);
                debug!(page_id, frame_id = victim, "evicted page");
                Ok(victim)
            }
            Err(err) => {
                // The frame stays resident and is still the first to go
                self.frames[victim] = Some(frame);
                self.replacer.restore(victim);
                Err(err)
            }
        }
    }

    fn install(&mut self, frame_id: FrameId, page: Page, is_dirty: bool) -> PageRef {
        let page_id = page.id();
        let page = Arc::new(RwLock::new(page));

        self.frames[frame_id] = Some(FrameHeader {
            page: Arc::clone(&page),
            pin_count: 1,
            is_dirty,
        });
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        page
    }
}

fn write_back(ctx: &OpContext, store: &dyn PageStore, frame: &mut FrameHeader) -> Result<()> {
    let mut page = frame.page.write()?;
    store.write(ctx, &mut page)?;
    frame.is_dirty = false;
    Ok(())
}

fn write_back_if_dirty(
    ctx: &OpContext,
    store: &dyn PageStore,
    frame: &mut FrameHeader,
) -> Result<()> {
    let dirty = frame.is_dirty || frame.page.read()?.is_dirty();
    if dirty {
        write_back(ctx, store, frame)?;
    }
    Ok(())
}
