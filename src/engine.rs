use std::{fs, sync::Arc};

use tracing::info;

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    config::Config,
    context::OpContext,
    error::{Error, Result},
    executor::{ExecResult, Executor, SessionId, Statement},
    index::{IndexStorage, OrderedIndex},
    storage::disk::manager::FilePageStore,
    txn::{CommitMode, TransactionManager},
    wal::{
        recovery::{Recovery, ReplayStats},
        Wal,
    },
};

/// Every layer of one database instance, wired together.
///
/// Opening replays the whole WAL into a fresh index before the engine accepts
/// statements. Committed data is durable through the WAL; `checkpoint` also
/// writes back resident pages.
pub struct StorageEngine {
    config: Config,
    page_store: Arc<FilePageStore>,
    bpm: Arc<BufferPoolManager>,
    wal: Arc<Wal>,
    index: Arc<dyn IndexStorage>,
    tx_manager: Arc<TransactionManager>,
    executor: Arc<Executor>,
    replay_stats: ReplayStats,
}

impl StorageEngine {
    pub fn open(config: Config) -> Result<Self> {
        if config.buffer_pool_frames == 0 {
            return Err(Error::InvalidOperation(
                "buffer pool needs at least one frame".to_string(),
            ));
        }
        fs::create_dir_all(&config.data_dir)?;

        let page_store = Arc::new(FilePageStore::open(config.page_file_path())?);
        let bpm = Arc::new(BufferPoolManager::new(
            config.buffer_pool_frames,
            Arc::clone(&page_store) as _,
        ));
        let wal = Arc::new(Wal::open(config.wal_file_path())?);
        let index: Arc<dyn IndexStorage> = Arc::new(OrderedIndex::new());

        let ctx = OpContext::background();
        let recovery = Recovery::new(Arc::clone(&wal), Arc::clone(&index));
        // A staged commit that failed before its flush may still have data
        // records in the log; only committed ones are replayed
        let replay_stats = match config.commit_mode {
            CommitMode::PerKey => recovery.replay(&ctx, 1)?,
            CommitMode::Staged => recovery.replay_committed(&ctx, 1)?,
        };

        let tx_manager = Arc::new(TransactionManager::new(
            Arc::clone(&wal),
            Arc::clone(&index),
            config.commit_mode,
        )?);
        let executor = Arc::new(Executor::new(Arc::clone(&tx_manager)));

        info!(
            data_dir = %config.data_dir.display(),
            keys = index.len()?,
            next_tx_id = tx_manager.next_tx_id(),
            "storage engine ready"
        );

        Ok(Self {
            config,
            page_store,
            bpm,
            wal,
            index,
            tx_manager,
            executor,
            replay_stats,
        })
    }

    pub fn execute(
        &self,
        ctx: &OpContext,
        session: SessionId,
        stmt: Statement,
    ) -> Result<ExecResult> {
        self.executor.execute(ctx, session, stmt)
    }

    /// Writes back every resident page and flushes the WAL.
    pub fn checkpoint(&self, ctx: &OpContext) -> Result<()> {
        self.bpm.flush_all_pages(ctx)?;
        self.wal.checkpoint(ctx)?;
        info!("checkpoint complete");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn page_store(&self) -> &Arc<FilePageStore> {
        &self.page_store
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn index(&self) -> &Arc<dyn IndexStorage> {
        &self.index
    }

    pub fn tx_manager(&self) -> &Arc<TransactionManager> {
        &self.tx_manager
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// What the startup replay applied.
    pub fn replay_stats(&self) -> ReplayStats {
        self.replay_stats
    }
}
