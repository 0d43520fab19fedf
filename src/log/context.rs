use crate::config::DEFAULT_ROTATION_THRESHOLD;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::health::HealthRegister;
use crate::log::files::LogSegmentStore;
use crate::log::header::StoreId;
use crate::log::version::{
    LogFileVersionTracker, LogVersionRepository, NoopVersionTracker, TransactionIdStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Backed by a transaction id store and a log version repository; can append and rotate.
    Full,
    /// Only knows about the files on disk; may read and delete, never append.
    FilesOnly,
}

/// Everything a [`LogSegmentStore`] needs from its surroundings.
pub struct LogFilesContext {
    log_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    mode: ContextMode,
    rotation_threshold: u64,
    transaction_id_store: Option<Arc<dyn TransactionIdStore>>,
    log_version_repository: Option<Arc<dyn LogVersionRepository>>,
    health: Arc<HealthRegister>,
    store_id: StoreId,
    version_tracker: Arc<dyn LogFileVersionTracker>,
}

impl LogFilesContext {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn rotation_threshold(&self) -> u64 {
        self.rotation_threshold
    }

    pub fn health(&self) -> &Arc<HealthRegister> {
        &self.health
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn version_tracker(&self) -> &Arc<dyn LogFileVersionTracker> {
        &self.version_tracker
    }

    pub fn transaction_id_store(&self) -> Result<&Arc<dyn TransactionIdStore>> {
        self.transaction_id_store.as_ref().ok_or_else(|| {
            Error::Unsupported(
                "last committed transaction id is not available in a files-only log context"
                    .to_string(),
            )
        })
    }

    pub fn log_version_repository(&self) -> Result<&Arc<dyn LogVersionRepository>> {
        self.log_version_repository.as_ref().ok_or_else(|| {
            Error::Unsupported(
                "current log version is not available in a files-only log context".to_string(),
            )
        })
    }

    pub fn last_committed_transaction_id(&self) -> Result<u64> {
        Ok(self.transaction_id_store()?.last_committed_transaction_id())
    }

    pub fn current_log_version(&self) -> Result<u64> {
        Ok(self.log_version_repository()?.current_log_version())
    }
}

/// Builds a [`LogFilesContext`] or an opened [`LogSegmentStore`].
///
/// ```text
/// builder(dir, fs)                full context, 256 MiB rotation threshold
/// active_files_builder(dir, fs)   full context, rotation disabled
/// log_files_based_only(dir, fs)   files-only context
/// ```
pub struct LogFilesBuilder {
    log_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    mode: ContextMode,
    rotation_threshold: u64,
    transaction_id_store: Option<Arc<dyn TransactionIdStore>>,
    log_version_repository: Option<Arc<dyn LogVersionRepository>>,
    health: Option<Arc<HealthRegister>>,
    store_id: StoreId,
    version_tracker: Option<Arc<dyn LogFileVersionTracker>>,
}

impl LogFilesBuilder {
    pub fn builder(log_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        LogFilesBuilder {
            log_dir: log_dir.into(),
            fs,
            mode: ContextMode::Full,
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            transaction_id_store: None,
            log_version_repository: None,
            health: None,
            store_id: StoreId::UNKNOWN,
            version_tracker: None,
        }
    }

    pub fn active_files_builder(log_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        LogFilesBuilder {
            rotation_threshold: u64::MAX,
            ..Self::builder(log_dir, fs)
        }
    }

    pub fn log_files_based_only(log_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        LogFilesBuilder {
            mode: ContextMode::FilesOnly,
            ..Self::builder(log_dir, fs)
        }
    }

    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    pub fn with_transaction_id_store(mut self, store: Arc<dyn TransactionIdStore>) -> Self {
        self.transaction_id_store = Some(store);
        self
    }

    pub fn with_log_version_repository(mut self, repository: Arc<dyn LogVersionRepository>) -> Self {
        self.log_version_repository = Some(repository);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthRegister>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_store_id(mut self, store_id: StoreId) -> Self {
        self.store_id = store_id;
        self
    }

    pub fn with_version_tracker(mut self, tracker: Arc<dyn LogFileVersionTracker>) -> Self {
        self.version_tracker = Some(tracker);
        self
    }

    /// Validates the collaborators without touching the file system.
    pub fn build_context(self) -> Result<LogFilesContext> {
        let (transaction_id_store, log_version_repository) = match self.mode {
            ContextMode::Full => {
                let tx_ids = self.transaction_id_store.ok_or_else(|| {
                    Error::Configuration(
                        "a full log context requires a transaction id store".to_string(),
                    )
                })?;
                let versions = self.log_version_repository.ok_or_else(|| {
                    Error::Configuration(
                        "a full log context requires a log version repository".to_string(),
                    )
                })?;
                (Some(tx_ids), Some(versions))
            }
            ContextMode::FilesOnly => {
                if self.transaction_id_store.is_some() || self.log_version_repository.is_some() {
                    return Err(Error::Configuration(
                        "a files-only log context cannot take a transaction id store or log version repository"
                            .to_string(),
                    ));
                }
                (None, None)
            }
        };
        if self.rotation_threshold == 0 {
            return Err(Error::Configuration(
                "rotation threshold must be positive".to_string(),
            ));
        }

        Ok(LogFilesContext {
            log_dir: self.log_dir,
            fs: self.fs,
            mode: self.mode,
            rotation_threshold: self.rotation_threshold,
            transaction_id_store,
            log_version_repository,
            health: self.health.unwrap_or_else(HealthRegister::shared),
            store_id: self.store_id,
            version_tracker: self
                .version_tracker
                .unwrap_or_else(|| Arc::new(NoopVersionTracker)),
        })
    }

    pub fn build(self) -> Result<LogSegmentStore> {
        LogSegmentStore::open(self.build_context()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::DefaultFileSystem;
    use crate::log::version::{SimpleLogVersionRepository, SimpleTransactionIdStore, BASE_TX_ID};

    fn fs() -> Arc<dyn FileSystem> {
        Arc::new(DefaultFileSystem)
    }

    #[test]
    fn builds_default_full_context() {
        let context = LogFilesBuilder::builder("/tmp/unused", fs())
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::new()))
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::new(2)))
            .build_context()
            .unwrap();

        assert_eq!(context.mode(), ContextMode::Full);
        assert_eq!(context.rotation_threshold(), 256 * 1024 * 1024);
        assert_eq!(context.last_committed_transaction_id().unwrap(), BASE_TX_ID);
        assert_eq!(context.current_log_version().unwrap(), 2);
        assert!(context.health().is_healthy());
    }

    #[test]
    fn active_files_context_never_rotates() {
        let context = LogFilesBuilder::active_files_builder("/tmp/unused", fs())
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::new()))
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::default()))
            .build_context()
            .unwrap();
        assert_eq!(context.rotation_threshold(), u64::MAX);
        assert_eq!(context.current_log_version().unwrap(), 0);
    }

    #[test]
    fn custom_rotation_threshold() {
        let context = LogFilesBuilder::builder("/tmp/unused", fs())
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::new()))
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::new(2)))
            .with_rotation_threshold(1024 * 1024)
            .build_context()
            .unwrap();
        assert_eq!(context.rotation_threshold(), 1024 * 1024);
    }

    #[test]
    fn full_context_requires_log_version_repository() {
        let result = LogFilesBuilder::builder("/tmp/unused", fs())
            .with_transaction_id_store(Arc::new(SimpleTransactionIdStore::new()))
            .build_context();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn full_context_requires_transaction_id_store() {
        let health = HealthRegister::shared();
        let result = LogFilesBuilder::builder("/tmp/unused", fs())
            .with_log_version_repository(Arc::new(SimpleLogVersionRepository::new(2)))
            .with_health(health.clone())
            .build_context();
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(health.is_healthy());
    }

    #[test]
    fn files_only_context_rejects_id_and_version_access() {
        let context = LogFilesBuilder::log_files_based_only("/tmp/unused", fs())
            .build_context()
            .unwrap();
        assert!(matches!(
            context.last_committed_transaction_id(),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(context.current_log_version(), Err(Error::Unsupported(_))));
    }
}
