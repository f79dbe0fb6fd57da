//! A file-backed cache storage layer

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use crate::{
    notification::{AsyncCacheHook, TokenCacheNotificationArgs},
    BoxError, CacheError, TokenCache,
};

/// Keeps a token cache in a local file
///
/// Before each access the cache is replaced with the file's contents, and
/// after any access that changed the cache the file is rewritten. The file
/// holds the v3 format and is created readable only by its owner.
#[derive(Clone, Debug)]
pub struct FileTokenCacheStorage {
    path: PathBuf,
}

impl FileTokenCacheStorage {
    /// Constructs a new file storage layer
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file backing the cache
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers this storage as the cache's asynchronous before-access and
    /// after-access hooks
    pub fn attach<C>(self, cache: &TokenCache<C>) {
        let storage = Arc::new(self);
        cache.set_before_access_async(LoadFromFile(storage.clone()));
        cache.set_after_access_async(SaveToFile(storage));
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        Ok(Some(data))
    }

    async fn write(&self, data: &[u8]) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug)]
struct LoadFromFile(Arc<FileTokenCacheStorage>);

#[async_trait]
impl AsyncCacheHook for LoadFromFile {
    async fn on_notification(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> {
        let data = tokio::select! {
            biased;
            _ = args.cancellation().cancelled() => return Err(CacheError::Cancelled.into()),
            data = self.0.read() => data?,
        };

        match data {
            Some(data) => {
                args.serializer().deserialize_v3(&data, true)?;
                tracing::trace!(path = %self.0.path.display(), bytes = data.len(), "loaded token cache from file");
            }
            None => {
                tracing::debug!(path = %self.0.path.display(), "no token cache file to load");
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
struct SaveToFile(Arc<FileTokenCacheStorage>);

#[async_trait]
impl AsyncCacheHook for SaveToFile {
    async fn on_notification(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> {
        if !args.has_state_changed() {
            return Ok(());
        }

        let data = args.serializer().serialize_v3()?;
        self.0.write(&data).await?;
        tracing::trace!(path = %self.0.path.display(), bytes = data.len(), "persisted token cache to file");
        Ok(())
    }
}
