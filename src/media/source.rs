//! Filesystem byte source.

use std::io::{self, Seek, SeekFrom};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{ByteSource, ByteStream, LocatorResolver};

/// Opens locators as regular files.
#[derive(Debug, Clone, Default)]
pub struct FsByteSource {
    resolver: LocatorResolver,
}

impl FsByteSource {
    /// Source resolving locators with `resolver`.
    #[must_use]
    pub fn new(resolver: LocatorResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl ByteSource for FsByteSource {
    async fn open(&self, locator: &str) -> io::Result<ByteStream> {
        self.open_at(locator, 0).await
    }

    async fn open_at(&self, locator: &str, offset: u64) -> io::Result<ByteStream> {
        let resolver = self.resolver.clone();
        let locator = locator.to_string();

        let (file, len) = tokio::task::spawn_blocking(
            move || -> io::Result<(Option<std::fs::File>, u64)> {
                let path = resolver.resolve(&locator)?;
                let mut file = std::fs::File::open(&path)?;
                let meta = file.metadata()?;
                if !meta.is_file() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{} is not a regular file", path.display()),
                    ));
                }
                // Seeking beyond i64::MAX is EINVAL; nothing is left to read anyway.
                if offset >= meta.len() {
                    return Ok((None, meta.len()));
                }
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset))?;
                }
                Ok((Some(file), meta.len()))
            },
        )
        .await
        .map_err(io::Error::other)??;

        let reader: Box<dyn AsyncRead + Send + Unpin> = match file {
            Some(file) => Box::new(tokio::fs::File::from_std(file)),
            None => Box::new(tokio::io::empty()),
        };
        Ok(ByteStream {
            reader,
            total_len: Some(len),
        })
    }
}
