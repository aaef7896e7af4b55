//! Fetch transport for input references

use std::fs;
use std::path::Path;

use super::cancel::CancellationToken;
use super::error::FetchError;

/// Raw bytes of one input document
#[derive(Debug)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    /// Transport content type, when the transport has one
    pub content_type: Option<String>,
}

/// Fetches document bytes; implementations must honour the token
pub trait Fetcher: Send + Sync {
    fn fetch(&self, locator: &str, cancel: &CancellationToken)
    -> Result<FetchedBytes, FetchError>;
}

/// Reads plain paths and `file://` URLs from the local filesystem
#[derive(Clone, Debug, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedBytes, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let path = locator.strip_prefix("file://").unwrap_or(locator);
        let bytes = fs::read(Path::new(path)).map_err(|source| FetchError::Io {
            locator: locator.to_string(),
            source,
        })?;

        // The read may have finished after teardown began
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        Ok(FetchedBytes {
            bytes,
            content_type: None,
        })
    }
}

/// Fetches `http://` and `https://` locators, checking the token between body chunks
#[cfg(feature = "http")]
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher;

#[cfg(feature = "http")]
impl HttpFetcher {
    const CHUNK: usize = 64 * 1024;
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedBytes, FetchError> {
        use std::io::Read;

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let http_err = |detail: String| FetchError::Http {
            locator: locator.to_string(),
            detail,
        };

        let response = ureq::get(locator)
            .call()
            .map_err(|e| http_err(e.to_string()))?;
        let content_type = response.header("Content-Type").map(str::to_string);

        let mut reader = response.into_reader();
        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; Self::CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let read = reader.read(&mut chunk).map_err(|source| FetchError::Io {
                locator: locator.to_string(),
                source,
            })?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
        }

        Ok(FetchedBytes {
            bytes,
            content_type,
        })
    }
}

/// Dispatches on the locator scheme
#[derive(Clone, Debug, Default)]
pub struct AutoFetcher {
    files: FileFetcher,
    #[cfg(feature = "http")]
    http: HttpFetcher,
}

impl Fetcher for AutoFetcher {
    fn fetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedBytes, FetchError> {
        let lower = locator.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            #[cfg(feature = "http")]
            return self.http.fetch(locator, cancel);

            #[cfg(not(feature = "http"))]
            return Err(FetchError::UnsupportedScheme {
                locator: locator.to_string(),
            });
        }
        self.files.fetch(locator, cancel)
    }
}
