//! ETag cache: the last entity tag seen per URL.
//!
//! Entries live as long as the client and are overwritten on update.

use dashmap::DashMap;
use url::Url;

#[derive(Debug, Default)]
pub struct EtagCache {
    inner: DashMap<String, String>,
}

impl EtagCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &Url) -> String {
        let mut key = url.clone();
        key.set_fragment(None);
        key.into()
    }

    pub fn get(&self, url: &Url) -> Option<String> {
        self.inner.get(&Self::key(url)).map(|etag| etag.value().clone())
    }

    pub fn update(&self, url: &Url, etag: &str) {
        tracing::trace!(url = %url, etag = %etag, "ETag cached");
        self.inner.insert(Self::key(url), etag.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
