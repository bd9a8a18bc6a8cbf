use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::MirrorUrl;
use crate::error::GrabError;

pub trait MirrorClient: Send + Sync {
    /// Directory listing page of the kernel package pool.
    fn fetch_listing(&self, mirror: &MirrorUrl) -> Result<String, GrabError>;
    /// Stream one package from the pool into `destination`.
    fn download_package(
        &self,
        mirror: &MirrorUrl,
        remote_file_name: &str,
        destination: &Path,
    ) -> Result<(), GrabError>;
}

impl<C: MirrorClient + ?Sized> MirrorClient for &C {
    fn fetch_listing(&self, mirror: &MirrorUrl) -> Result<String, GrabError> {
        (**self).fetch_listing(mirror)
    }

    fn download_package(
        &self,
        mirror: &MirrorUrl,
        remote_file_name: &str,
        destination: &Path,
    ) -> Result<(), GrabError> {
        (**self).download_package(mirror, remote_file_name, destination)
    }
}

#[derive(Clone)]
pub struct MirrorHttpClient {
    client: Client,
}

impl MirrorHttpClient {
    /// `timeout` of `None` lets a request run for as long as the mirror keeps
    /// sending; debug packages are large.
    pub fn new(timeout: Option<Duration>) -> Result<Self, GrabError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dbgsym-grab/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GrabError::MirrorHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GrabError::MirrorHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, GrabError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GrabError::MirrorHttp(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            return Err(GrabError::MirrorStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl MirrorClient for MirrorHttpClient {
    fn fetch_listing(&self, mirror: &MirrorUrl) -> Result<String, GrabError> {
        let url = mirror.listing_url();
        self.get(&url)?
            .text()
            .map_err(|err| GrabError::MirrorHttp(format!("{url}: {err}")))
    }

    fn download_package(
        &self,
        mirror: &MirrorUrl,
        remote_file_name: &str,
        destination: &Path,
    ) -> Result<(), GrabError> {
        let url = mirror.package_url(remote_file_name);
        let mut response = self.get(&url)?;
        let mut file = File::create(destination)
            .map_err(|err| GrabError::Filesystem(format!("{}: {err}", destination.display())))?;
        // A body cut off mid-stream surfaces here too.
        std::io::copy(&mut response, &mut file)
            .map_err(|err| GrabError::MirrorHttp(format!("{url}: {err}")))?;
        Ok(())
    }
}
