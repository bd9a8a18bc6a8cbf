#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use dbgsym_grabber::domain::{MirrorUrl, Source};
use dbgsym_grabber::dwarf2json::{ProfileTool, validate_profile};
use dbgsym_grabber::error::GrabError;
use dbgsym_grabber::mirror::MirrorClient;
use dbgsym_grabber::store::Store;

pub const DEBUG_DEB: &str = "linux-image-6.1.0-1-amd64-dbg_6.1.0-1_amd64.deb";
pub const PLAIN_DEB: &str = "linux-image-6.1.0-1-amd64_6.1.0-1_amd64.deb";
pub const PROFILE: &str = "6.1.0-1-amd64_amd64.json.xz";
pub const ELF_PATH: &str = "usr/lib/debug/boot/vmlinux-6.1.0-1-amd64";
pub const MAP_PATH: &str = "boot/System.map-6.1.0-1-amd64";

pub fn listing(files: &[&str]) -> String {
    let mut page = String::from("<html><body><pre>\n<a href=\"../\">../</a>\n");
    for file in files {
        page.push_str(&format!("<a href=\"{file}\">{file}</a>  01-Jan-2024 00:00  1M\n"));
    }
    page.push_str("</pre></body></html>\n");
    page
}

fn tarball(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A Debian package whose data.tar.xz holds `members`.
pub fn deb(members: &[(&str, &[u8])]) -> Vec<u8> {
    let control = xz(&tarball(&[("control", b"Package: linux-image\n")]));
    let data = xz(&tarball(members));
    let mut out = Vec::new();
    {
        let mut builder = ar::Builder::new(&mut out);
        for (name, content) in [
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.xz", control),
            ("data.tar.xz", data),
        ] {
            let header = ar::Header::new(name.as_bytes().to_vec(), content.len() as u64);
            builder.append(&header, content.as_slice()).unwrap();
        }
    }
    out
}

pub struct MockMirror {
    listing: String,
    packages: HashMap<String, Vec<u8>>,
    broken: HashSet<String>,
    missing_listings: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl MockMirror {
    pub fn new(listing: String) -> Self {
        Self {
            listing,
            packages: HashMap::new(),
            broken: HashSet::new(),
            missing_listings: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_package(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.packages.insert(name.to_string(), bytes);
        self
    }

    /// Downloads of `name` fail with a connection-level error.
    pub fn with_broken_transport(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    /// The listing of `source` answers 404.
    pub fn with_missing_listing(mut self, source: &Source) -> Self {
        self.missing_listings.insert(source.mirror.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn package_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|req| req.strip_prefix("package:").map(str::to_string))
            .collect()
    }
}

impl MirrorClient for MockMirror {
    fn fetch_listing(&self, mirror: &MirrorUrl) -> Result<String, GrabError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("listing:{mirror}"));
        if self.missing_listings.contains(mirror.as_str()) {
            return Err(GrabError::MirrorStatus {
                status: 404,
                url: mirror.listing_url(),
            });
        }
        Ok(self.listing.clone())
    }

    fn download_package(
        &self,
        mirror: &MirrorUrl,
        remote_file_name: &str,
        destination: &Path,
    ) -> Result<(), GrabError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("package:{remote_file_name}"));
        if self.broken.contains(remote_file_name) {
            return Err(GrabError::MirrorHttp("connection reset".to_string()));
        }
        let bytes = self
            .packages
            .get(remote_file_name)
            .ok_or_else(|| GrabError::MirrorStatus {
                status: 404,
                url: mirror.package_url(remote_file_name),
            })?;
        fs::write(destination, bytes).unwrap();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ToolMode {
    Succeed,
    ExitNonZero,
    PrintGarbage,
}

/// Stands in for dwarf2json: emits a JSON object echoing both inputs.
pub struct MockTool {
    mode: ToolMode,
    calls: Mutex<usize>,
}

impl MockTool {
    pub fn new(mode: ToolMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ProfileTool for MockTool {
    fn generate(&self, elf: &Path, system_map: &Path) -> Result<Vec<u8>, GrabError> {
        *self.calls.lock().unwrap() += 1;
        let elf = fs::read_to_string(elf).unwrap();
        let map = fs::read_to_string(system_map).unwrap();
        let stdout = match self.mode {
            ToolMode::Succeed => format!(r#"{{"elf": "{elf}", "system_map": "{map}"}}"#),
            ToolMode::ExitNonZero => {
                return Err(GrabError::ToolFailed("exit status: 1".to_string()));
            }
            ToolMode::PrintGarbage => "goroutine 1 [running]:".to_string(),
        };
        validate_profile(stdout.as_bytes())?;
        Ok(stdout.into_bytes())
    }
}

pub fn source(name: &str) -> Source {
    format!("{name}=https://mirror.example.org/{name}/")
        .parse()
        .unwrap()
}

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new(root))
}

/// File names currently present in a source directory.
pub fn dir_listing(store: &Store, source: &Source) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(store.source_dir(&source.name).as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn read_profile(store: &Store, source: &Source) -> String {
    use std::io::Read;

    let path = store.source_dir(&source.name).join(PROFILE);
    let file = fs::File::open(path.as_std_path()).unwrap();
    let mut text = String::new();
    xz2::read::XzDecoder::new(file)
        .read_to_string(&mut text)
        .unwrap();
    text
}
