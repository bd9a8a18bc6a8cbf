//! Debian package unwrapping: the outer `ar` container, the compressed
//! `data.tar*` member inside it, and selection of the kernel image and
//! symbol map from the tarball.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::domain::{MemberKind, TieBreak};
use crate::error::GrabError;

/// Prefix reserved for the payload member of a Debian package.
pub const DATA_ARCHIVE_PREFIX: &[u8] = b"data.tar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCompression {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl DataCompression {
    /// Pick the decoder from the member name suffix (`data.tar.xz` etc).
    pub fn from_member_name(name: &str) -> Option<Self> {
        let name = name.trim_end_matches('/');
        if name.ends_with(".tar") {
            Some(Self::None)
        } else if name.ends_with(".gz") {
            Some(Self::Gzip)
        } else if name.ends_with(".xz") {
            Some(Self::Xz)
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Some(Self::Zstd)
        } else {
            None
        }
    }
}

fn decoder<'a, R: Read + 'a>(
    reader: R,
    compression: DataCompression,
) -> Result<Box<dyn Read + 'a>, GrabError> {
    match compression {
        DataCompression::None => Ok(Box::new(reader)),
        DataCompression::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        DataCompression::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        DataCompression::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|err| {
                GrabError::UnreadableDataArchive(format!("zstd decoder: {err}"))
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Paths of the inner archive members chosen for each kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub debug_binary: Option<String>,
    pub system_map: Option<String>,
}

/// Single-pass member selection over the whole archive; the scan never
/// stops early.
#[derive(Debug, Clone)]
pub struct MemberSelector {
    tie_break: TieBreak,
    wanted: Vec<MemberKind>,
    selection: Selection,
}

impl MemberSelector {
    pub fn new(tie_break: TieBreak, wanted: &[MemberKind]) -> Self {
        Self {
            tie_break,
            wanted: wanted.to_vec(),
            selection: Selection::default(),
        }
    }

    /// Offer one member path. Returns the kind it now stands for when the
    /// caller should capture its content (replacing any earlier capture).
    pub fn offer(&mut self, path: &str) -> Option<MemberKind> {
        let kind = MemberKind::classify(path)?;
        if !self.wanted.contains(&kind) {
            return None;
        }
        let slot = match kind {
            MemberKind::DebugBinary => &mut self.selection.debug_binary,
            MemberKind::SystemMap => &mut self.selection.system_map,
        };
        if slot.is_some() && self.tie_break == TieBreak::First {
            return None;
        }
        *slot = Some(path.to_string());
        Some(kind)
    }

    pub fn into_selection(self) -> Selection {
        self.selection
    }
}

/// Locate the `data.tar*` member of a Debian package and hand its raw
/// (still compressed) stream to `f` together with the member name.
fn with_data_archive<R, T, F>(package: R, label: &str, f: F) -> Result<T, GrabError>
where
    R: Read,
    F: FnOnce(&str, &mut dyn Read) -> Result<T, GrabError>,
{
    let mut archive = ar::Archive::new(package);
    while let Some(entry) = archive.next_entry() {
        let mut entry =
            entry.map_err(|err| GrabError::UnreadablePackage(format!("{label}: {err}")))?;
        if !entry.header().identifier().starts_with(DATA_ARCHIVE_PREFIX) {
            continue;
        }
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
        return f(&name, &mut entry);
    }
    Err(GrabError::MissingDataArchive(label.to_string()))
}

/// Stream the package's data archive once, copying every member the
/// selector accepts into the target file registered for its kind.
pub fn extract_members<R: Read>(
    package: R,
    label: &str,
    selector: &mut MemberSelector,
    targets: &HashMap<MemberKind, PathBuf>,
) -> Result<(), GrabError> {
    with_data_archive(package, label, |name, stream| {
        let compression = DataCompression::from_member_name(name).ok_or_else(|| {
            GrabError::UnreadableDataArchive(format!("{label}: unsupported member {name}"))
        })?;
        let mut tar = tar::Archive::new(decoder(stream, compression)?);
        let entries = tar
            .entries()
            .map_err(|err| GrabError::UnreadableDataArchive(format!("{label}: {err}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|err| GrabError::UnreadableDataArchive(format!("{label}: {err}")))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry_path(&entry, label)?;
            let Some(kind) = selector.offer(&path) else {
                continue;
            };
            let Some(target) = targets.get(&kind) else {
                continue;
            };
            copy_member(&mut entry, target, label)?;
        }
        Ok(())
    })
}

fn entry_path<R: Read>(entry: &tar::Entry<'_, R>, label: &str) -> Result<String, GrabError> {
    entry
        .path()
        .map(|path| path.to_string_lossy().to_string())
        .map_err(|err| GrabError::UnreadableDataArchive(format!("{label}: {err}")))
}

// Read errors are archive damage, write errors are local disk problems.
fn copy_member(reader: &mut dyn Read, target: &Path, label: &str) -> Result<(), GrabError> {
    let mut file = File::create(target)
        .map_err(|err| GrabError::Filesystem(format!("create {}: {err}", target.display())))?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(GrabError::UnreadableDataArchive(format!("{label}: {err}")));
            }
        };
        file.write_all(&buf[..read])
            .map_err(|err| GrabError::Filesystem(format!("write {}: {err}", target.display())))?;
    }
    file.flush()
        .map_err(|err| GrabError::Filesystem(format!("write {}: {err}", target.display())))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

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

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn deb(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut builder = ar::Builder::new(&mut out);
            for (name, data) in members {
                let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
                builder.append(&header, data.as_slice()).unwrap();
            }
        }
        out
    }

    /// Selection plus whatever landed in the elf / map targets.
    #[derive(Debug)]
    struct Extracted {
        selection: Selection,
        elf: Option<Vec<u8>>,
        map: Option<Vec<u8>>,
    }

    fn extract(package: Vec<u8>, tie_break: TieBreak) -> Result<Extracted, GrabError> {
        let temp = tempfile::tempdir().unwrap();
        let elf = temp.path().join("elf");
        let map = temp.path().join("map");
        let targets = HashMap::from([
            (MemberKind::DebugBinary, elf.clone()),
            (MemberKind::SystemMap, map.clone()),
        ]);
        let mut selector = MemberSelector::new(tie_break, &MemberKind::ALL);
        extract_members(Cursor::new(package), "test.deb", &mut selector, &targets)?;
        Ok(Extracted {
            selection: selector.into_selection(),
            elf: std::fs::read(&elf).ok(),
            map: std::fs::read(&map).ok(),
        })
    }

    #[test]
    fn compression_from_member_name() {
        assert_eq!(
            DataCompression::from_member_name("data.tar.xz"),
            Some(DataCompression::Xz)
        );
        assert_eq!(
            DataCompression::from_member_name("data.tar.gz"),
            Some(DataCompression::Gzip)
        );
        assert_eq!(
            DataCompression::from_member_name("data.tar.zst"),
            Some(DataCompression::Zstd)
        );
        assert_eq!(
            DataCompression::from_member_name("data.tar"),
            Some(DataCompression::None)
        );
        assert_eq!(DataCompression::from_member_name("data.tar.bz2"), None);
    }

    #[test]
    fn selector_keeps_last_match_by_default() {
        let mut selector = MemberSelector::new(TieBreak::Last, &MemberKind::ALL);
        for path in [
            "./boot/System.map-6.1.0-1-amd64",
            "./usr/lib/debug/boot/vmlinux-6.1.0-1-amd64",
            "./usr/lib/debug/vmlinux-6.1.0-1-amd64",
            "./boot/System.map-6.1.0-1-amd64.old",
        ] {
            assert!(selector.offer(path).is_some(), "{path}");
        }
        let selection = selector.into_selection();
        assert_eq!(
            selection.debug_binary.as_deref(),
            Some("./usr/lib/debug/vmlinux-6.1.0-1-amd64")
        );
        assert_eq!(
            selection.system_map.as_deref(),
            Some("./boot/System.map-6.1.0-1-amd64.old")
        );
    }

    #[test]
    fn selector_first_policy_keeps_first_match() {
        let mut selector = MemberSelector::new(TieBreak::First, &MemberKind::ALL);
        assert_eq!(selector.offer("./a/vmlinux-1"), Some(MemberKind::DebugBinary));
        assert_eq!(selector.offer("./b/vmlinux-2"), None);
        assert_eq!(selector.offer("./c/README"), None);
        let selection = selector.into_selection();
        assert_eq!(selection.debug_binary.as_deref(), Some("./a/vmlinux-1"));
        assert_eq!(selection.system_map, None);
    }

    #[test]
    fn selector_ignores_unwanted_kinds() {
        let mut selector = MemberSelector::new(TieBreak::Last, &[MemberKind::SystemMap]);
        assert_eq!(selector.offer("./boot/vmlinux-6.1"), None);
        assert_eq!(
            selector.offer("./boot/System.map-6.1"),
            Some(MemberKind::SystemMap)
        );
        assert_eq!(selector.into_selection().debug_binary, None);
    }

    #[test]
    fn finds_data_member_at_any_position() {
        let inner = xz(&tarball(&[("boot/System.map-6.1", b"map")]));
        let package = deb(&[
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.xz", xz(&tarball(&[("control", b"Package: x")]))),
            ("data.tar.xz", inner),
            ("_trailer", b"zz".to_vec()),
        ]);
        let extracted = extract(package, TieBreak::Last).unwrap();
        assert_eq!(
            extracted.selection.system_map.as_deref(),
            Some("boot/System.map-6.1")
        );
        assert_eq!(extracted.map.as_deref(), Some(&b"map"[..]));
        assert_eq!(extracted.elf, None);
    }

    #[test]
    fn missing_data_member_is_reported() {
        let package = deb(&[("debian-binary", b"2.0\n".to_vec())]);
        assert_matches!(
            extract(package, TieBreak::Last),
            Err(GrabError::MissingDataArchive(_))
        );
    }

    #[test]
    fn non_ar_input_is_unreadable() {
        assert_matches!(
            extract(b"<html>404</html>".to_vec(), TieBreak::Last),
            Err(GrabError::UnreadablePackage(_))
        );
    }

    #[test]
    fn corrupt_data_member_is_unreadable() {
        let package = deb(&[("data.tar.xz", b"not xz at all".to_vec())]);
        assert_matches!(
            extract(package, TieBreak::Last),
            Err(GrabError::UnreadableDataArchive(_))
        );
    }

    #[test]
    fn unsupported_compression_is_unreadable() {
        let package = deb(&[("data.tar.bz2", b"BZh".to_vec())]);
        assert_matches!(
            extract(package, TieBreak::Last),
            Err(GrabError::UnreadableDataArchive(_))
        );
    }

    #[test]
    fn extracts_selected_members_to_targets() {
        let inner = tarball(&[
            ("usr/lib/debug/boot/vmlinux-6.1", b"first"),
            ("boot/System.map-6.1", b"symbols"),
            ("usr/lib/debug/vmlinux-6.1", b"second"),
        ]);
        let extracted = extract(deb(&[("data.tar", inner)]), TieBreak::Last).unwrap();

        assert_eq!(extracted.elf.as_deref(), Some(&b"second"[..]));
        assert_eq!(extracted.map.as_deref(), Some(&b"symbols"[..]));
        assert_eq!(
            extracted.selection.debug_binary.as_deref(),
            Some("usr/lib/debug/vmlinux-6.1")
        );
    }

    #[test]
    fn first_tie_break_keeps_first_content() {
        let inner = tarball(&[
            ("usr/lib/debug/boot/vmlinux-6.1", b"first"),
            ("usr/lib/debug/vmlinux-6.1", b"second"),
        ]);
        let extracted = extract(deb(&[("data.tar", inner)]), TieBreak::First).unwrap();
        assert_eq!(extracted.elf.as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn extracts_from_gzip_data_archive() {
        let inner = gzip(&tarball(&[
            ("usr/lib/debug/boot/vmlinux-6.1", b"E"),
            ("boot/System.map-6.1", b"M"),
        ]));
        let extracted = extract(deb(&[("data.tar.gz", inner)]), TieBreak::Last).unwrap();
        assert_eq!(extracted.elf.as_deref(), Some(&b"E"[..]));
        assert_eq!(extracted.map.as_deref(), Some(&b"M"[..]));
    }

    #[test]
    fn extracts_from_zstd_data_archive() {
        let raw = tarball(&[
            ("usr/lib/debug/boot/vmlinux-6.1", b"E"),
            ("boot/System.map-6.1", b"M"),
        ]);
        let inner = zstd::encode_all(raw.as_slice(), 0).unwrap();
        let extracted = extract(deb(&[("data.tar.zst", inner)]), TieBreak::Last).unwrap();
        assert_eq!(extracted.elf.as_deref(), Some(&b"E"[..]));
        assert_eq!(extracted.map.as_deref(), Some(&b"M"[..]));
    }

    #[test]
    fn links_and_directories_are_not_captured() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut file = tar::Header::new_gnu();
        file.set_size(4);
        file.set_mode(0o644);
        file.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut file, "usr/lib/debug/boot/vmlinux-6.1", &b"real"[..])
            .unwrap();

        let mut dir = tar::Header::new_gnu();
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_entry_type(tar::EntryType::Directory);
        builder
            .append_data(&mut dir, "usr/lib/debug/vmlinux-dir/", io::empty())
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_size(0);
        link.set_mode(0o777);
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_link_name("boot/vmlinux-6.1").unwrap();
        builder
            .append_data(&mut link, "usr/lib/debug/vmlinux-6.1", io::empty())
            .unwrap();

        let inner = builder.into_inner().unwrap();
        let extracted = extract(deb(&[("data.tar", inner)]), TieBreak::Last).unwrap();

        assert_eq!(
            extracted.selection.debug_binary.as_deref(),
            Some("usr/lib/debug/boot/vmlinux-6.1")
        );
        assert_eq!(extracted.elf.as_deref(), Some(&b"real"[..]));
    }
}
