//! Reader for the glibc `/etc/ld.so.cache` file.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use thiserror::Error;

use super::join_root;
use super::Locate;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;

pub const LDCACHE_PATH: &str = "/etc/ld.so.cache";

const MAGIC_OLD: &[u8] = b"ld.so-1.7.0";
const MAGIC_NEW: &[u8] = b"glibc-ld.so.cache";
const VERSION_NEW: &[u8] = b"1.1";

const HEADER_OLD_LEN: usize = 16;
const ENTRY_OLD_LEN: usize = 12;
const HEADER_NEW_LEN: usize = 48;
const ENTRY_NEW_LEN: usize = 24;

const FLAG_TYPE_MASK: i32 = 0x00ff;
const FLAG_TYPE_ELF: i32 = 0x0001;
const FLAG_ARCH_MASK: i32 = 0xff00;
const FLAG_ARCH_I386: i32 = 0x0000;
const FLAG_ARCH_X8664: i32 = 0x0300;
const FLAG_ARCH_PPC64LE: i32 = 0x0500;
const FLAG_ARCH_X32: i32 = 0x0800;
const FLAG_ARCH_AARCH64: i32 = 0x0a00;

#[derive(Debug, Error)]
pub enum LdCacheError {
    #[error("failed to read ld.so.cache: {0}")]
    Io(#[from] io::Error),

    #[error("ld.so.cache is truncated at offset {0}")]
    Truncated(usize),

    #[error("unsupported ld.so.cache format")]
    UnsupportedFormat,

    #[error("unsupported ld.so.cache version `{0}`")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdCacheEntry {
    pub name: String,
    pub path: String,
    pub bits: u8,
}

/// The ELF library entries of an `ld.so.cache` file.
#[derive(Debug, Default)]
pub struct LdCache {
    entries: Vec<LdCacheEntry>,
}

impl LdCache {
    /// Loads the cache below `root`. A missing cache is treated as empty.
    pub fn open(root: &Path) -> Result<Self, LdCacheError> {
        let path = join_root(root, LDCACHE_PATH);
        match fs::read(&path) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No ld.so.cache at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, LdCacheError> {
        let mut offset = 0;
        if data.starts_with(MAGIC_OLD) {
            let nlibs = read_u32(data, MAGIC_OLD.len() + 1)? as usize;
            offset = nlibs
                .checked_mul(ENTRY_OLD_LEN)
                .and_then(|len| len.checked_add(HEADER_OLD_LEN + 7))
                .ok_or(LdCacheError::Truncated(data.len()))?
                & !7;
        }

        let header = data
            .get(offset..offset + HEADER_NEW_LEN)
            .ok_or(LdCacheError::Truncated(offset))?;
        if !header.starts_with(MAGIC_NEW) {
            return Err(LdCacheError::UnsupportedFormat);
        }
        let version = &header[MAGIC_NEW.len()..MAGIC_NEW.len() + VERSION_NEW.len()];
        if version != VERSION_NEW {
            return Err(LdCacheError::UnsupportedVersion(
                String::from_utf8_lossy(version).into_owned(),
            ));
        }

        let nlibs = read_u32(data, offset + 20)? as usize;
        let table = offset + HEADER_NEW_LEN;
        if nlibs > (data.len() - table) / ENTRY_NEW_LEN {
            return Err(LdCacheError::Truncated(data.len()));
        }
        let mut entries = Vec::with_capacity(nlibs);
        for i in 0..nlibs {
            let entry = table + i * ENTRY_NEW_LEN;
            let flags = read_u32(data, entry)? as i32;
            let key = read_u32(data, entry + 4)? as usize;
            let value = read_u32(data, entry + 8)? as usize;

            if flags & FLAG_TYPE_MASK & FLAG_TYPE_ELF == 0 {
                continue;
            }
            let bits = match flags & FLAG_ARCH_MASK {
                FLAG_ARCH_X8664 | FLAG_ARCH_PPC64LE | FLAG_ARCH_AARCH64 => 64,
                FLAG_ARCH_X32 | FLAG_ARCH_I386 => 32,
                _ => continue,
            };
            let name = read_str(data, offset + key)?;
            let path = read_str(data, offset + value)?;
            if path.is_empty() {
                continue;
            }
            entries.push(LdCacheEntry { name, path, bits });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LdCacheEntry] {
        &self.entries
    }

    /// Library paths for the given word size.
    pub fn libraries(&self, bits: u8) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.bits == bits)
            .map(|e| e.path.as_str())
    }
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, LdCacheError> {
    let bytes = data.get(at..at + 4).ok_or(LdCacheError::Truncated(at))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_ne_bytes(buf))
}

fn read_str(data: &[u8], at: usize) -> Result<String, LdCacheError> {
    let tail = data.get(at..).ok_or(LdCacheError::Truncated(at))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(LdCacheError::Truncated(at))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Locates libraries through the `ld.so.cache` of a root.
#[derive(Debug, Clone)]
pub struct LdCacheLocator {
    root: PathBuf,
}

impl LdCacheLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Locate for LdCacheLocator {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        let lookup_error = |message: String| {
            Report::new(NvcdiError::Lookup {
                pattern: pattern.to_string(),
                message,
            })
        };
        let cache = LdCache::open(&self.root).map_err(|e| lookup_error(e.to_string()))?;
        let matcher = glob::Pattern::new(pattern).map_err(|e| lookup_error(e.to_string()))?;
        let absolute = Path::new(pattern).is_absolute();
        let bits = if cfg!(target_pointer_width = "64") { 64 } else { 32 };

        let mut found = BTreeSet::new();
        for library in cache.libraries(bits) {
            let candidate = if absolute {
                library
            } else {
                match Path::new(library).file_name().and_then(|n| n.to_str()) {
                    Some(name) => name,
                    None => continue,
                }
            };
            if !matcher.matches(candidate) {
                continue;
            }
            let host_path = join_root(&self.root, library);
            match fs::canonicalize(&host_path) {
                Ok(target) => {
                    found.insert(target);
                }
                Err(e) => tracing::debug!("Skipping {}: {e}", host_path.display()),
            }
        }
        Ok(found.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    /// Builds a new-format cache holding `(flags, name, path)` entries.
    pub(crate) fn build_cache(entries: &[(i32, &str, &str)]) -> Vec<u8> {
        let strings_start = HEADER_NEW_LEN + entries.len() * ENTRY_NEW_LEN;
        let mut strings = Vec::new();
        let mut table = Vec::new();
        for (flags, name, path) in entries {
            let key = strings_start + strings.len();
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            let value = strings_start + strings.len();
            strings.extend_from_slice(path.as_bytes());
            strings.push(0);

            table.extend_from_slice(&flags.to_ne_bytes());
            table.extend_from_slice(&(key as u32).to_ne_bytes());
            table.extend_from_slice(&(value as u32).to_ne_bytes());
            table.extend_from_slice(&0u32.to_ne_bytes());
            table.extend_from_slice(&0u64.to_ne_bytes());
        }

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC_NEW);
        data.extend_from_slice(VERSION_NEW);
        data.extend_from_slice(&(entries.len() as u32).to_ne_bytes());
        data.extend_from_slice(&(strings.len() as u32).to_ne_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&table);
        data.extend_from_slice(&strings);
        data
    }

    #[test]
    fn parses_new_format() {
        let data = build_cache(&[
            (0x0303, "libcuda.so.1", "/usr/lib/x86_64-linux-gnu/libcuda.so.1"),
            (0x0003, "libcuda.so.1", "/usr/lib/i386-linux-gnu/libcuda.so.1"),
            (0x0000, "libfoo.so", "/usr/lib/libfoo.so"),
        ]);
        let cache = LdCache::parse(&data).unwrap();
        assert_eq!(cache.entries().len(), 2);
        assert_eq!(
            cache.libraries(64).collect::<Vec<_>>(),
            vec!["/usr/lib/x86_64-linux-gnu/libcuda.so.1"]
        );
        assert_eq!(
            cache.libraries(32).collect::<Vec<_>>(),
            vec!["/usr/lib/i386-linux-gnu/libcuda.so.1"]
        );
    }

    #[test]
    fn parses_combined_format() {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC_OLD);
        data.push(0);
        data.extend_from_slice(&1u32.to_ne_bytes());
        data.extend_from_slice(&[0u8; ENTRY_OLD_LEN]);
        // 16 + 12 = 28, padded to 32
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&build_cache(&[(
            0x0303,
            "libnvidia-ml.so.1",
            "/usr/lib64/libnvidia-ml.so.1",
        )]));

        let cache = LdCache::parse(&data).unwrap();
        assert_eq!(
            cache.libraries(64).collect::<Vec<_>>(),
            vec!["/usr/lib64/libnvidia-ml.so.1"]
        );
    }

    #[test]
    fn rejects_unknown_data() {
        assert!(matches!(
            LdCache::parse(&[0u8; 64]),
            Err(LdCacheError::UnsupportedFormat)
        ));
        assert!(matches!(
            LdCache::parse(b"glibc"),
            Err(LdCacheError::Truncated(0))
        ));
    }

    #[test]
    fn entry_count_beyond_data() {
        let mut data = build_cache(&[(0x0303, "libcuda.so.1", "/usr/lib64/libcuda.so.1")]);
        data[MAGIC_NEW.len() + VERSION_NEW.len()..][..4].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert!(matches!(
            LdCache::parse(&data),
            Err(LdCacheError::Truncated(len)) if len == data.len()
        ));
    }

    #[test]
    fn missing_cache_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let cache = LdCache::open(root.path()).unwrap();
        assert!(cache.entries().is_empty());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn locator_matches_basenames() {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("usr/lib64");
        fs::create_dir_all(&lib).unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(lib.join("libcuda.so.1"), "").unwrap();
        fs::write(
            root.path().join("etc/ld.so.cache"),
            build_cache(&[
                (0x0303, "libcuda.so.1", "/usr/lib64/libcuda.so.1"),
                (0x0303, "libmissing.so.1", "/usr/lib64/libmissing.so.1"),
            ]),
        )
        .unwrap();

        let locator = LdCacheLocator::new(root.path());
        assert_eq!(
            locator.locate("libcuda.so.*").unwrap(),
            vec![fs::canonicalize(lib.join("libcuda.so.1")).unwrap()]
        );
        assert!(locator.locate("libmissing.so.*").unwrap().is_empty());
    }
}
