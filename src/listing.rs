//! Directory listing: enumerate regular files in the storage root and
//! serialize them as `<name> (<kb> kb)\n` lines.

use std::path::Path;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::{SessionError, SessionResult};
use crate::paths::is_temp_name;

/// One stored file. Sizes are decimal kilobytes (bytes / 1000).
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub name: String,
    pub size_kb: f64,
}

impl ListingEntry {
    pub fn new(name: impl Into<String>, size_kb: f64) -> Self {
        Self {
            name: name.into(),
            size_kb,
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: u64) -> Self {
        Self::new(name, bytes as f64 / 1000.0)
    }

    fn encode_into(&self, out: &mut String) {
        out.push_str(&format!("{} ({:.1} kb)\n", self.name, self.size_kb));
    }

    fn decode_line(line: &str) -> SessionResult<Self> {
        let body = line
            .strip_suffix(" kb)")
            .ok_or_else(|| SessionError::decode(format!("bad listing line: {:?}", line)))?;
        let split = body
            .rfind(" (")
            .ok_or_else(|| SessionError::decode(format!("bad listing line: {:?}", line)))?;
        let (name, size) = (&body[..split], &body[split + 2..]);
        if name.is_empty() {
            return Err(SessionError::decode("listing entry without a name"));
        }
        let size_kb: f64 = size
            .parse()
            .map_err(|_| SessionError::decode(format!("bad listing size: {:?}", size)))?;
        if !size_kb.is_finite() || size_kb < 0.0 {
            return Err(SessionError::decode(format!("bad listing size: {:?}", size)));
        }
        Ok(Self::new(name, size_kb))
    }
}

/// Stored files in directory-iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    entries: Vec<ListingEntry>,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ListingEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListingEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ListingEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Serialize every entry; the empty listing encodes to the empty string.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            e.encode_into(&mut out);
        }
        out
    }

    pub fn decode(body: &str) -> SessionResult<Self> {
        let mut listing = Listing::new();
        for line in body.split_terminator('\n') {
            listing.push(ListingEntry::decode_line(line)?);
        }
        Ok(listing)
    }

    /// Order-insensitive comparison of names and sizes (at wire precision).
    pub fn eq_unordered(&self, other: &Listing) -> bool {
        fn keyed(l: &Listing) -> Vec<(String, String)> {
            let mut v: Vec<_> = l
                .iter()
                .map(|e| (e.name.clone(), format!("{:.1}", e.size_kb)))
                .collect();
            v.sort();
            v
        }
        keyed(self) == keyed(other)
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a ListingEntry;
    type IntoIter = std::slice::Iter<'a, ListingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Scan `dir` (non-recursively) for regular files.
/// An unreadable directory yields an empty listing.
pub fn build_listing(dir: &Path) -> Listing {
    let mut listing = Listing::new();
    if !dir.is_dir() {
        warn!("storage directory {} cannot be opened", dir.display());
        return listing;
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_temp_name(&name) || name.contains('\n') {
            continue;
        }
        match entry.metadata() {
            Ok(md) => listing.push(ListingEntry::from_bytes(name, md.len())),
            Err(e) => warn!("cannot stat {}: {}", entry.path().display(), e),
        }
    }
    debug!("listed {} file(s) in {}", listing.len(), dir.display());
    listing
}
