//! User and group id range mappings.
//!
//! An [`IdMapSet`] is the ordered list of ranges written into a user namespace's `uid_map` and
//! `gid_map` files. The kernel treats those files as a first-match table, so the order in which
//! entries are added is the order in which they are written. Overlapping ranges are not detected
//! here, the kernel rejects them when the map is written.

use std::fmt;
use std::io::Write as _;
use std::str::FromStr;

use thiserror::Error;

/// Largest map payload [`IdMapSet::kernel_map`] renders for `/proc/<pid>/{u,g}id_map`.
///
/// The kernel itself rejects writes of a full page (`EINVAL`), so a payload of exactly this size
/// gets past rendering but fails when written. The C `mount-idmapped` tool stops at 4095 bytes.
pub const IDMAP_WRITE_MAX: usize = 4096;

/// Whether a mapping applies to user or group ids.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IdKind {
    /// User ids.
    Uid,
    /// Group ids.
    Gid,
}

impl IdKind {
    /// Both kinds in the order their maps are written.
    pub const ALL: [IdKind; 2] = [IdKind::Uid, IdKind::Gid];

    /// The single letter used for this kind in a mapping spec.
    pub const fn letter(self) -> char {
        match self {
            IdKind::Uid => 'u',
            IdKind::Gid => 'g',
        }
    }

    /// The name of the map file in `/proc/<pid>/`.
    pub const fn map_file(self) -> &'static str {
        match self {
            IdKind::Uid => "uid_map",
            IdKind::Gid => "gid_map",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            IdKind::Uid => "uid",
            IdKind::Gid => "gid",
        })
    }
}

/// Maps `range` consecutive ids starting at `ns_id` inside the namespace to ids starting at
/// `host_id` in the parent namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct IdMapEntry {
    kind: IdKind,
    ns_id: u32,
    host_id: u32,
    range: u32,
}

impl IdMapEntry {
    /// Create a new mapping entry.
    pub const fn new(kind: IdKind, ns_id: u32, host_id: u32, range: u32) -> Self {
        Self {
            kind,
            ns_id,
            host_id,
            range,
        }
    }

    /// Whether this maps user or group ids.
    pub const fn kind(&self) -> IdKind {
        self.kind
    }

    /// First id inside the namespace.
    pub const fn ns_id(&self) -> u32 {
        self.ns_id
    }

    /// First id in the parent namespace.
    pub const fn host_id(&self) -> u32 {
        self.host_id
    }

    /// Number of consecutive ids.
    pub const fn range(&self) -> u32 {
        self.range
    }

    /// Parse a `<kind>:<ns id>:<host id>:<range>` spec.
    ///
    /// `kind` is one of `u`, `g` or `b`. `b` produces two entries, the user id mapping first, then
    /// the group id mapping, both with the same numbers.
    pub fn parse(spec: &str) -> Result<Vec<Self>, ParseIdMapError> {
        let invalid = || ParseIdMapError {
            spec: spec.to_string(),
        };

        let mut parts = spec.split(':');
        let mut next = || parts.next().ok_or_else(invalid);
        let kind = next()?;
        let ns_id = next()?;
        let host_id = next()?;
        let range = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        let number = |s: &str| -> Result<u32, ParseIdMapError> {
            // `u32::from_str` accepts a leading '+'
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse::<u32>().map_err(|_| invalid())
        };
        let (ns_id, host_id, range) = (number(ns_id)?, number(host_id)?, number(range)?);

        let kinds: &[IdKind] = match kind {
            "u" => &[IdKind::Uid],
            "g" => &[IdKind::Gid],
            "b" => &IdKind::ALL,
            _ => return Err(invalid()),
        };

        Ok(kinds
            .iter()
            .map(|&kind| Self::new(kind, ns_id, host_id, range))
            .collect())
    }
}

impl fmt::Display for IdMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind.letter(),
            self.ns_id,
            self.host_id,
            self.range
        )
    }
}

/// An invalid id mapping spec.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid id mapping {spec:?}, expected <u|g|b>:<ns id>:<host id>:<range>")]
pub struct ParseIdMapError {
    spec: String,
}

impl ParseIdMapError {
    /// The spec which failed to parse.
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

/// The serialized map payload for one [`IdKind`] is larger than the kernel accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("too many {kind} mappings defined ({len} bytes, at most {max} allowed)", max = IDMAP_WRITE_MAX)]
pub struct MapTooLarge {
    /// The kind of map which overflowed.
    pub kind: IdKind,
    /// The length the payload would have had.
    pub len: usize,
}

/// An ordered set of id mappings.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IdMapSet {
    entries: Vec<IdMapEntry>,
}

impl IdMapSet {
    /// Create an empty set.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    pub fn push(&mut self, entry: IdMapEntry) {
        self.entries.push(entry);
    }

    /// Parse a spec and append the resulting entries. The set is unchanged on error.
    pub fn parse_into(&mut self, spec: &str) -> Result<(), ParseIdMapError> {
        let entries = IdMapEntry::parse(spec)?;
        self.entries.extend(entries);
        Ok(())
    }

    /// Whether the set has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, IdMapEntry> {
        self.entries.iter()
    }

    /// Iterate over the entries of one kind in insertion order.
    pub fn of_kind(&self, kind: IdKind) -> impl Iterator<Item = &IdMapEntry> + '_ {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Render the `/proc/<pid>/{u,g}id_map` payload for `kind`.
    ///
    /// Returns `Ok(None)` if there are no entries of that kind, since an empty write would be
    /// rejected by the kernel.
    pub fn kernel_map(&self, kind: IdKind) -> Result<Option<Vec<u8>>, MapTooLarge> {
        let mut data = Vec::new();
        for entry in self.of_kind(kind) {
            // writing into a Vec cannot fail
            let _ = writeln!(data, "{} {} {}", entry.ns_id, entry.host_id, entry.range);
        }

        if data.is_empty() {
            return Ok(None);
        }
        if data.len() > IDMAP_WRITE_MAX {
            return Err(MapTooLarge {
                kind,
                len: data.len(),
            });
        }
        Ok(Some(data))
    }
}

impl FromStr for IdMapSet {
    type Err = ParseIdMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IdMapEntry::parse(s).map(|entries| Self { entries })
    }
}

impl FromIterator<IdMapEntry> for IdMapSet {
    fn from_iter<I: IntoIterator<Item = IdMapEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<IdMapEntry> for IdMapSet {
    fn extend<I: IntoIterator<Item = IdMapEntry>>(&mut self, iter: I) {
        self.entries.extend(iter)
    }
}

impl<'a> IntoIterator for &'a IdMapSet {
    type Item = &'a IdMapEntry;
    type IntoIter = std::slice::Iter<'a, IdMapEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
