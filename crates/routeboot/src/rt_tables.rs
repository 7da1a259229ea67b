//! The iproute2 routing-table name registry (`/etc/iproute2/rt_tables`).
//!
//! Each line is `<id> <name>`, ids may be hex (`0xfe`), `#` starts a
//! comment. Files in the sibling `rt_tables.d/*.conf` directory are merged
//! after the main file, as `ip` does.
//!
//! Distributions that ship iproute2 defaults under `/usr/share/iproute2`
//! are handled the way `ip` handles them: the vendor file stands in for a
//! missing `/etc` file, and vendor drop-ins are read unless `/etc` has a
//! drop-in of the same name.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use winnow::ascii::{dec_uint, hex_uint, space0, space1};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

use crate::error::{Error, Result};
use crate::netlink::parse::PResult;

/// Default location of the registry.
pub const DEFAULT_PATH: &str = "/etc/iproute2/rt_tables";

/// Where iproute2 installs its own copy of the registry.
pub const VENDOR_PATH: &str = "/usr/share/iproute2/rt_tables";

/// The vendor registry backing `path`, if `path` is the system default.
pub fn vendor_for(path: &Path) -> Option<&'static Path> {
    (path == Path::new(DEFAULT_PATH)).then(|| Path::new(VENDOR_PATH))
}

/// One `<id> <name>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub id: u32,
    pub name: String,
}

/// A snapshot of the table registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRegistry {
    entries: Vec<TableEntry>,
}

/// What [`TableRegistry::check`] found for an `(id, name)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Present,
    Absent,
}

impl TableRegistry {
    /// The entries iproute2 ships by default.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                TableEntry { id: 255, name: "local".into() },
                TableEntry { id: 254, name: "main".into() },
                TableEntry { id: 253, name: "default".into() },
                TableEntry { id: 0, name: "unspec".into() },
            ],
        }
    }

    /// Parse registry text. Malformed lines are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut registry = Self::default();
        registry.extend_from(text, None);
        registry
    }

    /// Load `path` plus `rt_tables.d/*.conf` next to it.
    ///
    /// A missing main file yields an empty registry, unless `path` is
    /// [`DEFAULT_PATH`], in which case [`VENDOR_PATH`] is used instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::load_layered(path, vendor_for(path))
    }

    /// Load `path` with `vendor` as the fallback main file and as a second
    /// source of drop-ins.
    pub fn load_layered(path: impl AsRef<Path>, vendor: Option<&Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Self::default();

        if let Some((origin, text)) = read_main(path, vendor)? {
            registry.extend_from(&text, Some(&origin));
        }

        for conf in drop_in_files(path, vendor)? {
            let text = fs::read_to_string(&conf).map_err(|e| Error::rt_tables(&conf, e))?;
            registry.extend_from(&text, Some(&conf));
        }

        Ok(registry)
    }

    fn extend_from(&mut self, text: &str, origin: Option<&Path>) {
        for (lineno, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match table_line.parse(trimmed) {
                Ok((id, name)) => self.entries.push(TableEntry {
                    id,
                    name: name.to_string(),
                }),
                Err(_) => tracing::warn!(
                    file = %origin.map(|p| p.display().to_string()).unwrap_or_default(),
                    line = lineno + 1,
                    "skipping malformed rt_tables line: {trimmed}"
                ),
            }
        }
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Id registered for `name` (first match wins).
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    /// Name registered for `id` (first match wins).
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }

    /// Error if registering `(id, name)` would clash with an existing entry.
    pub fn conflict_for(&self, id: u32, name: &str) -> Option<Error> {
        if let Some(existing) = self.id_of(name)
            && existing != id
        {
            return Some(Error::TableConflict {
                name: name.to_string(),
                existing,
                requested: id,
            });
        }
        if let Some(existing) = self.name_of(id)
            && existing != name
        {
            return Some(Error::TableIdConflict {
                id,
                existing: existing.to_string(),
                requested: name.to_string(),
            });
        }
        None
    }

    /// Whether `(id, name)` is already registered, or the conflict preventing it.
    pub fn check(&self, id: u32, name: &str) -> Result<Registration> {
        if let Some(err) = self.conflict_for(id, name) {
            return Err(err);
        }
        if self.id_of(name) == Some(id) {
            Ok(Registration::Present)
        } else {
            Ok(Registration::Absent)
        }
    }

    /// Add an entry in memory. Returns `false` if it was already present.
    pub fn insert(&mut self, id: u32, name: &str) -> Result<bool> {
        match self.check(id, name)? {
            Registration::Present => Ok(false),
            Registration::Absent => {
                self.entries.push(TableEntry {
                    id,
                    name: name.to_string(),
                });
                Ok(true)
            }
        }
    }

    /// Remove every entry matching `(id, name)`. Returns `false` if none did.
    pub fn remove(&mut self, id: u32, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.id == id && e.name == name));
        self.entries.len() != before
    }
}

/// Register `(id, name)` in the file at `path`.
///
/// Returns `Ok(false)` without touching the file if the entry exists in the
/// file or a drop-in, fails on a conflicting entry, and otherwise appends
/// `"{id}\t{name}\n"`, creating the parent directory if needed.
pub fn register(path: impl AsRef<Path>, id: u32, name: &str) -> Result<bool> {
    let path = path.as_ref();
    register_layered(path, vendor_for(path), id, name)
}

/// [`register`] with an explicit vendor fallback.
///
/// When `path` does not exist yet but `vendor` does, the new file starts as
/// a copy of the vendor file so the stock entries stay visible to `ip`.
pub fn register_layered(
    path: impl AsRef<Path>,
    vendor: Option<&Path>,
    id: u32,
    name: &str,
) -> Result<bool> {
    let path = path.as_ref();
    let registry = TableRegistry::load_layered(path, vendor)?;
    if registry.check(id, name)? == Registration::Present {
        return Ok(false);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::rt_tables(parent, e))?;
    }

    let mut existing = match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(Error::rt_tables(path, e)),
    };
    if existing.is_none()
        && let Some((origin, text)) = read_main(path, vendor)?
    {
        fs::write(path, &text).map_err(|e| Error::rt_tables(path, e))?;
        tracing::debug!(from = %origin.display(), to = %path.display(), "seeded rt_tables");
        existing = Some(text);
    }

    // Keep the file line-oriented even if the last line lacks a newline.
    let needs_newline = existing.is_some_and(|text| !text.is_empty() && !text.ends_with('\n'));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::rt_tables(path, e))?;
    let line = if needs_newline {
        format!("\n{id}\t{name}\n")
    } else {
        format!("{id}\t{name}\n")
    };
    file.write_all(line.as_bytes())
        .map_err(|e| Error::rt_tables(path, e))?;

    tracing::debug!(path = %path.display(), id, name, "registered routing table");
    Ok(true)
}

/// Remove `(id, name)` from the file at `path`, keeping every other line
/// (comments included) as is. Returns `Ok(false)` if no line matched.
///
/// Entries that come from a drop-in are never edited: if one defines
/// `(id, name)` this fails without touching any file.
pub fn unregister(path: impl AsRef<Path>, id: u32, name: &str) -> Result<bool> {
    let path = path.as_ref();
    unregister_layered(path, vendor_for(path), id, name)
}

/// [`unregister`] with an explicit vendor fallback.
pub fn unregister_layered(
    path: impl AsRef<Path>,
    vendor: Option<&Path>,
    id: u32,
    name: &str,
) -> Result<bool> {
    let path = path.as_ref();
    for conf in drop_in_files(path, vendor)? {
        let text = fs::read_to_string(&conf).map_err(|e| Error::rt_tables(&conf, e))?;
        if text.lines().any(|line| is_entry(line, id, name)) {
            return Err(Error::rt_tables(
                &conf,
                format!("table {id} {name:?} is defined in a drop-in and was left in place"),
            ));
        }
    }

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::rt_tables(path, e)),
    };

    let mut removed = false;
    let mut kept = String::with_capacity(text.len());
    for line in text.lines() {
        if is_entry(line, id, name) {
            removed = true;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }

    if removed {
        fs::write(path, kept).map_err(|e| Error::rt_tables(path, e))?;
        tracing::debug!(path = %path.display(), id, name, "unregistered routing table");
    }
    Ok(removed)
}

fn is_entry(line: &str, id: u32, name: &str) -> bool {
    table_line
        .parse(line.trim())
        .is_ok_and(|(i, n)| i == id && n == name)
}

/// The main registry text: `path`, or `vendor` when `path` is missing.
fn read_main(path: &Path, vendor: Option<&Path>) -> Result<Option<(PathBuf, String)>> {
    for candidate in std::iter::once(path).chain(vendor) {
        match fs::read_to_string(candidate) {
            Ok(text) => return Ok(Some((candidate.to_path_buf(), text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::rt_tables(candidate, e)),
        }
    }
    Ok(None)
}

/// Drop-ins for `path`, then those for `vendor` not shadowed by a file of
/// the same name next to `path`.
fn drop_in_files(path: &Path, vendor: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut files = conf_files(path)?;
    if let Some(vendor) = vendor {
        let seen: HashSet<OsString> = files
            .iter()
            .filter_map(|f| f.file_name().map(|n| n.to_owned()))
            .collect();
        files.extend(
            conf_files(vendor)?
                .into_iter()
                .filter(|f| f.file_name().is_some_and(|n| !seen.contains(n))),
        );
    }
    Ok(files)
}

fn conf_files(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(dir) = path.parent().map(|p| p.join("rt_tables.d")) else {
        return Ok(Vec::new());
    };
    let read = match fs::read_dir(&dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::rt_tables(&dir, e)),
    };

    let mut files: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();
    Ok(files)
}

fn table_id(input: &mut &str) -> PResult<u32> {
    alt((preceded(alt(("0x", "0X")), hex_uint), dec_uint)).parse_next(input)
}

fn table_name<'a>(input: &mut &'a str) -> PResult<&'a str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '#').parse_next(input)
}

/// `<id> <name> [# comment]`
fn table_line<'a>(input: &mut &'a str) -> PResult<(u32, &'a str)> {
    let id = table_id(input)?;
    space1.parse_next(input)?;
    let name = table_name(input)?;
    space0.parse_next(input)?;
    opt(preceded('#', rest)).parse_next(input)?;
    Ok((id, name))
}
