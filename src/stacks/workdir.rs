//! Working copies with token substitution
//!
//! A generic IaC stack is copied into its own directory before `init`, and
//! every text file has its `telophase.*` tokens replaced with the target's
//! values. Both `telophase.account_id` and `${telophase.account_id}` forms
//! are recognized.

use orgtree::{Error, Result, StackTarget};
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

static TOKEN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{telophase\.([a-z_]+)\}|telophase\.([a-z_]+)"));

/// Resource types with their own `<type>_id` / `<type>_name` tokens.
const RESOURCE_TYPES: [&str; 2] = ["account", "organization_unit"];

/// Directories never copied into a working copy.
const SKIPPED_DIRS: [&str; 2] = [".terraform", ".git"];

/// Values substituted for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub resource_type: &'static str,
    pub id: String,
    pub name: String,
    pub region: Option<String>,
}

impl Tokens {
    /// Tokens for a provisioned target.
    pub fn for_target(target: &StackTarget<'_>, region: Option<&str>) -> Result<Self> {
        let id = target.id().ok_or_else(|| {
            Error::Unprovisioned(format!("{} {}", target.resource_type(), target.name()))
        })?;
        Ok(Self {
            resource_type: target.resource_type(),
            id,
            name: target.name().to_string(),
            region: region.map(str::to_string),
        })
    }

    /// Value for `key`, `Ok(None)` when the key is not a token.
    fn lookup(&self, key: &str) -> Result<Option<&str>> {
        match key {
            "resource_id" => return Ok(Some(&self.id)),
            "resource_name" => return Ok(Some(&self.name)),
            "region" => {
                return self.region.as_deref().map(Some).ok_or_else(|| {
                    Error::config(format!(
                        "telophase.region is used but {} {} has no region set for this stack",
                        self.resource_type, self.name
                    ))
                });
            }
            _ => {}
        }

        for resource_type in RESOURCE_TYPES {
            let Some(field) = key
                .strip_prefix(resource_type)
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            if !matches!(field, "id" | "name") {
                continue;
            }
            if resource_type != self.resource_type {
                return Err(Error::config(format!(
                    "telophase.{key} cannot be used when deploying to {} {}",
                    self.resource_type, self.name
                )));
            }
            return Ok(Some(if field == "id" { &self.id } else { &self.name }));
        }

        Ok(None)
    }
}

/// Replace every token in `content`. Unknown keys are left untouched.
pub fn substitute(content: &str, tokens: &Tokens) -> Result<String> {
    let pattern = TOKEN
        .as_ref()
        .map_err(|e| Error::config(format!("invalid token pattern: {e}")))?;
    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for captures in pattern.captures_iter(content) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let Some(value) = tokens.lookup(key(&captures))? else {
            continue;
        };
        out.push_str(&content[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&content[last..]);
    Ok(out)
}

fn key<'a>(captures: &Captures<'a>) -> &'a str {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map_or("", |m| m.as_str())
}

/// Copy `source` into `dest`, substituting tokens in every UTF-8 file.
///
/// `source` may be a single file or a directory.
pub fn materialize(source: &Path, dest: &Path, tokens: &Tokens) -> Result<()> {
    fs::create_dir_all(dest)?;

    if source.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| Error::config(format!("invalid stack path {}", source.display())))?;
        return copy_file(source, &dest.join(name), tokens);
    }
    if !source.is_dir() {
        return Err(Error::config(format!(
            "stack path {} does not exist",
            source.display()
        )));
    }

    let walker = WalkDir::new(source).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
    });

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target, tokens)?;
        }
    }

    log::debug!("Materialized {} into {}", source.display(), dest.display());
    Ok(())
}

fn copy_file(from: &Path, to: &Path, tokens: &Tokens) -> Result<()> {
    let bytes = fs::read(from)?;
    match String::from_utf8(bytes) {
        Ok(text) => {
            let text = substitute(&text, tokens).map_err(|e| match e {
                Error::Config(message) => Error::config(format!("{}: {message}", from.display())),
                other => other,
            })?;
            fs::write(to, text)?;
        }
        Err(binary) => fs::write(to, binary.into_bytes())?,
    }
    Ok(())
}
