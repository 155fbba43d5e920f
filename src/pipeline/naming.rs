//! Archive entry naming: sanitising and deterministic collision resolution.
//!
//! Rule: if the desired name is already taken in this run, insert
//! `-{order}` before the extension, where `order` is the item's zero-based
//! queue position. If that is taken too, append `-{k}` for the smallest
//! `k ≥ 1` that is free. Same inputs in the same order always yield the
//! same names.
//!
//! ```text
//! a.png  (order 0) → a.png
//! b.png  (order 1) → b.png
//! a.png  (order 2) → a-2.png
//! ```

use std::collections::HashSet;

/// Split `name` into `(stem, extension)` at the last dot.
///
/// Leading dots (".env") and trailing dots ("x.") are not treated as
/// extension separators.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], Some(&name[i + 1..])),
        _ => (name, None),
    }
}

/// Replace (or add) the extension of `name`.
pub fn with_extension(name: &str, ext: &str) -> String {
    let (stem, _) = split_extension(name);
    format!("{stem}.{ext}")
}

/// Reduce a user-supplied name to a safe, flat archive entry name.
///
/// Directory components are dropped (both separators), control characters
/// removed, and an empty result becomes `item-{order}`.
pub fn sanitize(name: &str, order: usize) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        format!("item-{order}")
    } else {
        cleaned.to_string()
    }
}

/// Tracks names used in one run and hands out collision-free ones.
#[derive(Debug, Default)]
pub struct NameResolver {
    taken: HashSet<String>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a unique name for the item at queue position `order`.
    pub fn resolve(&mut self, desired: &str, order: usize) -> String {
        let name = sanitize(desired, order);
        if self.taken.insert(name.clone()) {
            return name;
        }

        let (stem, ext) = split_extension(&name);
        let join = |suffix: String| match ext {
            Some(ext) => format!("{stem}{suffix}.{ext}"),
            None => format!("{stem}{suffix}"),
        };

        let candidate = join(format!("-{order}"));
        if self.taken.insert(candidate.clone()) {
            return candidate;
        }

        let mut k = 1usize;
        loop {
            let candidate = join(format!("-{order}-{k}"));
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            k += 1;
        }
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn clear(&mut self) {
        self.taken.clear();
    }
}
