//! Conflict naming for moved-aside local copies
//!
//! Generates sibling names following the pattern `stem (n).ext`, where `n`
//! is the smallest integer from 1 upwards that is not taken:
//! `report.txt` → `report (1).txt` → `report (2).txt`.

/// Highest suffix tried before giving up
pub const MAX_SUFFIX: u32 = 9999;

/// Generates unique conflict file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Builds the candidate name for suffix `n`
    ///
    /// Files keep their extension after the suffix. Folders, dotfiles and
    /// names without a dot get the suffix appended at the end.
    pub fn candidate(original_name: &str, n: u32, is_folder: bool) -> String {
        match split_extension(original_name, is_folder) {
            Some((stem, ext)) => format!("{stem} ({n}){ext}"),
            None => format!("{original_name} ({n})"),
        }
    }

    /// Returns the first candidate for which `exists` is false
    ///
    /// Returns `None` if every suffix up to [`MAX_SUFFIX`] is taken.
    pub fn generate_unique<F>(original_name: &str, is_folder: bool, mut exists: F) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        (1..=MAX_SUFFIX)
            .map(|n| Self::candidate(original_name, n, is_folder))
            .find(|candidate| !exists(candidate))
    }
}

/// Splits `name.ext` into `("name", ".ext")`
fn split_extension(name: &str, is_folder: bool) -> Option<(&str, &str)> {
    if is_folder {
        return None;
    }
    match name.rfind('.') {
        Some(0) | None => None,
        Some(pos) => Some((&name[..pos], &name[pos..])),
    }
}
