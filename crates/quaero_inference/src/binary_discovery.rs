//! Locates the local inference engine's binary on disk.
//!
//! Search order: an explicitly configured directory, `./bin/<name>`,
//! `./<name>`, then a PATH lookup. On failure the error lists every
//! location that was checked so operators don't have to guess.

use std::path::{Path, PathBuf};

use crate::InferenceError;

pub fn find_binary(name: &str, configured_dir: Option<&Path>) -> Result<PathBuf, InferenceError> {
    let mut searched = Vec::new();
    let candidate_name = exe_name(name);

    if let Some(dir) = configured_dir {
        let candidate = dir.join(&candidate_name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        searched.push(candidate.display().to_string());
    }

    let bin_dir_candidate = PathBuf::from("bin").join(&candidate_name);
    if bin_dir_candidate.is_file() {
        return Ok(bin_dir_candidate);
    }
    searched.push(bin_dir_candidate.display().to_string());

    let cwd_candidate = PathBuf::from(&candidate_name);
    if cwd_candidate.is_file() {
        return Ok(cwd_candidate);
    }
    searched.push(cwd_candidate.display().to_string());

    if let Ok(path) = which::which(name) {
        return Ok(path);
    }
    searched.push(format!("$PATH ({name})"));

    Err(InferenceError::BinaryNotFound {
        name: name.to_string(),
        searched,
    })
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn finds_binary_in_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bin_name = if cfg!(windows) { "mybin.exe" } else { "mybin" };
        File::create(dir.path().join(bin_name)).unwrap();

        let found = find_binary("mybin", Some(dir.path())).unwrap();
        assert_eq!(found, dir.path().join(bin_name));
    }

    #[test]
    fn error_lists_every_searched_location() {
        let err = find_binary("definitely-not-a-real-binary-xyz", None).unwrap_err();
        match err {
            InferenceError::BinaryNotFound { searched, .. } => {
                assert!(!searched.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
