use std::path::{Path, PathBuf};

use crate::types::StemSpec;

/// Expected stems that the engine actually wrote, in StemSpec order.
///
/// The engine may skip stems it judges silent; those are left out, not reported.
pub fn resolve(result_dir: &Path, spec: &StemSpec, decoded_ext: &str) -> Vec<(String, PathBuf)> {
    if !result_dir.is_dir() {
        tracing::warn!(
            dir = %result_dir.display(),
            "separation produced no result directory"
        );
        return Vec::new();
    }

    spec.labels()
        .filter_map(|label| {
            let path = result_dir.join(format!("{label}.{decoded_ext}"));
            if path.is_file() {
                Some((label.to_string(), path))
            } else {
                tracing::debug!(stem = label, path = %path.display(), "stem not produced");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StemMode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn returns_only_produced_stems_in_spec_order() {
        let tmp = tempdir().unwrap();
        // Written out of order on purpose.
        fs::write(tmp.path().join("other.wav"), b"o").unwrap();
        fs::write(tmp.path().join("vocals.wav"), b"v").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"n").unwrap();

        let found = resolve(tmp.path(), &StemSpec::for_mode(StemMode::Four), "wav");
        let labels: Vec<_> = found.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["vocals", "other"]);
        assert_eq!(found[0].1, tmp.path().join("vocals.wav"));
    }

    #[test]
    fn ignores_files_with_another_extension() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("vocals.mp3"), b"v").unwrap();
        let found = resolve(tmp.path(), &StemSpec::for_mode(StemMode::Two), "wav");
        assert!(found.is_empty());
    }

    #[test]
    fn missing_result_dir_resolves_to_nothing() {
        let tmp = tempdir().unwrap();
        let found = resolve(
            &tmp.path().join("never-created"),
            &StemSpec::for_mode(StemMode::Four),
            "wav",
        );
        assert!(found.is_empty());
    }
}
