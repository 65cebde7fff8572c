//! Upload intake: filename normalization and persistence into the intake store.

use std::{fs, path::PathBuf};

use crate::{
    core::workspace::Workspace,
    error::{Result, SplitError},
    types::UploadedAsset,
};

const FALLBACK_NAME: &str = "upload";
const FALLBACK_EXT: &str = "wav";

/// Filesystem- and URL-safe base name for an untrusted upload filename.
///
/// Keeps only the last path component, drops the extension and replaces
/// whitespace and `%` with `_`. Two different names may normalize to the same
/// value; the later upload overwrites the earlier one.
pub fn normalize(name: &str) -> String {
    let (base, _) = split_extension(last_component(name));
    let safe: String = base
        .chars()
        .map(|c| if c.is_whitespace() || c == '%' { '_' } else { c })
        .collect();

    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        safe
    }
}

/// Persist the upload as `<uploads>/<normalized>.<ext>` and return its path.
pub fn save(workspace: &Workspace, asset: &UploadedAsset) -> Result<PathBuf> {
    if asset.bytes.is_empty() {
        return Err(SplitError::Intake(format!(
            "uploaded file `{}` is empty",
            asset.file_name
        )));
    }

    let base = normalize(&asset.file_name);
    let ext = upload_extension(&asset.file_name);
    let path = workspace.uploads_dir.join(format!("{base}.{ext}"));

    fs::write(&path, &asset.bytes).map_err(|e| SplitError::workspace(&path, e))?;

    tracing::info!(
        request_id = %workspace.request_id,
        original = %asset.file_name,
        saved = %path.display(),
        bytes = asset.bytes.len(),
        "saved upload"
    );
    Ok(path)
}

fn last_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

// Leading dots belong to the name (".hidden" has no extension).
fn split_extension(name: &str) -> (&str, Option<&str>) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(i) => {
            let dot = leading + i;
            (&name[..dot], Some(&name[dot + 1..]))
        }
        None => (name, None),
    }
}

fn upload_extension(name: &str) -> String {
    let ext = split_extension(last_component(name)).1.unwrap_or_default();
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext.to_ascii_lowercase()
    } else {
        FALLBACK_EXT.to_string()
    }
}
