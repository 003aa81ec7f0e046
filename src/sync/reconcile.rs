//! Automatic resolution of conflicts in version files.
//!
//! Version files change on both sides of almost every flow, so a textual
//! conflict in one of them is resolved by merging its content instead of
//! asking a human. Any other conflicted file is left alone.

use super::patch::Conflict;
use crate::error::Result;
use crate::flow::Asset;
use crate::version_files::properties::{merge_properties, PropertyBag};
use crate::version_files::version_details::{merge_dependencies, VersionDetails};
use crate::version_files::{update_props_text, PropsFile, VERSION_DETAILS_XML};
use log::info;

fn text(bytes: Option<&[u8]>) -> String {
    bytes
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

fn props(file: &str, content: &str) -> Result<PropertyBag> {
    if content.trim().is_empty() {
        return Ok(PropertyBag::new());
    }
    Ok(PropsFile::parse(file, content)?.properties)
}

/// Merge the three versions of a conflicted version file.
///
/// Returns the merged content, or `None` when the file is not a version
/// file or a side deleted it (those stay conflicts).
pub fn reconcile(conflict: &Conflict, build_assets: &[Asset]) -> Result<Option<Vec<u8>>> {
    if !crate::version_files::is_version_file(&conflict.path) {
        return Ok(None);
    }
    let (Some(ours), Some(theirs)) = (conflict.ours.as_deref(), conflict.theirs.as_deref()) else {
        return Ok(None);
    };
    let base = text(conflict.base.as_deref());
    let ours = text(Some(ours));
    let theirs = text(Some(theirs));
    let file = conflict.path.as_str();

    let merged = if file.ends_with(VERSION_DETAILS_XML) {
        let parse = |content: &str| -> Result<VersionDetails> {
            if content.trim().is_empty() {
                Ok(VersionDetails::default())
            } else {
                VersionDetails::parse(file, content)
            }
        };
        merge_dependencies(&parse(&base)?, &parse(&ours)?, &parse(&theirs)?, build_assets)?
            .render()
    } else {
        let current = props(file, &ours)?;
        let merged = merge_properties(&props(file, &base)?, &current, &props(file, &theirs)?)?;
        update_props_text(&ours, &current, &merged)?
    };

    info!("Reconciled conflicting changes in {}", file);
    Ok(Some(merged.into_bytes()))
}
