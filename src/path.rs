//! Storage path derivation for flat object backends.

/// Derive the object path for a widget: `widgets/<owner>/<widget_id>`.
///
/// The owner is lower-cased with spaces replaced by hyphens. An empty owner
/// yields `widgets//<widget_id>`; callers are responsible for rejecting it.
pub fn widget_path(owner: &str, widget_id: &str) -> String {
    format!("widgets/{}/{widget_id}", owner_segment(owner))
}

/// The owner as it appears in the path.
pub fn owner_segment(owner: &str) -> String {
    owner.to_lowercase().replace(' ', "-")
}

/// Whether `segment` stays a single path component under the prefix.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\'])
}
