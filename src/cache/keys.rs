//! Cache key definitions.

use uuid::Uuid;

/// Key of the published-page entry for one tenant and slug.
///
/// The site id has a fixed textual width, so distinct `(site_id, slug)` pairs never collide.
pub fn published_page_key(site_id: Uuid, slug: &str) -> String {
    format!("published_pages_{site_id}_{slug}")
}
