//! Which remote page a pin fetches next.

use crate::model::PageState;

/// Page to request on the next refresh.
///
/// Wraps to page 1 once the last page has been shown, so repeated refreshes
/// cycle through every remote page. `total_pages == 0` (nothing found, or never
/// fetched) always yields page 1.
pub fn next_page(current: PageState, total_pages: u32) -> u32 {
    if total_pages == 0 {
        return 1;
    }
    match current {
        PageState::Unset => 1,
        PageState::Page(n) if n >= total_pages => 1,
        PageState::Page(n) => n + 1,
    }
}
