use crate::models::RangeWindow;

/// Parse an inbound `Range: bytes=<start>-[end]` header into a resolved
/// window. When the end is omitted it defaults to `start + chunk_size - 1`;
/// `chunk_size` is only that default-end hint, windows are deliberately not
/// snapped to chunk boundaries.
///
/// Returns `None` for anything unparsable, including suffix ranges
/// (`bytes=-500`), which the streaming route does not support.
pub fn resolve_window(header: &str, chunk_size: u64) -> Option<RangeWindow> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    let start: u64 = start_str.trim().parse().ok()?;
    let end: u64 = if end_str.trim().is_empty() {
        start.checked_add(chunk_size.max(1) - 1)?
    } else {
        end_str.trim().parse().ok()?
    };

    if end < start {
        return None;
    }

    Some(RangeWindow::new(start, end))
}

/// Whether an upstream `content-range: bytes X-Y/Z` header marks the final
/// chunk of the resource, i.e. the window reaches the last byte. Unparsable
/// headers are treated as not final.
pub fn is_final_chunk(content_range: &str) -> bool {
    parse_content_range(content_range)
        .map(|(_, end, total)| end + 1 >= total)
        .unwrap_or(false)
}

fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total_str) = rest.split_once('/')?;
    let (start_str, end_str) = range.split_once('-')?;
    Some((
        start_str.trim().parse().ok()?,
        end_str.trim().parse().ok()?,
        total_str.trim().parse().ok()?,
    ))
}
