//! Recording reference resolution.
//!
//! A `recording_ref` can arrive three ways: an absolute PBX path (CDR rows),
//! a bare filename with an embedded day token (archive listings), or a
//! relative path. Asterisk stores recordings under
//! `<base>/<YYYY>/<MM>/<DD>/<file>`, and the filename embeds the same day as
//! a `YYYYMMDD` run, so a bare name can be expanded without a directory walk.

/// Resolve a recording reference to an absolute remote path.
pub fn resolve_path(recording_ref: &str, base_path: &str) -> String {
    let reference = recording_ref.trim();
    if reference.starts_with('/') {
        return reference.to_string();
    }

    let base = base_path.trim_end_matches('/');
    if !reference.contains('/') {
        if let Some((y, m, d)) = day_token(reference) {
            return format!("{base}/{y:04}/{m:02}/{d:02}/{reference}");
        }
    }
    format!("{base}/{reference}")
}

/// Extract a `YYYYMMDD` day token from a recording filename, e.g.
/// `external-200-+17175551212-20250115-100000-1234.wav` → (2025, 1, 15).
/// Only plausible calendar values qualify, so epoch-second runs and channel
/// ids do not match.
pub fn day_token(name: &str) -> Option<(u32, u32, u32)> {
    for part in name.split(['-', '_', '.']) {
        if part.len() != 8 || !part.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let y: u32 = part[0..4].parse().ok()?;
        let m: u32 = part[4..6].parse().ok()?;
        let d: u32 = part[6..8].parse().ok()?;
        if (1970..=2999).contains(&y) && (1..=12).contains(&m) && (1..=31).contains(&d) {
            return Some((y, m, d));
        }
    }
    None
}

/// The `YYYY/MM/DD` prefix a resolved recording path falls under, relative
/// to the base path. Used by retention to match deleted days to call rows.
pub fn day_prefix_of(path: &str, base_path: &str) -> Option<String> {
    let base = base_path.trim_end_matches('/');
    let rest = path.strip_prefix(base)?.trim_start_matches('/');
    let mut parts = rest.split('/');
    let y = parts.next()?;
    let m = parts.next()?;
    let d = parts.next()?;
    if y.len() == 4
        && m.len() == 2
        && d.len() == 2
        && [y, m, d]
            .iter()
            .all(|s| s.bytes().all(|b| b.is_ascii_digit()))
    {
        Some(format!("{y}/{m}/{d}"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "/var/spool/asterisk/monitor";

    #[test]
    fn absolute_paths_pass_through() {
        assert_eq!(
            resolve_path("/tmp/call.wav", BASE),
            "/tmp/call.wav".to_string()
        );
    }

    #[test]
    fn day_token_filenames_expand() {
        assert_eq!(
            resolve_path("external-200-+17175551212-20250115-100000-abc.wav", BASE),
            format!("{BASE}/2025/01/15/external-200-+17175551212-20250115-100000-abc.wav")
        );
        assert_eq!(
            resolve_path("out-7175551212-201-20241231-235959-xyz.wav", BASE),
            format!("{BASE}/2024/12/31/out-7175551212-201-20241231-235959-xyz.wav")
        );
    }

    #[test]
    fn relative_paths_join_under_base() {
        assert_eq!(
            resolve_path("2025/01/15/call.wav", BASE),
            format!("{BASE}/2025/01/15/call.wav")
        );
        assert_eq!(resolve_path("plain.wav", BASE), format!("{BASE}/plain.wav"));
    }

    #[test]
    fn day_token_rejects_non_dates() {
        // 10-digit epoch seconds and 8-digit non-dates don't qualify.
        assert_eq!(day_token("msg-1736930400.wav"), None);
        assert_eq!(day_token("rec-20259999-call.wav"), None);
        assert_eq!(day_token("rec-00001301-call.wav"), None);
    }

    #[test]
    fn day_prefix_extraction() {
        assert_eq!(
            day_prefix_of(&format!("{BASE}/2025/02/01/a.wav"), BASE),
            Some("2025/02/01".to_string())
        );
        assert_eq!(day_prefix_of(&format!("{BASE}/misc/a.wav"), BASE), None);
        assert_eq!(day_prefix_of("/elsewhere/2025/02/01/a.wav", BASE), None);
    }
}
