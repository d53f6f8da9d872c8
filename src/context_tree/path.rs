//! Path normalization (spec.md §3): `/`-separated sequences of layer names.

/// Normalizes a path string: lowercases, replaces invalid characters with
/// `_` per segment, collapses repeated `/`, strips a trailing slash (except
/// for the root), and maps the empty string to the root.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| normalize_segment(segment))
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn normalize_segment(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let allowed = ch.is_alphanumeric() || matches!(ch, '.' | '+' | '-' | '_' | '@');
        out.push(if allowed { ch } else { '_' });
    }
    out
}

/// Splits an already- or not-yet-normalized path into its ordered, non-root
/// segments (i.e. the layer names along it).
pub fn path_segments(path: &str) -> Vec<String> {
    let normalized = normalize_path(path);
    if normalized == "/" {
        Vec::new()
    } else {
        normalized.trim_start_matches('/').split('/').map(str::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        for input in ["", "/", "/work/projectA", "Work//Reports/", "a/b/!!/c"] {
            let once = normalize_path(input);
            let twice = normalize_path(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn empty_and_root_normalize_to_root() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn lowercases_and_strips_trailing_slash() {
        assert_eq!(normalize_path("/Work/Reports/"), "/work/reports");
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(normalize_path("//work///reports//"), "/work/reports");
    }

    #[test]
    fn replaces_invalid_characters() {
        assert_eq!(normalize_path("/work/rep!orts"), "/work/rep_orts");
    }

    #[test]
    fn path_segments_excludes_root() {
        assert_eq!(path_segments("/work/projectA"), vec!["work", "projecta"]);
        assert!(path_segments("/").is_empty());
    }
}
