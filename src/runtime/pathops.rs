//! Pure string path manipulation backing the script-side `os.path`.
//!
//! Nothing here touches the filesystem. Semantics are POSIX: `/` is the only
//! separator.

pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.as_ref();
        if part.starts_with('/') {
            out = part.to_string();
        } else if out.is_empty() || out.ends_with('/') {
            out.push_str(part);
        } else {
            out.push('/');
            out.push_str(part);
        }
    }
    out
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn dirname(path: &str) -> String {
    let Some(idx) = path.rfind('/') else {
        return String::new();
    };
    let head = &path[..=idx];
    let trimmed = head.trim_end_matches('/');
    if trimmed.is_empty() {
        head.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Splits off the extension of the last component. Leading dots of the
/// base name do not start an extension.
pub fn splitext(path: &str) -> (String, String) {
    let base = basename(path);
    let base_start = path.len() - base.len();
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base[leading_dots..].rfind('.') {
        Some(dot) => {
            let split = base_start + leading_dots + dot;
            (path[..split].to_string(), path[split..].to_string())
        }
        None => (path.to_string(), String::new()),
    }
}

pub fn normpath(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub fn isabs(path: &str) -> bool {
    path.starts_with('/')
}
