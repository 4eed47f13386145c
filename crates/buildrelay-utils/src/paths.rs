use camino::Utf8PathBuf;

/// Resolve the buildrelay home directory:
/// 1) env `BUILDRELAY_HOME`
/// 2) default ".buildrelay"
#[must_use]
pub fn buildrelay_home() -> Utf8PathBuf {
    home_from(std::env::var("BUILDRELAY_HOME").ok())
}

fn home_from(env_value: Option<String>) -> Utf8PathBuf {
    match env_value {
        Some(p) if !p.trim().is_empty() => Utf8PathBuf::from(p),
        _ => Utf8PathBuf::from(".buildrelay"),
    }
}

/// Returns `<BUILDRELAY_HOME>/state`
#[must_use]
pub fn default_state_dir() -> Utf8PathBuf {
    buildrelay_home().join("state")
}

/// mkdir -p; treat `AlreadyExists` as success
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Turn an opaque identifier into a single safe path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`. When anything had to be
/// replaced, a short BLAKE3 suffix of the original keeps distinct ids from
/// colliding (`a/b` and `a_b` map to different directories).
#[must_use]
pub fn sanitize_path_component(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let altered = cleaned != raw || cleaned.is_empty() || cleaned.starts_with('.');
    if cleaned.starts_with('.') {
        cleaned.replace_range(0..1, "_");
    }
    if altered {
        let digest = blake3::hash(raw.as_bytes()).to_hex();
        cleaned.push('-');
        cleaned.push_str(&digest[..8]);
    }
    cleaned
}
