/// Repository name for a task: `{task}-{email local part}`.
///
/// Dots and underscores become hyphens, anything GitHub rejects in a
/// repository name is dropped, and runs of hyphens collapse. A task with no
/// email is named after the task alone.
#[must_use]
pub fn repository_name(task_id: &str, email: Option<&str>) -> String {
    let local = email
        .and_then(|e| e.split('@').next())
        .filter(|l| !l.trim().is_empty());
    let raw = match local {
        Some(local) => format!("{task_id}-{local}"),
        None => task_id.to_string(),
    };

    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = match c {
            '.' | '_' | ' ' => '-',
            c if c.is_ascii_alphanumeric() || c == '-' => c,
            _ => continue,
        };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let capped: String = name.trim_matches('-').chars().take(100).collect();
    let trimmed = capped.trim_end_matches('-');
    if trimmed.is_empty() {
        "buildrelay-app".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_task_and_email_local_part() {
        assert_eq!(
            repository_name("captcha-solver", Some("jane.doe_1@example.com")),
            "captcha-solver-jane-doe-1"
        );
    }

    #[test]
    fn missing_email_uses_task_only() {
        assert_eq!(repository_name("t1", None), "t1");
        assert_eq!(repository_name("t1", Some("@x.com")), "t1");
    }

    #[test]
    fn unusable_characters_are_dropped() {
        assert_eq!(repository_name("a/b..c", Some("x+y@z")), "ab-c-xy");
        assert_eq!(repository_name("///", None), "buildrelay-app");
    }
}
