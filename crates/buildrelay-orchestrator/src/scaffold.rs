//! Files every published site gets, and round-2 merging.

use buildrelay_utils::types::{BuildTask, FileSet, Round};

const README: &str = "README.md";
const LICENSE: &str = "LICENSE";
const INDEX: &str = "index.html";

/// Complete the generated file set before publishing.
///
/// Round 1 gains a default `index.html`, `README.md`, and MIT `LICENSE`
/// when the provider left them out. Round 2 carries forward every existing
/// file the provider omitted, except the README, which instead gets a
/// "Round N Updates" section unless it already has one.
pub fn finalize_files(task: &BuildTask, generated: FileSet, existing: &FileSet) -> FileSet {
    let mut files = generated;
    match task.round {
        Round::Initial => {
            if !files.contains_key(INDEX) {
                files.insert(INDEX.to_string(), default_index(task).into_bytes());
            }
            if !files.contains_key(README) {
                let readme = default_readme(task, &files);
                files.insert(README.to_string(), readme.into_bytes());
            }
            if !files.contains_key(LICENSE) {
                files.insert(LICENSE.to_string(), MIT_LICENSE.as_bytes().to_vec());
            }
        }
        Round::Revision => {
            for (path, content) in existing {
                if path != README && !files.contains_key(path) {
                    files.insert(path.clone(), content.clone());
                }
            }
            let base = files
                .get(README)
                .or_else(|| existing.get(README))
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            if let Some(readme) = base {
                let readme = if has_round_section(task, &readme) {
                    readme
                } else {
                    append_round_section(task, &readme)
                };
                files.insert(README.to_string(), readme.into_bytes());
            }
        }
    }
    files
}

fn default_index(task: &BuildTask) -> String {
    let title = escape_html(&task.task_id);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css" rel="stylesheet">
</head>
<body>
    <main class="container py-4">
        <h1>{title}</h1>
        <div id="app"></div>
    </main>
    <script src="script.js"></script>
</body>
</html>
"#
    )
}

fn default_readme(task: &BuildTask, files: &FileSet) -> String {
    let mut out = format!("# {}\n\n## Summary\n\n{}\n", task.task_id, task.brief.trim());
    if !task.checks.is_empty() {
        out.push_str("\n## Checks\n\n");
        for check in &task.checks {
            out.push_str(&format!("- {check}\n"));
        }
    }
    out.push_str("\n## Setup\n\nOpen `index.html` in a browser, or visit the GitHub Pages site.\n");
    out.push_str("\n## Files\n\n");
    for path in files.keys() {
        out.push_str(&format!("- `{path}`\n"));
    }
    out.push_str(&format!(
        "\n## Task Details\n\n- Task ID: {}\n- Round: {}\n",
        task.task_id, task.round
    ));
    out.push_str("\n## License\n\nMIT. See the LICENSE file.\n");
    out
}

/// Insert the round section before `## License` when present, else append.
fn round_heading(task: &BuildTask) -> String {
    format!("## Round {} Updates", task.round)
}

fn has_round_section(task: &BuildTask, readme: &str) -> bool {
    let heading = round_heading(task);
    readme.lines().any(|line| line.trim_end() == heading)
}

fn append_round_section(task: &BuildTask, readme: &str) -> String {
    let mut section = format!(
        "{}\n\n### New Requirements\n\n{}\n",
        round_heading(task),
        task.brief.trim()
    );
    if !task.checks.is_empty() {
        section.push_str("\n### New Checks\n\n");
        for check in &task.checks {
            section.push_str(&format!("- {check}\n"));
        }
    }

    match readme.find("## License") {
        Some(at) => {
            let (head, tail) = readme.split_at(at);
            format!("{}\n\n{section}\n{tail}", head.trim_end())
        }
        None => format!("{}\n\n{section}", readme.trim_end()),
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const MIT_LICENSE: &str = "MIT License

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the \"Software\"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
";
