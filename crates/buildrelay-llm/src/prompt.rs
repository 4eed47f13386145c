//! Prompt construction shared by every adapter.

use std::fmt::Write as _;

use buildrelay_utils::types::Round;

use crate::types::{GenerationRequest, ImagePart, Prompt};

/// Files whose current contents are shown to the model in round 2.
const KEY_FILES: &[&str] = &["index.html", "script.js", "style.css"];

/// Characters of each key file included for round-2 context.
const KEY_FILE_EXCERPT_CHARS: usize = 1_000;

/// Characters of each text attachment inlined into the prompt.
const TEXT_ATTACHMENT_CHARS: usize = 4_000;

const INITIAL_SYSTEM_PROMPT: &str = "You are an expert web developer. Generate a complete, working \
single-page web application that can be deployed to GitHub Pages. Write clean, commented, \
production-ready code with proper error handling. Respond with a single JSON object whose keys \
are file paths and whose values are the full file contents, for example \
{\"index.html\": \"<!DOCTYPE html>...\", \"script.js\": \"...\", \"style.css\": \"...\"}.";

const REVISION_SYSTEM_PROMPT: &str = "You are an expert web developer. Update the existing \
application to meet new requirements while preserving its current functionality. Respond with a \
single JSON object whose keys are file paths and whose values are the full file contents. \
Include every file, modified or not.";

/// Render the vendor-neutral prompt for a generation request.
#[must_use]
pub fn build_prompt(request: &GenerationRequest) -> Prompt {
    let system = match request.round {
        Round::Initial => INITIAL_SYSTEM_PROMPT,
        Round::Revision => REVISION_SYSTEM_PROMPT,
    }
    .to_string();

    let mut user = String::new();
    match request.round {
        Round::Initial => {
            user.push_str("Create a web application with the following requirements:\n\n");
        }
        Round::Revision => {
            user.push_str("Update the existing application with these new requirements:\n\n");
        }
    }
    let _ = writeln!(user, "Brief: {}\n", request.brief.trim());

    if !request.checks.is_empty() {
        user.push_str("The application will be evaluated against these checks:\n");
        for check in &request.checks {
            let _ = writeln!(user, "- {check}");
        }
        user.push('\n');
    }

    let _ = writeln!(user, "Task ID: {}", request.task_id);
    let _ = writeln!(user, "Round: {}", request.round);

    let mut images = Vec::new();
    if !request.attachments.is_empty() {
        user.push_str("\nAttachments provided:\n");
        for attachment in &request.attachments {
            let _ = writeln!(
                user,
                "- {} ({}, {} bytes)",
                attachment.name,
                attachment.media_type,
                attachment.data.len()
            );
        }
        for attachment in &request.attachments {
            if attachment.is_image() {
                images.push(ImagePart {
                    name: attachment.name.clone(),
                    media_type: attachment.media_type.clone(),
                    base64: attachment.to_base64(),
                });
            } else if attachment.is_text() {
                let text = String::from_utf8_lossy(&attachment.data);
                let _ = write!(
                    user,
                    "\n--- attachment {} ---\n{}\n",
                    attachment.name,
                    excerpt(&text, TEXT_ATTACHMENT_CHARS)
                );
            }
        }
    }

    if request.round == Round::Revision && !request.existing_files.is_empty() {
        user.push_str("\nCurrent files in the repository:\n");
        for path in request.existing_files.keys() {
            let _ = writeln!(user, "- {path}");
        }
        for name in KEY_FILES {
            if let Some(content) = request.existing_files.get(*name) {
                let text = String::from_utf8_lossy(content);
                let _ = write!(
                    user,
                    "\n--- {name} (current) ---\n{}\n",
                    excerpt(&text, KEY_FILE_EXCERPT_CHARS)
                );
            }
        }
    }

    user.push_str(match request.round {
        Round::Initial => {
            "\nGenerate a complete application that meets the brief, passes every check, \
handles the attachments, and includes a README.md. Return ONLY the JSON object."
        }
        Round::Revision => {
            "\nUpdate the application so it meets the new brief and checks without breaking \
existing behaviour, and update README.md. Return ONLY the JSON object with ALL files."
        }
    });

    Prompt {
        system,
        user,
        images,
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
