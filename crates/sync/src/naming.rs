use nino_protocol::DEFAULT_SESSION_TITLE;

const MAX_TITLE_CHARS: usize = 50;

/// Derive a session title from the first prompt a user sends.
pub fn title_from_first_prompt(prompt: &str) -> Option<String> {
    let normalized = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    if normalized.chars().count() <= MAX_TITLE_CHARS {
        return Some(normalized);
    }
    let cut: String = normalized.chars().take(MAX_TITLE_CHARS).collect();
    Some(format!("{}…", cut.trim_end()))
}

/// True while a session still carries the placeholder title.
pub fn is_default_title(title: &str) -> bool {
    let trimmed = title.trim();
    trimmed.is_empty() || trimmed == DEFAULT_SESSION_TITLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_prompts() {
        assert!(title_from_first_prompt("   \n\t").is_none());
        assert_eq!(
            title_from_first_prompt("Brighten   the lobby\nphoto").as_deref(),
            Some("Brighten the lobby photo")
        );
    }

    #[test]
    fn truncates_long_prompts() {
        let prompt =
            "Create a warm sunset version of our infinity pool photo for the summer campaign";
        let title = title_from_first_prompt(prompt).expect("expected title");
        assert_eq!(title, "Create a warm sunset version of our infinity pool…");
    }

    #[test]
    fn recognizes_placeholder_titles() {
        assert!(is_default_title("New Chat"));
        assert!(is_default_title(" "));
        assert!(!is_default_title("Spa launch"));
    }
}
