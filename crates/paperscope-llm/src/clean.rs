//! Markdown fence stripping for model output.

const FENCE: &str = "```";

/// True when the line is a code-fence delimiter, with or without a language tag.
pub fn is_fence_line(line: &str) -> bool {
    line.trim().starts_with(FENCE)
}

/// Drop every fence line and rejoin the rest with `\n`.
///
/// Surviving lines keep their order, content and blank lines, so text with
/// no fences comes back unchanged and `clean(clean(x)) == clean(x)`.
pub fn clean(text: &str) -> String {
    text.split('\n')
        .filter(|line| !is_fence_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}
