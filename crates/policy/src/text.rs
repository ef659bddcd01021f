//! Plain-text helpers shared by policy rules and the freeform normalizer.

use regex_lite::Regex;
use std::sync::LazyLock;

static HEADINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("valid heading regex"));
static BOLD_STARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid bold regex"));
static BOLD_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").expect("valid bold regex"));
static ITALIC_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s][^*\n]*?)\*").expect("valid italic regex"));
static ITALIC_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(])_([^_\s][^_\n]*?)_([\s.,;:!?)]|$)").expect("valid italic regex")
});
static BULLET_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)\*[ \t]+").expect("valid bullet regex"));

fn replace_all(re: &Regex, text: &str, with: &str) -> String {
    re.replace_all(text, with).into_owned()
}

/// Remove markdown emphasis, headings and inline code markers.
///
/// Bullets written with `*` become `-`. Underscores inside words
/// (`snake_case`, URLs) are left alone.
pub fn strip_markdown(text: &str) -> String {
    let out = replace_all(&BULLET_STARS, text, "${1}- ");
    let out = replace_all(&HEADINGS, &out, "");
    let out = replace_all(&BOLD_STARS, &out, "${1}");
    let out = replace_all(&BOLD_UNDERSCORES, &out, "${1}");
    let out = replace_all(&ITALIC_STARS, &out, "${1}");
    let out = replace_all(&ITALIC_UNDERSCORES, &out, "${1}${2}${3}");
    out.replace('`', "").replace("**", "").trim().to_string()
}

/// Whether the text contains markdown that [`strip_markdown`] would remove.
pub fn has_markdown(text: &str) -> bool {
    strip_markdown(text) != text.trim()
}

/// Case-insensitive substring test.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
