//! Minimal path globbing for ownership and forbidden-file patterns.
//!
//! Supported syntax: `**/` (zero or more directories), `**` (anything),
//! `*` (anything but `/`), `?` (one char but `/`). Everything else is literal.

use regex::Regex;

/// Compile a glob into an anchored regex.
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out)
}

/// True if `path` matches `pattern`. Invalid patterns match nothing.
pub fn matches(pattern: &str, path: &str) -> bool {
    compile(pattern).is_ok_and(|re| re.is_match(normalize(path)))
}

/// Strip a leading `./` so declared and discovered paths compare equal.
pub fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}
