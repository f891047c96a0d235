//! Path component sanitization for artifact names.

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Make one path component safe to create on Linux.
///
/// Separators, NUL, control characters and whitespace become `_`, runs of
/// `_` collapse, leading/trailing dots, spaces and underscores are trimmed
/// and the result is cut to 255 bytes. Returns `"unnamed"` if nothing is left.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    if take == 0 {
        return "unnamed".to_string();
    }
    trimmed[..take].to_string()
}
