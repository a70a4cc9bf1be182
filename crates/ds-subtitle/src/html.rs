//! HTML-flavoured subtitle text (SRT, VTT, `S_TEXT/UTF8`) to ASS markup.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9.]*)([^>]*)>").expect("Invalid tag regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("Invalid attribute regex")
});
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("Invalid entity regex")
});

/// Convert one subtitle's HTML-ish text into ASS text.
pub fn to_ass_text(input: &str) -> String {
    let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = normalized.trim_matches('\n');

    let mut fonts: Vec<Vec<&'static str>> = Vec::new();
    let tagged = TAG_RE.replace_all(trimmed, |caps: &Captures| {
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let attrs = &caps[3];
        match (name.as_str(), closing) {
            ("br", _) => "\\N".to_string(),
            ("b" | "strong", false) => "{\\b1}".to_string(),
            ("b" | "strong", true) => "{\\b0}".to_string(),
            ("i" | "em", false) => "{\\i1}".to_string(),
            ("i" | "em", true) => "{\\i0}".to_string(),
            ("u", false) => "{\\u1}".to_string(),
            ("u", true) => "{\\u0}".to_string(),
            ("s" | "strike" | "del", false) => "{\\s1}".to_string(),
            ("s" | "strike" | "del", true) => "{\\s0}".to_string(),
            ("center", false) => "{\\an2}".to_string(),
            ("font", false) => {
                let (tags, resets) = font_tags(attrs);
                fonts.push(resets);
                tags
            }
            ("font", true) => match fonts.pop() {
                Some(resets) if !resets.is_empty() => format!("{{{}}}", resets.concat()),
                _ => String::new(),
            },
            // VTT voice/class spans, ruby, and anything unknown are dropped.
            _ => String::new(),
        }
    });

    let text = decode_entities(&tagged);
    text.replace('\n', "\\N")
}

/// Replace HTML entities with their characters.
pub fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "lrm" => '\u{200e}',
        "rlm" => '\u{200f}',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "eacute" => 'é',
        "egrave" => 'è',
        "agrave" => 'à',
        "ccedil" => 'ç',
        "uuml" => 'ü',
        "ouml" => 'ö',
        "auml" => 'ä',
        "szlig" => 'ß',
        _ => return None,
    })
}

/// ASS override block for a `<font>` tag, plus the resets for its close tag.
fn font_tags(attrs: &str) -> (String, Vec<&'static str>) {
    let mut tags = String::new();
    let mut resets = Vec::new();
    for caps in ATTR_RE.captures_iter(attrs) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str())
            .trim();
        match key.as_str() {
            "color" => {
                if let Some(bgr) = html_color_to_bgr(value) {
                    tags.push_str(&format!("\\c&H{bgr}&"));
                    resets.push("\\c");
                }
            }
            "size" => {
                if let Ok(size) = value.parse::<f32>() {
                    tags.push_str(&format!("\\fs{size}"));
                    resets.push("\\fs");
                }
            }
            "face" if !value.is_empty() => {
                tags.push_str(&format!("\\fn{value}"));
                resets.push("\\fn");
            }
            _ => {}
        }
    }
    if tags.is_empty() {
        (String::new(), resets)
    } else {
        (format!("{{{tags}}}"), resets)
    }
}

/// `#RRGGBB`, `RRGGBB`, `#RGB` or a basic colour name to ASS `BBGGRR`.
fn html_color_to_bgr(value: &str) -> Option<String> {
    let named = match value.to_ascii_lowercase().as_str() {
        "white" => Some("FFFFFF"),
        "black" => Some("000000"),
        "red" => Some("FF0000"),
        "lime" => Some("00FF00"),
        "green" => Some("008000"),
        "blue" => Some("0000FF"),
        "yellow" => Some("FFFF00"),
        "cyan" | "aqua" => Some("00FFFF"),
        "magenta" | "fuchsia" => Some("FF00FF"),
        "gray" | "grey" => Some("808080"),
        "silver" => Some("C0C0C0"),
        "orange" => Some("FFA500"),
        _ => None,
    };
    let hex = match named {
        Some(hex) => hex.to_string(),
        None => {
            let raw = value.trim_start_matches('#');
            match raw.len() {
                6 => raw.to_string(),
                3 => raw.chars().flat_map(|c| [c, c]).collect(),
                _ => return None,
            }
        }
    };
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let hex = hex.to_ascii_uppercase();
    Some(format!("{}{}{}", &hex[4..6], &hex[2..4], &hex[0..2]))
}
