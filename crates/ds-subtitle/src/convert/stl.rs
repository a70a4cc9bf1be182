//! Spruce STL: `HH:MM:SS:CC , HH:MM:SS:CC , text`.

use crate::ass::Cue;

pub(super) fn parse(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('$') {
            continue;
        }
        let mut parts = line.splitn(3, ',');
        let (Some(start), Some(end), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Some(start_ms), Some(end_ms)) = (timecode(start), timecode(end)) else {
            continue;
        };
        cues.push(Cue {
            start_ms,
            end_ms: end_ms.max(start_ms),
            text: text_to_ass(text.trim()),
        });
    }
    cues
}

/// `HH:MM:SS:CC`, the last field in hundredths of a second.
fn timecode(value: &str) -> Option<u64> {
    let fields: Vec<u64> = value
        .trim()
        .split(':')
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    let [h, m, s, cs] = fields[..] else {
        return None;
    };
    Some(((h * 60 + m) * 60 + s) * 1000 + cs * 10)
}

/// `|` breaks lines; `^B`, `^I` and `^U` toggle bold, italic and underline.
fn text_to_ass(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let (mut bold, mut italic, mut underline) = (false, false, false);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '|' => out.push_str("\\N"),
            '^' => {
                let toggle = match chars.peek() {
                    Some('B') => Some((&mut bold, 'b')),
                    Some('I') => Some((&mut italic, 'i')),
                    Some('U') => Some((&mut underline, 'u')),
                    _ => None,
                };
                match toggle {
                    Some((flag, tag)) => {
                        *flag = !*flag;
                        out.push_str(&format!("{{\\{tag}{}}}", u8::from(*flag)));
                        chars.next();
                    }
                    None => out.push('^'),
                }
            }
            _ => out.push(c),
        }
    }
    out
}
