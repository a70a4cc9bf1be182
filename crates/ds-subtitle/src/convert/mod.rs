//! Uploaded subtitle files to ASS scripts.

mod srt;
mod stl;
mod ttml;
mod txt;
mod vtt;

use crate::ass::{AssScript, Cue};
use crate::error::SubtitleError;

/// Source format of an uploaded subtitle file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Ass,
    Ssa,
    Srt,
    Vtt,
    Ttml,
    Stl,
    Txt,
}

impl SubtitleFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "ass" => SubtitleFormat::Ass,
            "ssa" => SubtitleFormat::Ssa,
            "srt" => SubtitleFormat::Srt,
            "vtt" | "webvtt" => SubtitleFormat::Vtt,
            "ttml" | "dfxp" | "xml" => SubtitleFormat::Ttml,
            "stl" => SubtitleFormat::Stl,
            "txt" | "sub" => SubtitleFormat::Txt,
            _ => return None,
        })
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// True when the content is already ASS/SSA and is kept verbatim.
    pub fn is_ass(self) -> bool {
        matches!(self, SubtitleFormat::Ass | SubtitleFormat::Ssa)
    }
}

/// Language tag from the second-to-last dotted component (`x.eng.srt` → `eng`).
pub fn language_from_filename(filename: &str) -> Option<String> {
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.len() < 3 {
        return None;
    }
    let candidate = parts[parts.len() - 2];
    let valid = (2..=8).contains(&candidate.len())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '-' || c == '_');
    valid.then(|| candidate.to_ascii_lowercase())
}

/// Display name: the filename up to its language and extension components.
pub fn title_from_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    match language_from_filename(base) {
        Some(_) => stem.rsplit_once('.').map_or(stem, |(s, _)| s).to_string(),
        None => stem.to_string(),
    }
}

/// Convert an uploaded file's content to an ASS script.
///
/// ASS and SSA content is returned unchanged (minus a UTF-8 BOM).
pub fn convert_to_ass(
    format: SubtitleFormat,
    content: &str,
    title: &str,
) -> Result<String, SubtitleError> {
    let content = content.trim_start_matches('\u{feff}');
    if format.is_ass() {
        if !content.contains("[Script Info]") && !content.contains("[Events]") {
            return Err(SubtitleError::Parse("missing [Script Info] section".into()));
        }
        return Ok(content.to_string());
    }

    let cues = parse_cues(format, content)?;
    if cues.is_empty() {
        return Err(SubtitleError::Parse(format!("no cues found in {format:?} file")));
    }
    Ok(AssScript::new(title, cues).render())
}

/// Parse a non-ASS file into cues with ASS-formatted text.
pub fn parse_cues(format: SubtitleFormat, content: &str) -> Result<Vec<Cue>, SubtitleError> {
    let content = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut cues = match format {
        SubtitleFormat::Srt => srt::parse(&content),
        SubtitleFormat::Vtt => vtt::parse(&content),
        SubtitleFormat::Ttml => ttml::parse(&content)?,
        SubtitleFormat::Stl => stl::parse(&content),
        SubtitleFormat::Txt => txt::parse(&content),
        SubtitleFormat::Ass | SubtitleFormat::Ssa => {
            return Err(SubtitleError::UnsupportedFormat(format!("{format:?} has no cues")))
        }
    };
    cues.sort_by_key(|c| c.start_ms);
    Ok(cues)
}

/// `[HH:]MM:SS[,.]mmm` to milliseconds.
pub(crate) fn parse_clock(value: &str) -> Option<u64> {
    let value = value.trim();
    let (clock, frac) = match value.rfind([',', '.']) {
        Some(i) => (&value[..i], &value[i + 1..]),
        None => (value, ""),
    };
    let mut parts = clock.split(':').rev();
    let seconds: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next().map_or(Some(0), |m| m.trim().parse().ok())?;
    let hours: u64 = parts.next().map_or(Some(0), |h| h.trim().parse().ok())?;
    if parts.next().is_some() {
        return None;
    }
    let millis = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(3).collect();
        let scale = 10u64.pow(3 - digits.len() as u32);
        digits.parse::<u64>().ok()? * scale
    };
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_by_extension() {
        assert_eq!(SubtitleFormat::from_filename("a.eng.SRT"), Some(SubtitleFormat::Srt));
        assert_eq!(SubtitleFormat::from_filename("a.vtt"), Some(SubtitleFormat::Vtt));
        assert_eq!(SubtitleFormat::from_filename("a.ttml"), Some(SubtitleFormat::Ttml));
        assert_eq!(SubtitleFormat::from_filename("a.stl"), Some(SubtitleFormat::Stl));
        assert_eq!(SubtitleFormat::from_filename("a.txt"), Some(SubtitleFormat::Txt));
        assert_eq!(SubtitleFormat::from_filename("a.ssa"), Some(SubtitleFormat::Ssa));
        assert_eq!(SubtitleFormat::from_filename("a.pdf"), None);
        assert_eq!(SubtitleFormat::from_filename("noext"), None);
    }

    #[test]
    fn language_and_title() {
        assert_eq!(language_from_filename("title.eng.srt").as_deref(), Some("eng"));
        assert_eq!(language_from_filename("Show.S01E01.pt-BR.srt").as_deref(), Some("pt-br"));
        assert_eq!(language_from_filename("title.srt"), None);
        assert_eq!(title_from_filename("hello.eng.srt"), "hello");
        assert_eq!(title_from_filename("hello.srt"), "hello");
    }

    #[test]
    fn clock_parsing() {
        assert_eq!(parse_clock("00:00:03,000"), Some(3000));
        assert_eq!(parse_clock("01:02:03.456"), Some(3_723_456));
        assert_eq!(parse_clock("02:03.5"), Some(123_500));
        assert_eq!(parse_clock("x:00"), None);
    }

    #[test]
    fn srt_upload_becomes_ass_script() {
        let srt = "1\n00:00:00,000 --> 00:00:03,000\nHello, world!\n";
        let script = convert_to_ass(SubtitleFormat::Srt, srt, "hello").unwrap();
        assert!(script.starts_with("[Script Info]"));
        assert!(script.contains("Dialogue: 0,00:00:00.00,00:00:03.00,Default,,0,0,0,,Hello, world!"));
    }

    #[test]
    fn ass_upload_is_kept() {
        let ass = "\u{feff}[Script Info]\nTitle: x\n\n[Events]\n";
        assert_eq!(
            convert_to_ass(SubtitleFormat::Ass, ass, "x").unwrap(),
            "[Script Info]\nTitle: x\n\n[Events]\n"
        );
        assert!(convert_to_ass(SubtitleFormat::Ass, "garbage", "x").is_err());
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(
            convert_to_ass(SubtitleFormat::Srt, "\n\n", "x"),
            Err(SubtitleError::Parse(_))
        ));
    }
}
