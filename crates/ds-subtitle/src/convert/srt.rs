use super::parse_clock;
use crate::ass::Cue;
use crate::html::to_ass_text;

/// SubRip: blank-line separated blocks of `index`, `start --> end`, text.
pub(super) fn parse(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    for block in content.split("\n\n") {
        let mut lines = block.lines().skip_while(|l| l.trim().is_empty());
        let Some(first) = lines.next() else {
            continue;
        };
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) if line.contains("-->") => line,
                _ => continue,
            }
        };
        let Some((start, end)) = parse_timing(timing) else {
            continue;
        };
        let text: Vec<&str> = lines.collect();
        let text = to_ass_text(&text.join("\n"));
        if text.is_empty() {
            continue;
        }
        cues.push(Cue {
            start_ms: start,
            end_ms: end.max(start),
            text,
        });
    }
    cues
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, rest) = line.split_once("-->")?;
    // Coordinates (`X1:… Y1:…`) may follow the end time.
    let end = rest.split_whitespace().next()?;
    Some((parse_clock(start)?, parse_clock(end)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cues_with_markup() {
        let srt = "1\n00:00:01,000 --> 00:00:02,500\n<i>Hi</i>\nthere\n\n2\n00:00:03,000 --> 00:00:04,000 X1:10 X2:20\nBye\n";
        let cues = parse(srt);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].end_ms, 2500);
        assert_eq!(cues[0].text, "{\\i1}Hi{\\i0}\\Nthere");
        assert_eq!(cues[1].text, "Bye");
    }

    #[test]
    fn tolerates_missing_index_and_garbage() {
        let srt = "00:00:01,000 --> 00:00:02,000\nA\n\nnot a cue\n\n3\n00:00:05,000 --> 00:00:06,000\nB";
        let cues = parse(srt);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].start_ms, 5000);
    }
}
