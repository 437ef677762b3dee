//! Title formatting for entries.
//!
//! `%X` sequences are replaced by entry fields; `%IF(test,then,else)` picks
//! `then` when `test` expands to a non-empty string. Inside `%IF` arguments a
//! literal comma or closing parenthesis is written `%,` or `%)`.

use crate::error::{MirrorError, Result};
use crate::model::{Entry, extension_upper};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Deepest `%IF` nesting accepted.
const MAX_DEPTH: usize = 32;

pub fn format_entry_title(entry: &Entry, format: &str) -> Result<String> {
    let chars: Vec<char> = format.chars().collect();
    let (out, _) = expand(entry, &chars, 0, 0)?;
    Ok(out)
}

/// Expands from `pos` up to the end, or up to an unescaped `,`/`)` when
/// inside `%IF` arguments (`depth > 0`). Returns the text and the stop
/// position.
fn expand(entry: &Entry, chars: &[char], mut pos: usize, depth: usize) -> Result<(String, usize)> {
    if depth > MAX_DEPTH {
        return Err(MirrorError::invalid_format("too deeply nested"));
    }
    let in_args = depth > 0;
    let mut out = String::new();

    while pos < chars.len() {
        let c = chars[pos];
        if in_args && (c == ',' || c == ')') {
            return Ok((out, pos));
        }
        if c != '%' {
            out.push(c);
            pos += 1;
            continue;
        }

        let Some(&code) = chars.get(pos + 1) else {
            return Err(MirrorError::invalid_format("malformed"));
        };
        pos += 2;
        match code {
            '%' | ',' | ')' => out.push(code),
            'I' => {
                if chars.get(pos) != Some(&'F') || chars.get(pos + 1) != Some(&'(') {
                    return Err(MirrorError::invalid_format("malformed"));
                }
                let (test, next) = argument(entry, chars, pos + 2, ',', depth + 1)?;
                let (then, next) = argument(entry, chars, next, ',', depth + 1)?;
                let (otherwise, next) = argument(entry, chars, next, ')', depth + 1)?;
                out.push_str(if test.is_empty() { &otherwise } else { &then });
                pos = next;
            }
            other => out.push_str(&field(entry, other)?),
        }
    }

    if in_args {
        return Err(MirrorError::invalid_format("malformed"));
    }
    Ok((out, pos))
}

/// One `%IF` argument, which must end with `terminator`.
fn argument(entry: &Entry, chars: &[char], pos: usize, terminator: char, depth: usize) -> Result<(String, usize)> {
    let (text, end) = expand(entry, chars, pos, depth)?;
    if chars.get(end) != Some(&terminator) {
        return Err(MirrorError::invalid_format("malformed"));
    }
    Ok((text, end + 1))
}

fn field(entry: &Entry, code: char) -> Result<String> {
    let f = &entry.fields;
    let text = match code {
        'A' => f.album.clone(),
        'a' => f.artist.clone(),
        'B' => format!("{} kbps", f.bitrate),
        'C' => match f.channel_count {
            0 => String::new(),
            1 => "Mono".to_string(),
            2 => "Stereo".to_string(),
            n => format!("{} channels", n),
        },
        'E' => extension_upper(&f.filename),
        'G' => f.genre.clone(),
        'H' => format!("{} kHz", f.sample_rate / 1000),
        'L' => duration(f.duration_ms),
        'M' => f.rating.to_string(),
        'S' => file_size(f.file_size),
        'T' => f.title.clone(),
        'Y' => f.date.clone(),
        _ => return Err(MirrorError::invalid_format("unknown format argument")),
    };
    Ok(text)
}

fn duration(ms: u64) -> String {
    let total = ms / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn significant(value: f64) -> String {
    if value >= 100.0 {
        format!("{:.0}", value)
    } else if value >= 10.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn file_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes >= MIB {
        format!("{} Mb", significant(bytes / MIB))
    } else {
        format!("{} kb", significant(bytes / KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::model::{EntryFields, EntryId, PlaylistId};

    fn sample() -> Entry {
        Entry {
            playlist_id: PlaylistId(1),
            entry_id: EntryId(0),
            order_index: 0,
            fields: EntryFields {
                album: "Blue".into(),
                artist: "Joni".into(),
                date: "1971".into(),
                filename: "/music/joni/river.flac".into(),
                genre: "Folk".into(),
                title: "River".into(),
                bitrate: 900,
                channel_count: 2,
                duration_ms: 243_000,
                file_size: 7_200_000,
                rating: 5,
                sample_rate: 44_100,
            },
            fingerprint: Fingerprint(0),
        }
    }

    #[test]
    fn test_plain_fields() {
        let entry = sample();
        assert_eq!(format_entry_title(&entry, "%a - %T").unwrap(), "Joni - River");
        assert_eq!(format_entry_title(&entry, "%A (%Y) %G").unwrap(), "Blue (1971) Folk");
        assert_eq!(format_entry_title(&entry, "%E %B %H %C").unwrap(), "FLAC 900 kbps 44 kHz Stereo");
        assert_eq!(format_entry_title(&entry, "%L %S %M").unwrap(), "04:03 6.87 Mb 5");
    }

    #[test]
    fn test_escapes() {
        let entry = sample();
        assert_eq!(format_entry_title(&entry, "100%% %T").unwrap(), "100% River");
        assert_eq!(format_entry_title(&entry, "%IF(%T,a%,b,c)").unwrap(), "a,b");
    }

    #[test]
    fn test_conditional() {
        let mut entry = sample();
        let format = "%IF(%a,%a - %T,%T)";
        assert_eq!(format_entry_title(&entry, format).unwrap(), "Joni - River");
        entry.fields.artist.clear();
        assert_eq!(format_entry_title(&entry, format).unwrap(), "River");

        let nested = "%IF(%a,x,%IF(%A,[%A],none))";
        assert_eq!(format_entry_title(&entry, nested).unwrap(), "[Blue]");
    }

    #[test]
    fn test_small_values() {
        let mut entry = sample();
        entry.fields.file_size = 512_000;
        entry.fields.duration_ms = 3_723_000;
        entry.fields.channel_count = 6;
        assert_eq!(format_entry_title(&entry, "%S|%L|%C").unwrap(), "500 kb|01:02:03|6 channels");
        entry.fields.channel_count = 0;
        assert_eq!(format_entry_title(&entry, "[%C]").unwrap(), "[]");
    }

    #[test]
    fn test_invalid_formats() {
        let entry = sample();
        for format in ["%F", "%Q", "abc%", "%IF(%T,a", "%IX(", "%IF(%T,a)"] {
            assert!(
                matches!(format_entry_title(&entry, format), Err(MirrorError::InvalidFormat(_))),
                "{}",
                format
            );
        }
    }

    fn nested(levels: usize) -> String {
        format!("{}x{}", "%IF(".repeat(levels), ",a,b)".repeat(levels))
    }

    #[test]
    fn test_nesting_limit() {
        let entry = sample();
        assert_eq!(format_entry_title(&entry, &nested(MAX_DEPTH)).unwrap(), "a");

        let err = format_entry_title(&entry, &nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("too deeply nested"));

        // fails fast instead of recursing through the whole input
        let hostile = "%IF(".repeat(200_000);
        assert!(matches!(
            format_entry_title(&entry, &hostile),
            Err(MirrorError::InvalidFormat(_))
        ));
    }
}
