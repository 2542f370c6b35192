// src/dispatch/grammar.rs
//
// Keyword-plus-integers command matching shared by the MIDI and Graphics
// decoders. A command may appear anywhere in the message, so
// "MIDI NoteOn 60 127 1" matches `NoteOn` with three arguments.

/// Find `keyword` followed by exactly `N` whitespace-separated integers.
/// Every occurrence of the keyword is tried in order; the first one whose
/// arguments parse wins.
pub(crate) fn match_command<const N: usize>(
    text: &str,
    keyword: &str,
    allow_sign: bool,
) -> Option<[i64; N]> {
    text.match_indices(keyword)
        .find_map(|(at, _)| parse_args::<N>(&text[at + keyword.len()..], allow_sign))
}

fn parse_args<const N: usize>(mut rest: &str, allow_sign: bool) -> Option<[i64; N]> {
    let mut out = [0i64; N];
    for slot in out.iter_mut() {
        let trimmed = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        if trimmed.len() == rest.len() {
            return None;
        }
        let (value, tail) = take_int(trimmed, allow_sign)?;
        *slot = value;
        rest = tail;
    }
    Some(out)
}

fn take_int(s: &str, allow_sign: bool) -> Option<(i64, &str)> {
    let sign_len = usize::from(allow_sign && s.starts_with('-'));
    let digits = s[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    s[..end].parse().ok().map(|v| (v, &s[end..]))
}
