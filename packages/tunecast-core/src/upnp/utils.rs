//! Text helpers shared by SSDP, SOAP and description parsing.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::protocol_constants::NOT_IMPLEMENTED;

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────
//
// HTTP headers are ASCII, so byte-level comparison is enough and avoids
// allocating lowercase copies of every datagram.

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
pub(crate) fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Checks if `haystack` contains `needle` (ASCII case-insensitive, no allocation).
#[inline]
pub(crate) fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Returns the trimmed value of the first header named `name` in a raw
/// HTTP-style message. Header names match case-insensitively.
pub fn header_value<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    message.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// XML
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes the five XML special characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Extracts text content from the first occurrence of an XML element.
///
/// Matches on the local name, so `faultstring` finds `<s:faultstring>` too.
/// Entities in the text are decoded.
pub fn extract_xml_text(xml: &str, element_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target => {
                if let Ok(text) = reader.read_text(e.name()) {
                    return Some(html_escape::decode_html_entities(text.trim()).into_owned());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Time
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a UPnP time value (`h:mm:ss`, optional `.fff`) into milliseconds.
///
/// Missing leading components are treated as zero (`"5:07"` is five minutes
/// seven seconds). `NOT_IMPLEMENTED`, empty or malformed values parse to 0.
pub fn parse_time_to_ms(value: &str) -> u64 {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(NOT_IMPLEMENTED) {
        return 0;
    }

    let (clock, fraction) = match value.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (value, None),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return 0;
    }

    let mut padded = [0u64; 3];
    let offset = 3 - parts.len();
    for (i, part) in parts.iter().enumerate() {
        match part.trim().parse::<u64>() {
            Ok(n) => padded[offset + i] = n,
            Err(_) => return 0,
        }
    }
    let [hours, minutes, seconds] = padded;

    let millis = fraction
        .map(|f| {
            let digits: String = f.chars().take_while(char::is_ascii_digit).take(3).collect();
            if digits.is_empty() {
                return 0;
            }
            let scale = 10u64.pow(3 - digits.len() as u32);
            digits.parse::<u64>().unwrap_or(0) * scale
        })
        .unwrap_or(0);

    (hours * 3600 + minutes * 60 + seconds) * 1000 + millis
}
