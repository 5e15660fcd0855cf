use crc::{Crc, CRC_16_ARC};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Error, Result};

/// Bytes kept verbatim in the escaped key form. Everything else is
/// percent-encoded, including `_`, so index file names always contain
/// exactly two literal underscores.
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'~');

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Percent-encodes a raw key into its canonical on-disk form.
pub fn escape(key: &str) -> String {
    utf8_percent_encode(key, KEY_ESCAPE).to_string()
}

/// Decodes an escaped key back to its raw form.
pub fn unescape(escaped: &str) -> Result<String> {
    match percent_decode_str(escaped).decode_utf8() {
        Ok(key) => Ok(key.into_owned()),
        Err(_) => Err(Error::MalformedName(escaped.to_string())),
    }
}

/// Section id of an escaped key: CRC-16/IBM (polynomial 0xA001, init 0).
pub fn section_hash(escaped: &str) -> u16 {
    CRC16.checksum(escaped.as_bytes())
}

/// Truncates `s` at the first occurrence of any character in `chars`.
pub fn strip<'a>(s: &'a str, chars: &str) -> &'a str {
    match s.find(|c| chars.contains(c)) {
        Some(i) => &s[..i],
        None => s,
    }
}

/// The escaped key of a record, i.e. everything before the tab.
pub fn record_key(record: &str) -> &str {
    match record.split_once('\t') {
        Some((key, _)) => key,
        None => record,
    }
}

/// The value of a record, i.e. everything after the tab.
pub fn record_value(record: &str) -> &str {
    match record.split_once('\t') {
        Some((_, value)) => value,
        None => "",
    }
}

/// File name of an index block: `_<escaped-key>_<part as 4 hex digits>`.
pub fn index_file_name(escaped: &str, part: u16) -> String {
    format!("_{escaped}_{part:04x}")
}

/// Splits an index block file name into its escaped key and part number.
/// Requires an empty leading segment, exactly two underscores and a
/// hex-parsable part; anything else is rejected.
pub fn parse_index_file_name(name: &str) -> Result<(String, u16)> {
    let mut comps = name.split('_');
    let malformed = || Error::MalformedName(name.to_string());

    let lead = comps.next().ok_or_else(malformed)?;
    let key = comps.next().ok_or_else(malformed)?;
    let part = comps.next().ok_or_else(malformed)?;
    if !lead.is_empty() || comps.next().is_some() {
        return Err(malformed());
    }

    let part = u16::from_str_radix(part, 16).map_err(|_| malformed())?;
    Ok((key.to_string(), part))
}
