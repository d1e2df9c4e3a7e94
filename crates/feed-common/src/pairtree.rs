//! Pairtree identifier encoding (spec version 0.1)
//!
//! Object identifiers are mapped onto filesystem paths in two steps: a
//! character cleaning pass (`s2ppchars`) and a split into two-character
//! shards (`id2ppath`). The cleaned form is also used as the terminal
//! directory name and the basename of the archived METS and zip.

/// Characters that must be hex-escaped before the single-character
/// conversions run. The escape character `^` escapes itself.
const ESCAPED: &[char] = &[
    '"', '*', '+', ',', '<', '=', '>', '?', '\\', '^', '|',
];

/// Clean an identifier into its pairtree form.
///
/// Out-of-range and reserved characters become `^xx` hex escapes, then
/// `/` maps to `=`, `:` to `+`, and `.` to `,`.
pub fn s2ppchars(id: &str) -> String {
    let mut out = String::with_capacity(id.len());

    for c in id.chars() {
        if !(0x21..=0x7e).contains(&(c as u32)) || ESCAPED.contains(&c) {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("^{:02x}", b));
            }
        } else {
            match c {
                '/' => out.push('='),
                ':' => out.push('+'),
                '.' => out.push(','),
                _ => out.push(c),
            }
        }
    }

    out
}

/// Map an identifier to its pairtree path: the cleaned identifier split
/// into two-character shards, e.g. `39002054` -> `39/00/20/54`.
pub fn id2ppath(id: &str) -> String {
    let clean = s2ppchars(id);
    let chars: Vec<char> = clean.chars().collect();

    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}
