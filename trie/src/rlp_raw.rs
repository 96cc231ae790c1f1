//! Raw RLP splitting helpers.
//!
//! Structured encodes and decodes go through `alloy-rlp`; these helpers walk
//! raw encodings without materializing them, which is what the trie node
//! codec and the block playback need (a block carries opaque sub-encodings
//! that are hashed and re-emitted verbatim).

use crate::TrieError;

/// Splits `buf` into `(is_list, content, rest)` where `content` is the
/// payload of the first item and `rest` is everything after it.
pub fn split(buf: &[u8]) -> Result<(bool, &[u8], &[u8]), TrieError> {
    let (is_list, header_len, payload_len) = item_spans(buf)?;
    let total = header_len + payload_len;
    Ok((is_list, &buf[header_len..total], &buf[total..]))
}

/// Splits off a list item, failing if the item is a string.
pub fn split_list(buf: &[u8]) -> Result<(&[u8], &[u8]), TrieError> {
    let (is_list, content, rest) = split(buf)?;
    if !is_list {
        return Err(TrieError::InvalidTrie("expected rlp list"));
    }
    Ok((content, rest))
}

/// Splits off a string item, failing if the item is a list.
pub fn split_string(buf: &[u8]) -> Result<(&[u8], &[u8]), TrieError> {
    let (is_list, content, rest) = split(buf)?;
    if is_list {
        return Err(TrieError::InvalidTrie("expected rlp string"));
    }
    Ok((content, rest))
}

/// Counts the items in a list payload.
pub fn count_values(mut content: &[u8]) -> Result<usize, TrieError> {
    let mut count = 0;
    while !content.is_empty() {
        let (_, _, rest) = split(content)?;
        content = rest;
        count += 1;
    }
    Ok(count)
}

/// Takes the next raw item (header included) off the front of `buf`.
pub fn take_item<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], TrieError> {
    let (_, header_len, payload_len) = item_spans(buf)?;
    let total = header_len + payload_len;
    let item = &buf[..total];
    *buf = &buf[total..];
    Ok(item)
}

/// Computes `(is_list, header_len, payload_len)` for the first item.
fn item_spans(buf: &[u8]) -> Result<(bool, usize, usize), TrieError> {
    let first = *buf.first().ok_or(TrieError::InvalidTrie("empty rlp input"))?;
    let (is_list, header_len, payload_len) = match first {
        0x00..=0x7f => (false, 0, 1),
        0x80..=0xb7 => (false, 1, (first - 0x80) as usize),
        0xb8..=0xbf => {
            let len_len = (first - 0xb7) as usize;
            (false, 1 + len_len, read_length(buf, len_len)?)
        }
        0xc0..=0xf7 => (true, 1, (first - 0xc0) as usize),
        0xf8..=0xff => {
            let len_len = (first - 0xf7) as usize;
            (true, 1 + len_len, read_length(buf, len_len)?)
        }
    };
    if buf.len() < header_len + payload_len {
        return Err(TrieError::InvalidTrie("rlp input too short"));
    }
    Ok((is_list, header_len, payload_len))
}

fn read_length(buf: &[u8], len_len: usize) -> Result<usize, TrieError> {
    if buf.len() < 1 + len_len || len_len > core::mem::size_of::<usize>() {
        return Err(TrieError::InvalidTrie("bad rlp length prefix"));
    }
    let mut len = 0usize;
    for &b in &buf[1..1 + len_len] {
        len = len << 8 | b as usize;
    }
    Ok(len)
}

/// Appends a string item to `out`.
pub fn put_str(out: &mut Vec<u8>, s: &[u8]) {
    if s.len() == 1 && s[0] < 0x80 {
        out.push(s[0]);
    } else if s.len() <= 55 {
        out.push(0x80 + s.len() as u8);
        out.extend_from_slice(s);
    } else {
        put_long_length(out, 0xb7, s.len());
        out.extend_from_slice(s);
    }
}

/// Encoded length of a string item.
pub fn str_len(s: &[u8]) -> usize {
    if s.len() == 1 && s[0] < 0x80 {
        1
    } else if s.len() <= 55 {
        1 + s.len()
    } else {
        1 + be_len(s.len()) + s.len()
    }
}

/// Appends a list header for a payload of `payload_len` bytes.
pub fn put_list_header(out: &mut Vec<u8>, payload_len: usize) {
    if payload_len <= 55 {
        out.push(0xc0 + payload_len as u8);
    } else {
        put_long_length(out, 0xf7, payload_len);
    }
}

/// Encoded length of a list with a payload of `payload_len` bytes.
pub fn list_len(payload_len: usize) -> usize {
    if payload_len <= 55 {
        1 + payload_len
    } else {
        1 + be_len(payload_len) + payload_len
    }
}

fn put_long_length(out: &mut Vec<u8>, base: u8, len: usize) {
    let be = len.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    out.push(base + (be.len() - skip) as u8);
    out.extend_from_slice(&be[skip..]);
}

fn be_len(len: usize) -> usize {
    core::mem::size_of::<usize>() - len.leading_zeros() as usize / 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_strings() {
        // single byte
        let (is_list, content, rest) = split(&[0x05, 0xff]).unwrap();
        assert!(!is_list);
        assert_eq!(content, &[0x05]);
        assert_eq!(rest, &[0xff]);

        // short string
        let (_, content, rest) = split(&[0x83, b'c', b'a', b't']).unwrap();
        assert_eq!(content, b"cat");
        assert!(rest.is_empty());

        // empty string
        let (_, content, _) = split(&[0x80]).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_split_list_and_count() {
        // ["cat", "dog"]
        let buf = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let (content, rest) = split_list(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(count_values(content).unwrap(), 2);

        let mut items = content;
        assert_eq!(take_item(&mut items).unwrap(), &[0x83, b'c', b'a', b't']);
        assert_eq!(take_item(&mut items).unwrap(), &[0x83, b'd', b'o', b'g']);
        assert!(items.is_empty());
    }

    #[test]
    fn test_put_str_round_trip() {
        for payload in [&b""[..], &b"a"[..], &b"\x80"[..], &[0x55u8; 60][..]] {
            let mut out = Vec::new();
            put_str(&mut out, payload);
            assert_eq!(out.len(), str_len(payload));
            let (content, rest) = split_string(&out).unwrap();
            assert_eq!(content, payload);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_long_list_header() {
        let mut out = Vec::new();
        put_list_header(&mut out, 56);
        assert_eq!(out, vec![0xf8, 56]);
        assert_eq!(list_len(56), 2 + 56);
    }

    #[test]
    fn test_truncated_input_rejected() {
        assert!(split(&[0x83, b'c']).is_err());
        assert!(split(&[]).is_err());
    }
}
