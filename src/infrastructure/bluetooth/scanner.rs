//! Advertisement Parsing
//!
//! Extracts the advertised name from scan responses and decides whether a
//! sighting is eligible for connection.

/// AD type: shortened local name.
pub const AD_SHORT_NAME: u8 = 0x08;
/// AD type: complete local name.
pub const AD_COMPLETE_NAME: u8 = 0x09;

/// One `[len, type, data...]` structure of an advertisement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterate the AD structures of a payload. Iteration stops at a zero length
/// byte or at a structure that runs past the end of the buffer.
pub fn ad_structures(payload: &[u8]) -> impl Iterator<Item = AdStructure<'_>> {
    let mut rest = payload;
    std::iter::from_fn(move || {
        let (&len, tail) = rest.split_first()?;
        let len = len as usize;
        if len == 0 || tail.len() < len {
            rest = &[];
            return None;
        }
        let (body, next) = tail.split_at(len);
        rest = next;
        Some(AdStructure {
            ad_type: body[0],
            data: &body[1..],
        })
    })
}

/// Advertised local name, preferring the complete name over the short one.
pub fn advertised_name(payload: &[u8]) -> Option<String> {
    let mut short = None;
    for ad in ad_structures(payload) {
        match ad.ad_type {
            AD_COMPLETE_NAME => return Some(String::from_utf8_lossy(ad.data).into_owned()),
            AD_SHORT_NAME if short.is_none() => {
                short = Some(String::from_utf8_lossy(ad.data).into_owned())
            }
            _ => {}
        }
    }
    short
}

/// Substring match on the advertised name. An empty filter accepts all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    pattern: Option<String>,
}

impl NameFilter {
    pub fn new(pattern: Option<String>) -> Self {
        Self {
            pattern: pattern.filter(|p| !p.is_empty()),
        }
    }

    pub fn accepts(&self, name: Option<&str>) -> bool {
        match (&self.pattern, name) {
            (None, _) => true,
            (Some(pattern), Some(name)) => name.contains(pattern.as_str()),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_name_wins() {
        let payload = [
            0x02, 0x01, 0x06, // flags
            0x04, AD_SHORT_NAME, b'T', b'X', b'W',
            0x06, AD_COMPLETE_NAME, b'T', b'X', b'W', b'5', b'1',
        ];
        assert_eq!(advertised_name(&payload).as_deref(), Some("TXW51"));
    }

    #[test]
    fn test_short_name_fallback() {
        let payload = [0x04, AD_SHORT_NAME, b'T', b'X', b'W'];
        assert_eq!(advertised_name(&payload).as_deref(), Some("TXW"));
    }

    #[test]
    fn test_malformed_tail_is_ignored() {
        let payload = [0x03, AD_COMPLETE_NAME, b'A', b'B', 0x09, 0xFF, 0x01];
        assert_eq!(advertised_name(&payload).as_deref(), Some("AB"));
        assert_eq!(ad_structures(&[0x05, 0x09, 0x41]).count(), 0);
        assert_eq!(advertised_name(&[]), None);
    }

    #[test]
    fn test_name_filter() {
        let filter = NameFilter::new(Some("TXW51".to_string()));
        assert!(filter.accepts(Some("TXW51")));
        assert!(filter.accepts(Some("TXW51-0042")));
        assert!(!filter.accepts(Some("Other")));
        assert!(!filter.accepts(None));

        let open = NameFilter::new(None);
        assert!(open.accepts(None));
        assert!(NameFilter::new(Some(String::new())).accepts(Some("x")));
    }
}
