//! `key=value;key=value` parameter strings exchanged with the audio framework.

use std::fmt;

pub const KEY_ROUTING: &str = "routing";
pub const KEY_VR_MODE: &str = "vr_mode";
pub const KEY_BT_NREC: &str = "bt_headset_nrec";

/// Ordered key/value pairs parsed from a parameter string.
///
/// Setters consume the keys they recognise with [`AudioParameter::remove`]; anything left
/// over afterwards was not understood.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioParameter {
    pairs: Vec<(String, String)>,
}

impl AudioParameter {
    /// Parse `k1=v1;k2=v2`. A bare key gets an empty value; empty segments are skipped.
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split(';')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (segment.to_string(), String::new()),
            })
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(pos).1)
    }

    /// Insert or replace.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    pub fn add_int(&mut self, key: &str, value: i64) {
        self.add(key, value.to_string());
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for AudioParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_ints() {
        let params = AudioParameter::parse("routing=2;vr_mode=1");
        assert_eq!(params.get_int(KEY_ROUTING), Some(2));
        assert_eq!(params.get(KEY_VR_MODE), Some("1"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn tolerates_blank_segments_and_bare_keys() {
        let params = AudioParameter::parse(";routing; bt_headset_nrec = on ;");
        assert_eq!(params.get(KEY_ROUTING), Some(""));
        assert_eq!(params.get_int(KEY_ROUTING), None);
        assert_eq!(params.get(KEY_BT_NREC), Some("on"));
    }

    #[test]
    fn remove_leaves_unrecognised_keys() {
        let mut params = AudioParameter::parse("routing=4;foo=bar");
        assert_eq!(params.remove(KEY_ROUTING).as_deref(), Some("4"));
        assert_eq!(params.remove(KEY_ROUTING), None);
        assert_eq!(params.to_string(), "foo=bar");
    }

    #[test]
    fn add_replaces_existing_value() {
        let mut params = AudioParameter::default();
        params.add_int(KEY_ROUTING, 1);
        params.add_int(KEY_ROUTING, 3);
        params.add(KEY_VR_MODE, "0");
        assert_eq!(params.to_string(), "routing=3;vr_mode=0");
    }
}
