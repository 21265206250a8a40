//! page-provided key remapping and tweak overrides
//!
//! Kiosk pages can ship a small map that rewrites keysyms and modifier masks
//! before dispatch, plus `$name=value` tweaks that adjust backend behavior.
//! The active map is selected per navigation from `PLINTH_KEYMAP_URL`.
//!
//! Grammar, entries split on `,` or `|`:
//!
//! ```text
//! fromKey[:fromMod]=toKey[:toMod][!]
//! $name=value
//! ```
//!
//! Integers are decimal or `0x` hex. A trailing `!` disables key repeat for
//! the mapping. Mapping to key 0 swallows the event. Text after a parsed
//! value is ignored up to the next separator, so entries can carry comments.

/// Remapping a key to this value swallows the event.
pub const NULL_KEY: u32 = 0;

/// Private key range used to feed pointer buttons through the remap table.
pub const POINTER_KEY_BASE: u32 = 0xf000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemapEntry {
    from_key: u32,
    from_mods: u32,
    to_key: u32,
    to_mods: u32,
    repeat: bool,
}

/// Outcome of running one event through the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapOutcome {
    pub matched: bool,
    /// Whether the event may still drive key repeat.
    pub repeat: bool,
    /// Whether the event must be swallowed instead of dispatched.
    pub gobble: bool,
}

/// The remap entries and tweaks parsed from one map text.
#[derive(Debug, Default, PartialEq)]
pub struct PageMap {
    remaps: Vec<RemapEntry>,
    tweaks: Vec<(String, i64)>,
}

impl PageMap {
    /// A malformed entry stops the parse, keeping everything before it.
    pub fn parse(text: &str) -> PageMap {
        let mut map = PageMap::default();
        for token in text.split([',', '|']).map(str::trim) {
            if token.is_empty() {
                continue;
            }
            let parsed = match token.strip_prefix('$') {
                Some(tweak) => parse_tweak(tweak).map(|t| map.tweaks.push(t)),
                None => parse_remap(token).map(|e| map.remaps.push(e)),
            };
            if parsed.is_none() {
                tracing::warn!("malformed keymap entry {token:?}, rest of map ignored");
                break;
            }
        }
        map
    }

    /// Build the map for a page URI. `PLINTH_KEYMAP_URL` is a comma list in
    /// which `#ENVNAME` segments name the env var holding the map text and
    /// any other segment is a URI substring that stops the scan, keeping the
    /// last `#ENVNAME` seen.
    pub fn for_uri(uri: &str) -> PageMap {
        let Ok(list) = std::env::var("PLINTH_KEYMAP_URL") else {
            return PageMap::default();
        };
        let mut source = None;
        for segment in list.split(',') {
            if let Some(name) = segment.strip_prefix('#') {
                source = Some(name.to_owned());
            } else if uri.contains(segment) {
                break;
            }
        }
        let Some(name) = source else {
            return PageMap::default();
        };
        match std::env::var(&name) {
            Ok(text) => PageMap::parse(&text),
            Err(_) => {
                tracing::warn!("keymap env var {name:?} not set");
                PageMap::default()
            }
        }
    }

    /// Rewrite `key`/`mods` through the table. First match wins; an exact
    /// modifier match is required.
    pub fn remap(&self, key: &mut u32, mods: &mut u32) -> RemapOutcome {
        for entry in &self.remaps {
            if entry.from_key == *key && entry.from_mods == *mods {
                *key = entry.to_key;
                *mods = entry.to_mods;
                let gobble = entry.to_key == NULL_KEY;
                return RemapOutcome { matched: true, repeat: entry.repeat && !gobble, gobble };
            }
        }
        RemapOutcome { matched: false, repeat: true, gobble: false }
    }

    /// Case-folded tweak lookup, first match wins.
    pub fn tweak(&self, name: &str, default: i64) -> i64 {
        let name = name.to_ascii_lowercase();
        self.tweaks
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.remaps.is_empty() && self.tweaks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.remaps.len()
    }
}

fn parse_remap(token: &str) -> Option<RemapEntry> {
    let (from_key, rest) = parse_int(token)?;
    let (from_mods, rest) = parse_opt_mods(rest)?;
    let rest = rest.trim_start().strip_prefix('=')?;
    let (to_key, rest) = parse_int(rest)?;
    let (to_mods, rest) = parse_opt_mods(rest)?;
    let repeat = !rest.trim_start().starts_with('!');
    Some(RemapEntry { from_key: from_key as u32, from_mods: from_mods as u32, to_key: to_key as u32, to_mods: to_mods as u32, repeat })
}

fn parse_opt_mods(rest: &str) -> Option<(i64, &str)> {
    match rest.strip_prefix(':') {
        Some(rest) => parse_int(rest),
        None => Some((0, rest)),
    }
}

fn parse_tweak(token: &str) -> Option<(String, i64)> {
    let end = token
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(token.len());
    if end == 0 {
        return None;
    }
    let name = token[..end].to_ascii_lowercase();
    let rest = token[end..].trim_start().strip_prefix('=')?;
    let (value, _) = parse_int(rest)?;
    Some((name, value))
}

/// Leading whitespace allowed, then an optional sign and a decimal or `0x`
/// integer. Returns the value and the unconsumed remainder.
fn parse_int(text: &str) -> Option<(i64, &str)> {
    let text = text.trim_start();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (radix, digits) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(rest) => (16, rest),
        None => (10, text),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some((if negative { -value } else { value }, &digits[end..]))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_entries() {
        let map = PageMap::parse("30:0=40:0,60:0=0:0");
        let (mut key, mut mods) = (30, 0);
        let outcome = map.remap(&mut key, &mut mods);
        assert!(outcome.matched && outcome.repeat && !outcome.gobble);
        assert_eq!((key, mods), (40, 0));

        let (mut key, mut mods) = (60, 0);
        let outcome = map.remap(&mut key, &mut mods);
        assert!(outcome.matched && outcome.gobble);
        assert!(!outcome.repeat);
    }

    #[test]
    fn modifiers_must_match_exactly() {
        let map = PageMap::parse("30:4=40:0");
        let (mut key, mut mods) = (30, 0);
        assert!(!map.remap(&mut key, &mut mods).matched);
        let (mut key, mut mods) = (30, 4);
        assert!(map.remap(&mut key, &mut mods).matched);
        assert_eq!((key, mods), (40, 0));
    }

    #[test]
    fn hex_pipe_and_no_repeat() {
        let map = PageMap::parse("0xf110=0x20!|0x41=0x61");
        let (mut key, mut mods) = (0xf110, 0);
        let outcome = map.remap(&mut key, &mut mods);
        assert!(outcome.matched && !outcome.repeat && !outcome.gobble);
        assert_eq!(key, 0x20);
        let (mut key, mut mods) = (0x41, 0);
        assert!(map.remap(&mut key, &mut mods).repeat);
        assert_eq!(key, 0x61);
    }

    #[test]
    fn trailing_comment_ignored() {
        let map = PageMap::parse("32=13 enter key,33=8 backspace");
        assert_eq!(map.len(), 2);
        let (mut key, mut mods) = (33, 0);
        assert!(map.remap(&mut key, &mut mods).matched);
        assert_eq!(key, 8);
    }

    #[test]
    fn malformed_truncates() {
        let map = PageMap::parse("30=40,garbage,50=60");
        assert_eq!(map.len(), 1);
        let (mut key, mut mods) = (50, 0);
        assert!(!map.remap(&mut key, &mut mods).matched);
    }

    #[test]
    fn tweaks() {
        let map = PageMap::parse("$cursor=0,30=40,$Scroll=1");
        assert_eq!(map.tweak("cursor", 1), 0);
        assert_eq!(map.tweak("CURSOR", 1), 0);
        assert_eq!(map.tweak("scroll", 0), 1);
        assert_eq!(map.tweak("zoom", 7), 7);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn empty_map() {
        let map = PageMap::parse("");
        assert!(map.is_empty());
        let (mut key, mut mods) = (30, 0);
        let outcome = map.remap(&mut key, &mut mods);
        assert!(!outcome.matched && outcome.repeat && !outcome.gobble);
    }
}
