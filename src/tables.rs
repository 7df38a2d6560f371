//! Character ↔ representation lookup tables, the hash-based fast path for
//! representation lookup, procedural signal expansions, and ITU phonetics.
//!
//! Grounded on the `CW_TABLE` / `CW_PROSIGN_TABLE` / `CW_PHONETICS` static
//! tables of the C original this crate's design descends from.

use crate::error::{CwError, CwResult};
use std::sync::OnceLock;

/// One character and its dot/dash representation.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub character: char,
    pub representation: &'static str,
}

/// One procedural signal: the character client code sends, the Morse letters
/// it expands to when spelled out, and whether that expansion is the usual
/// rendering (vs. being sent as a single run-together prosign).
#[derive(Debug, Clone, Copy)]
pub struct ProsignEntry {
    pub character: char,
    pub expansion: &'static str,
    pub is_usually_expanded: bool,
}

/// The full Morse character set: ASCII letters and digits, the standard
/// punctuation set, ISO 8859-1/8859-2 accented letters, and six non-standard
/// procedural-signal extensions.
pub const CW_TABLE: &[Entry] = &[
    Entry { character: 'A', representation: ".-" },
    Entry { character: 'B', representation: "-..." },
    Entry { character: 'C', representation: "-.-." },
    Entry { character: 'D', representation: "-.." },
    Entry { character: 'E', representation: "." },
    Entry { character: 'F', representation: "..-." },
    Entry { character: 'G', representation: "--." },
    Entry { character: 'H', representation: "...." },
    Entry { character: 'I', representation: ".." },
    Entry { character: 'J', representation: ".---" },
    Entry { character: 'K', representation: "-.-" },
    Entry { character: 'L', representation: ".-.." },
    Entry { character: 'M', representation: "--" },
    Entry { character: 'N', representation: "-." },
    Entry { character: 'O', representation: "---" },
    Entry { character: 'P', representation: ".--." },
    Entry { character: 'Q', representation: "--.-" },
    Entry { character: 'R', representation: ".-." },
    Entry { character: 'S', representation: "..." },
    Entry { character: 'T', representation: "-" },
    Entry { character: 'U', representation: "..-" },
    Entry { character: 'V', representation: "...-" },
    Entry { character: 'W', representation: ".--" },
    Entry { character: 'X', representation: "-..-" },
    Entry { character: 'Y', representation: "-.--" },
    Entry { character: 'Z', representation: "--.." },
    Entry { character: '0', representation: "-----" },
    Entry { character: '1', representation: ".----" },
    Entry { character: '2', representation: "..---" },
    Entry { character: '3', representation: "...--" },
    Entry { character: '4', representation: "....-" },
    Entry { character: '5', representation: "....." },
    Entry { character: '6', representation: "-...." },
    Entry { character: '7', representation: "--..." },
    Entry { character: '8', representation: "---.." },
    Entry { character: '9', representation: "----." },
    Entry { character: '"', representation: ".-..-." },
    Entry { character: '\'', representation: ".----." },
    Entry { character: '$', representation: "...-..-" },
    Entry { character: '(', representation: "-.--." },
    Entry { character: ')', representation: "-.--.-" },
    Entry { character: '+', representation: ".-.-." },
    Entry { character: ',', representation: "--..--" },
    Entry { character: '-', representation: "-....-" },
    Entry { character: '.', representation: ".-.-.-" },
    Entry { character: '/', representation: "-..-." },
    Entry { character: ':', representation: "---..." },
    Entry { character: ';', representation: "-.-.-." },
    Entry { character: '=', representation: "-...-" },
    Entry { character: '?', representation: "..--.." },
    Entry { character: '_', representation: "..--.-" },
    Entry { character: '@', representation: ".--.-." },
    // ISO 8859-1 accented characters.
    Entry { character: 'Ü', representation: "..--" },
    Entry { character: 'Ä', representation: ".-.-" },
    Entry { character: 'Ç', representation: "-.-.." },
    Entry { character: 'Ö', representation: "---." },
    Entry { character: 'É', representation: "..-.." },
    Entry { character: 'È', representation: ".-..-" },
    Entry { character: 'À', representation: ".--.-" },
    Entry { character: 'Ñ', representation: "--.--" },
    // ISO 8859-2 accented characters.
    Entry { character: 'Ş', representation: "----" },
    Entry { character: 'Ż', representation: "--..-" },
    // Non-standard procedural signal extensions.
    Entry { character: '<', representation: "...-.-" },
    Entry { character: '>', representation: "-...-.-" },
    Entry { character: '!', representation: "...-." },
    Entry { character: '&', representation: ".-..." },
    Entry { character: '^', representation: "-.-.-" },
    Entry { character: '~', representation: ".-.-.." },
];

pub const CW_PROSIGN_TABLE: &[ProsignEntry] = &[
    ProsignEntry { character: '"', expansion: "AF", is_usually_expanded: false },
    ProsignEntry { character: '\'', expansion: "WG", is_usually_expanded: false },
    ProsignEntry { character: '$', expansion: "SX", is_usually_expanded: false },
    ProsignEntry { character: '(', expansion: "KN", is_usually_expanded: false },
    ProsignEntry { character: ')', expansion: "KK", is_usually_expanded: false },
    ProsignEntry { character: '+', expansion: "AR", is_usually_expanded: false },
    ProsignEntry { character: ',', expansion: "MIM", is_usually_expanded: false },
    ProsignEntry { character: '-', expansion: "DU", is_usually_expanded: false },
    ProsignEntry { character: '.', expansion: "AAA", is_usually_expanded: false },
    ProsignEntry { character: '/', expansion: "DN", is_usually_expanded: false },
    ProsignEntry { character: ':', expansion: "OS", is_usually_expanded: false },
    ProsignEntry { character: ';', expansion: "KR", is_usually_expanded: false },
    ProsignEntry { character: '=', expansion: "BT", is_usually_expanded: false },
    ProsignEntry { character: '?', expansion: "IMI", is_usually_expanded: false },
    ProsignEntry { character: '_', expansion: "IQ", is_usually_expanded: false },
    ProsignEntry { character: '@', expansion: "AC", is_usually_expanded: false },
    ProsignEntry { character: '<', expansion: "VA", is_usually_expanded: true },
    ProsignEntry { character: '>', expansion: "BK", is_usually_expanded: true },
    ProsignEntry { character: '!', expansion: "SN", is_usually_expanded: true },
    ProsignEntry { character: '&', expansion: "AS", is_usually_expanded: true },
    ProsignEntry { character: '^', expansion: "KA", is_usually_expanded: true },
    ProsignEntry { character: '~', expansion: "AL", is_usually_expanded: true },
];

pub const CW_PHONETICS: &[(char, &str)] = &[
    ('A', "Alfa"), ('B', "Bravo"), ('C', "Charlie"), ('D', "Delta"),
    ('E', "Echo"), ('F', "Foxtrot"), ('G', "Golf"), ('H', "Hotel"),
    ('I', "India"), ('J', "Juliett"), ('K', "Kilo"), ('L', "Lima"),
    ('M', "Mike"), ('N', "November"), ('O', "Oscar"), ('P', "Papa"),
    ('Q', "Quebec"), ('R', "Romeo"), ('S', "Sierra"), ('T', "Tango"),
    ('U', "Uniform"), ('V', "Victor"), ('W', "Whiskey"), ('X', "X-ray"),
    ('Y', "Yankee"), ('Z', "Zulu"),
];

pub const DOT_REPRESENTATION: char = '.';
pub const DASH_REPRESENTATION: char = '-';

/// Number of characters represented in [`CW_TABLE`].
pub fn character_count() -> usize {
    CW_TABLE.len()
}

/// All characters with a table entry, in table order.
pub fn list_characters() -> Vec<char> {
    CW_TABLE.iter().map(|e| e.character).collect()
}

/// Longest representation string in [`CW_TABLE`].
pub fn maximum_representation_length() -> usize {
    CW_TABLE.iter().map(|e| e.representation.len()).max().unwrap_or(0)
}

/// Look up the dot/dash representation of `character`.
pub fn lookup_character(character: char) -> CwResult<&'static str> {
    let upper = character.to_uppercase().next().unwrap_or(character);
    CW_TABLE
        .iter()
        .find(|e| e.character == upper)
        .map(|e| e.representation)
        .ok_or(CwError::NotFound("character has no Morse representation"))
}

/// Check that `representation` is well-formed: every byte is `.` or `-`,
/// and the string is non-empty. Does not check length against the table's
/// longest entry — callers that need that bound use
/// [`maximum_representation_length`] separately.
pub fn check_representation(representation: &str) -> bool {
    !representation.is_empty() && representation.bytes().all(|b| b == b'.' || b == b'-')
}

/// Hash a representation string (only `.`/`-`, 1-7 chars) into the range
/// `[2, 255]` used as a fast lookup index. Returns `None` if the string is
/// too long, empty, or contains characters other than `.`/`-`.
///
/// The algorithm treats the representation as a bitmask: start with a
/// sentinel 1 bit, then for each element shift left and OR in a 1 for a dash
/// or a 0 for a dot. The position of the sentinel bit records the string
/// length, which is why only strings up to 7 characters are representable
/// in a `u8`-ish range.
pub fn hash_representation(representation: &str) -> Option<u32> {
    let len = representation.len();
    if len < 1 || len > 7 {
        return None;
    }
    let mut hash: u32 = 1;
    for c in representation.chars() {
        hash <<= 1;
        match c {
            DASH_REPRESENTATION => hash |= 1,
            DOT_REPRESENTATION => {}
            _ => return None,
        }
    }
    Some(hash)
}

struct FastLookup {
    table: Vec<Option<&'static Entry>>,
    complete: bool,
}

fn fast_lookup() -> &'static FastLookup {
    static LOOKUP: OnceLock<FastLookup> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut table: Vec<Option<&'static Entry>> = vec![None; 256];
        let mut complete = true;
        for entry in CW_TABLE {
            match hash_representation(entry.representation) {
                Some(hash) => table[hash as usize] = Some(entry),
                None => complete = false,
            }
        }
        if !complete {
            log::debug!("representation hash lookup table incomplete, falling back to linear scan for long codes");
        }
        FastLookup { table, complete }
    })
}

/// Look up the character for a dot/dash `representation`. Uses the hashed
/// fast path when the representation hashes cleanly (length 1-7); falls back
/// to a linear scan of [`CW_TABLE`] otherwise (this only matters if the
/// representation is itself malformed, since every real table entry hashes).
pub fn lookup_representation(representation: &str) -> CwResult<char> {
    if let Some(hash) = hash_representation(representation) {
        let lookup = fast_lookup();
        if let Some(entry) = lookup.table[hash as usize] {
            return Ok(entry.character);
        }
        if lookup.complete {
            return Err(CwError::NotFound("representation not in table"));
        }
    }
    CW_TABLE
        .iter()
        .find(|e| e.representation == representation)
        .map(|e| e.character)
        .ok_or(CwError::NotFound("representation not in table"))
}

/// Number of characters with a procedural signal expansion.
pub fn procedural_character_count() -> usize {
    CW_PROSIGN_TABLE.len()
}

/// Longest expansion string in [`CW_PROSIGN_TABLE`].
pub fn maximum_procedural_expansion_length() -> usize {
    CW_PROSIGN_TABLE.iter().map(|e| e.expansion.len()).max().unwrap_or(0)
}

/// Look up the procedural expansion of `character`, if any.
pub fn lookup_procedural_character(character: char) -> Option<&'static ProsignEntry> {
    let upper = character.to_uppercase().next().unwrap_or(character);
    CW_PROSIGN_TABLE.iter().find(|e| e.character == upper)
}

/// Longest phonetic string in [`CW_PHONETICS`].
pub fn maximum_phonetic_length() -> usize {
    CW_PHONETICS.iter().map(|(_, p)| p.len()).max().unwrap_or(0)
}

/// Look up the ITU/NATO phonetic of `character` (letters A-Z only).
pub fn lookup_phonetic(character: char) -> CwResult<&'static str> {
    let upper = character.to_uppercase().next().unwrap_or(character);
    CW_PHONETICS
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, p)| *p)
        .ok_or(CwError::NotFound("character has no phonetic"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_table_entry() {
        for entry in CW_TABLE {
            let looked_up = lookup_character(entry.character).unwrap();
            assert_eq!(looked_up, entry.representation);
            let back = lookup_representation(entry.representation).unwrap();
            assert_eq!(back, entry.character);
        }
    }

    #[test]
    fn hash_is_stable_and_in_range() {
        for entry in CW_TABLE {
            let hash = hash_representation(entry.representation).unwrap();
            assert!((2..=255).contains(&hash), "hash {hash} out of range for {}", entry.representation);
        }
    }

    #[test]
    fn hash_rejects_bad_input() {
        assert_eq!(hash_representation(""), None);
        assert_eq!(hash_representation(".......-"), None); // 8 chars
        assert_eq!(hash_representation(".x-"), None);
    }

    #[test]
    fn check_representation_accepts_only_dots_and_dashes() {
        assert!(check_representation(".-"));
        assert!(check_representation("-"));
        assert!(!check_representation(""));
        assert!(!check_representation(".x-"));
    }

    #[test]
    fn unknown_representation_is_not_found() {
        assert!(lookup_representation(".-.-.-.-").is_err());
    }

    #[test]
    fn phonetics_cover_the_alphabet() {
        assert_eq!(CW_PHONETICS.len(), 26);
        assert_eq!(lookup_phonetic('q').unwrap(), "Quebec");
    }

    #[test]
    fn prosign_expansions_carry_expected_flag() {
        let ar = lookup_procedural_character('+').unwrap();
        assert_eq!(ar.expansion, "AR");
        assert!(!ar.is_usually_expanded);

        let sk = lookup_procedural_character('<').unwrap();
        assert_eq!(sk.expansion, "VA");
        assert!(sk.is_usually_expanded);
    }
}
