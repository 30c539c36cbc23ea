//! Pseudonym generation schemes.
//!
//! Dictionary schemes hash the input identifier into fixed word lists, so
//! the base candidate is deterministic; the broker appends a numeric
//! suffix when the candidate is already taken by a different input.

use sha2::{Digest, Sha256};

const ADJECTIVES: &[&str] = &[
    "Amber", "Ancient", "Bold", "Brave", "Bright", "Brisk", "Calm", "Clever", "Crimson", "Curious",
    "Daring", "Deep", "Eager", "Fabled", "Fleet", "Gentle", "Gilded", "Grand", "Hardy", "Hidden",
    "Humble", "Ivory", "Jolly", "Keen", "Lively", "Lucky", "Mellow", "Mighty", "Noble", "Patient",
    "Placid", "Proud", "Quiet", "Rapid", "Rustic", "Sable", "Silent", "Silver", "Sly", "Steady",
    "Stout", "Sunny", "Swift", "Tranquil", "Trusty", "Vivid", "Wise", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Bison", "Bobcat", "Caribou", "Condor", "Cougar", "Coyote", "Crane", "Dolphin",
    "Falcon", "Ferret", "Finch", "Fox", "Gazelle", "Gecko", "Heron", "Ibex", "Jaguar", "Kestrel",
    "Kite", "Lemur", "Lynx", "Magpie", "Marmot", "Marten", "Moose", "Narwhal", "Ocelot", "Osprey",
    "Otter", "Owl", "Panther", "Pelican", "Petrel", "Puffin", "Quail", "Raven", "Seal", "Shrike",
    "Stork", "Swift", "Tapir", "Tern", "Vole", "Walrus", "Weasel", "Wolf", "Wren",
];

const COLORS: &[&str] = &[
    "Amber", "Azure", "Beige", "Bronze", "Cerulean", "Charcoal", "Cobalt", "Copper", "Coral",
    "Crimson", "Emerald", "Fuchsia", "Gold", "Indigo", "Ivory", "Jade", "Lavender", "Magenta",
    "Maroon", "Ochre", "Olive", "Onyx", "Pearl", "Plum", "Russet", "Saffron", "Sapphire",
    "Scarlet", "Sienna", "Silver", "Teal", "Umber", "Vermilion", "Violet",
];

const NATO: &[&str] = &[
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India", "Juliett",
    "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango",
    "Uniform", "Victor", "Whiskey", "Xray", "Yankee", "Zulu",
];

fn digest64(id_in: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id_in.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

fn pick<'a>(words: &'a [&'a str], seed: u64, round: u64) -> &'a str {
    // Mix the round in so the two words of a pair do not correlate.
    let mixed = seed.rotate_left((round * 13 % 64) as u32) ^ (round.wrapping_mul(0x9E37_79B9));
    words[(mixed % words.len() as u64) as usize]
}

pub fn adjective_animal(id_in: &str) -> String {
    let seed = digest64(id_in);
    format!("{}{}", pick(ADJECTIVES, seed, 1), pick(ANIMALS, seed, 2))
}

pub fn color_animal(id_in: &str) -> String {
    let seed = digest64(id_in);
    format!("{}{}", pick(COLORS, seed, 1), pick(ANIMALS, seed, 2))
}

pub fn nato_phonetic(id_in: &str) -> String {
    let seed = digest64(id_in);
    format!("{}{}", pick(NATO, seed, 1), pick(NATO, seed, 2))
}

/// `{prefix}-{zero-padded count+1}`.
pub fn sequential(prefix: &str, current_count: u64) -> String {
    format!("{prefix}-{:05}", current_count + 1)
}

/// `{prefix}-{first 3 bytes of SHA-256 as uppercase hex}`.
pub fn hash(prefix: &str, id_in: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id_in.as_bytes());
    let digest = hasher.finalize();
    format!("{prefix}-{}", hex::encode_upper(&digest[..3]))
}

/// Numeric-suffix disambiguation used by every non-sequential scheme.
pub fn with_suffix(base: &str, n: u32) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{base}{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_schemes_are_deterministic() {
        assert_eq!(adjective_animal("P1"), adjective_animal("P1"));
        assert_eq!(color_animal("P1"), color_animal("P1"));
        assert_eq!(nato_phonetic("P1"), nato_phonetic("P1"));
    }

    #[test]
    fn dictionary_schemes_spread_inputs() {
        let names: std::collections::HashSet<String> =
            (0..200).map(|i| adjective_animal(&format!("P{i}"))).collect();
        // Perfect uniqueness is the suffix mechanism's job; the hash alone
        // should still spread well.
        assert!(names.len() > 100, "only {} distinct names", names.len());
    }

    #[test]
    fn sequential_pads_to_five() {
        assert_eq!(sequential("SUBJ", 0), "SUBJ-00001");
        assert_eq!(sequential("SUBJ", 41), "SUBJ-00042");
        assert_eq!(sequential("SUBJ", 99_999), "SUBJ-100000");
    }

    #[test]
    fn hash_scheme_shape() {
        let out = hash("ID", "P1");
        assert!(out.starts_with("ID-"));
        let hexpart = &out[3..];
        assert_eq!(hexpart.len(), 6);
        assert!(hexpart.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(out, hash("ID", "P1"));
        assert_ne!(out, hash("ID", "P2"));
    }

    #[test]
    fn suffix_rules() {
        assert_eq!(with_suffix("BoldOtter", 0), "BoldOtter");
        assert_eq!(with_suffix("BoldOtter", 1), "BoldOtter");
        assert_eq!(with_suffix("BoldOtter", 2), "BoldOtter2");
    }
}
