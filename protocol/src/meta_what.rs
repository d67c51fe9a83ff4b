use std::fmt;
use std::ops::BitOr;

/// Set of metadata categories a `get` or `set` targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MetaWhat(u8);

const NAMES: [(&str, MetaWhat); 6] = [
    ("desc", MetaWhat::DESC),
    ("sub", MetaWhat::SUB),
    ("data", MetaWhat::DATA),
    ("del", MetaWhat::DEL),
    ("tags", MetaWhat::TAGS),
    ("cred", MetaWhat::CRED),
];

impl MetaWhat {
    pub const NONE: MetaWhat = MetaWhat(0);
    pub const DESC: MetaWhat = MetaWhat(0x01);
    pub const SUB: MetaWhat = MetaWhat(0x02);
    pub const DATA: MetaWhat = MetaWhat(0x04);
    pub const DEL: MetaWhat = MetaWhat(0x08);
    pub const TAGS: MetaWhat = MetaWhat(0x10);
    pub const CRED: MetaWhat = MetaWhat(0x20);

    /// Parses a space-separated list such as `"desc sub data"`. Unknown
    /// words are ignored.
    pub fn parse(what: &str) -> MetaWhat {
        what.split_whitespace()
            .filter_map(|word| {
                NAMES
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(word))
                    .map(|(_, bit)| *bit)
            })
            .fold(MetaWhat::NONE, |acc, bit| acc | bit)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: MetaWhat) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for MetaWhat {
    type Output = MetaWhat;

    fn bitor(self, rhs: Self) -> Self::Output {
        MetaWhat(self.0 | rhs.0)
    }
}

impl fmt::Display for MetaWhat {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(_, bit)| self.contains(*bit))
            .map(|(name, _)| *name)
            .collect();
        write!(fmt, "{}", names.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_words_and_skips_unknown() {
        let what = MetaWhat::parse("desc  DATA bogus");
        assert!(what.contains(MetaWhat::DESC));
        assert!(what.contains(MetaWhat::DATA));
        assert!(!what.contains(MetaWhat::SUB));
        assert_eq!(what.to_string(), "desc data");
    }

    #[test]
    fn empty_string_is_empty_set() {
        assert!(MetaWhat::parse("").is_empty());
        assert!(!MetaWhat::NONE.contains(MetaWhat::NONE));
    }
}
