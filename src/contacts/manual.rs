use super::{clean_phone_number, Contact, PhoneRules, PHONE_SHAPED_RE};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static ENTRY_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\n,;]+").unwrap());

/// Outcome of a parse or file extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub success: bool,
    pub contacts: Vec<Contact>,
    pub count: usize,
    pub message: String,
}

impl ParseSummary {
    fn with_message(contacts: Vec<Contact>, verb: &str) -> Self {
        let count = contacts.len();
        let message = if count == 0 {
            "No valid contacts found".to_string()
        } else {
            format!("{} {} contacts", verb, count)
        };
        Self {
            success: true,
            contacts,
            count,
            message,
        }
    }

    pub(crate) fn extracted(contacts: Vec<Contact>) -> Self {
        Self::with_message(contacts, "Extracted")
    }

    pub(crate) fn parsed(contacts: Vec<Contact>) -> Self {
        Self::with_message(contacts, "Parsed")
    }
}

fn has_letters(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
}

/// Every way of cutting `entry` in two at a name separator. `:` and `|`
/// come first since `-` also shows up inside numbers.
fn splits(entry: &str) -> impl Iterator<Item = (&str, &str)> {
    entry
        .match_indices([':', '|'])
        .chain(entry.match_indices('-'))
        .map(move |(i, sep)| (entry[..i].trim(), entry[i + sep.len()..].trim()))
}

fn parse_entry(entry: &str, rules: &PhoneRules) -> Option<(String, Option<String>)> {
    if !has_letters(entry) {
        return clean_phone_number(entry, rules).map(|n| (n, None));
    }

    for (a, b) in splits(entry) {
        for (number, name) in [(b, a), (a, b)] {
            if has_letters(number) || !PHONE_SHAPED_RE.is_match(number) {
                continue;
            }
            if let Some(cleaned) = clean_phone_number(number, rules) {
                return Some((cleaned, Some(name.to_string())));
            }
        }
    }

    clean_phone_number(entry, rules).map(|n| (n, None))
}

/// Parses hand-typed entries such as `John: +1 234-567-8901, 5557654321`.
pub(crate) fn parse(input: &str, rules: &PhoneRules) -> ParseSummary {
    let mut contacts = Vec::new();

    for entry in ENTRY_SPLIT_RE.split(input).map(str::trim).filter(|e| !e.is_empty()) {
        if let Some((number, name)) = parse_entry(entry, rules) {
            let position = contacts.len() + 1;
            contacts.push(Contact::with_placeholder(number, name, position));
        }
    }

    ParseSummary::parsed(contacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(number: &str, name: &str) -> Contact {
        Contact {
            number: number.to_string(),
            name: Some(name.to_string()),
        }
    }

    #[test]
    fn named_and_bare_entries() {
        let summary = parse(
            "John: +1 234-567-8901\n+19998887777\nbad-entry",
            &PhoneRules::default(),
        );
        assert!(summary.success);
        assert_eq!(
            summary.contacts,
            vec![
                contact("+12345678901", "John"),
                contact("+19998887777", "Contact 2"),
            ]
        );
        assert_eq!(summary.count, 2);
        assert_eq!(summary.message, "Parsed 2 contacts");
    }

    #[test]
    fn number_first_entries() {
        let summary = parse("555-123-4567 | Ann; 5557654321 : Ben", &PhoneRules::default());
        assert_eq!(
            summary.contacts,
            vec![contact("5551234567", "Ann"), contact("5557654321", "Ben")]
        );
    }

    #[test]
    fn hyphen_separated_names() {
        let summary = parse("Ann - 555-123-4567\n555-765-4321 - Ben", &PhoneRules::default());
        assert_eq!(
            summary.contacts,
            vec![contact("5551234567", "Ann"), contact("5557654321", "Ben")]
        );
    }

    #[test]
    fn hyphenated_bare_number_is_not_split() {
        let summary = parse("+1-234-567-8901", &PhoneRules::default());
        assert_eq!(summary.contacts, vec![contact("+12345678901", "Contact 1")]);
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let summary = parse(",,;\nfoo\nAl: 12\n", &PhoneRules::default());
        assert!(summary.success);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.message, "No valid contacts found");
    }

    #[test]
    fn duplicates_are_kept() {
        let summary = parse("5551234567\n5551234567", &PhoneRules::default());
        assert_eq!(summary.count, 2);
    }
}
