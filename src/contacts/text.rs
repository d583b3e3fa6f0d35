use super::{clean_phone_number, Contact, PhoneRules, PHONE_SHAPED_RE};
use regex::Regex;
use std::sync::LazyLock;

static DELIMITER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,;\t|]").unwrap());
static LINE_PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+]?[\d\-()\s]{7,}").unwrap());

/// Splits `token` around its phone-shaped run, returning the run and
/// whatever text surrounds it.
fn split_phone(token: &str, re: &Regex) -> Option<(String, String)> {
    let m = re.find(token)?;
    let rest = format!("{} {}", &token[..m.start()], &token[m.end()..]);
    Some((
        m.as_str().trim().to_string(),
        rest.split_whitespace().collect::<Vec<_>>().join(" "),
    ))
}

fn candidates(line: &str) -> (Option<String>, Option<String>) {
    let mut phone = None;
    let mut name = None;
    let mut leftover = None;

    for part in DELIMITER_RE.split(line).map(str::trim) {
        if phone.is_none() {
            if let Some((number, rest)) = split_phone(part, &PHONE_SHAPED_RE) {
                phone = Some(number);
                if !rest.is_empty() {
                    leftover = Some(rest);
                }
                continue;
            }
        }
        if name.is_none() && !part.is_empty() {
            name = Some(part.to_string());
        }
    }

    if phone.is_none() {
        if let Some((number, rest)) = split_phone(line, &LINE_PHONE_RE) {
            return (Some(number), Some(rest).filter(|r| !r.is_empty()));
        }
    }

    (phone, name.or(leftover))
}

/// Line-based extraction. Lines without a usable number are dropped.
pub(crate) fn extract(input: &str, rules: &PhoneRules) -> Vec<Contact> {
    let mut contacts = Vec::new();

    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (phone, name) = candidates(line);
        let Some(number) = phone.and_then(|p| clean_phone_number(&p, rules)) else {
            continue;
        };
        let position = contacts.len() + 1;
        contacts.push(Contact::with_placeholder(number, name, position));
    }

    contacts
}
