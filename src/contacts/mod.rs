//! Contact normalization: phone cleaning plus extraction from free text,
//! CSV, spreadsheets and manually typed entries.
//!
//! Every path funnels through [`clean_phone_number`], so a number is valid in
//! one input format exactly when it is valid in all of them. Invalid rows are
//! filtered out, never reported; only structural problems (unknown file
//! type, unreadable file, broken workbook) are errors.
//!
//! Duplicates are kept in first-seen order.

pub mod manual;
pub mod tabular;
pub mod text;

pub use manual::ParseSummary;

use crate::dispatch::DispatchTarget;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s().]").unwrap());
static NON_PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\d+]").unwrap());

/// Extensions with a parser behind them; config may narrow this list.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["txt", "csv", "xlsx", "xls"];

/// A run of at least seven phone-ish characters.
pub(crate) static PHONE_SHAPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d+\-()\s]{7,}").unwrap());

#[derive(Error, Debug)]
pub enum ContactError {
    #[error("Invalid file type '{extension}'. Allowed: {}", allowed.join(", "))]
    UnsupportedFileType {
        extension: String,
        allowed: Vec<String>,
    },
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Malformed spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("Invalid column pattern '{pattern}': {source}")]
    Pattern { pattern: String, source: regex::Error },
}

/// A messaging target. `number` always comes out of [`clean_phone_number`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub number: String,
    pub name: Option<String>,
}

impl Contact {
    /// Builds a contact, substituting `Contact <position>` for a blank name.
    pub(crate) fn with_placeholder(number: String, name: Option<String>, position: usize) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Contact {}", position));
        Self {
            number,
            name: Some(name),
        }
    }
}

impl DispatchTarget for Contact {
    fn label(&self) -> &str {
        &self.number
    }

    fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhoneRules {
    pub min_length: usize,
    pub max_length: usize,
    /// Unprefixed numbers with more digits than this get a leading `+`.
    pub international_threshold: usize,
    pub prefix_plus: bool,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            min_length: 7,
            max_length: 15,
            international_threshold: 10,
            prefix_plus: true,
        }
    }
}

/// Cleans a raw phone number, returning `None` when it is not usable.
///
/// The result is digits with at most one leading `+`, and cleaning a
/// cleaned number is a no-op.
pub fn clean_phone_number(raw: &str, rules: &PhoneRules) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let stripped = SEPARATOR_RE.replace_all(trimmed, "");
    let stripped = NON_PHONE_RE.replace_all(&stripped, "");

    let has_plus = stripped.starts_with('+');
    let digits: String = stripped.chars().filter(char::is_ascii_digit).collect();

    let digits = if has_plus {
        digits
    } else {
        digits.trim_start_matches('0').to_string()
    };

    let count = digits.len();
    let plus = has_plus || (rules.prefix_plus && count > rules.international_threshold);

    if count < rules.min_length || count > rules.max_length {
        return None;
    }

    Some(if plus { format!("+{}", digits) } else { digits })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberValidation {
    pub valid: bool,
    pub cleaned: Option<String>,
    pub original: String,
}

pub fn validate_number(raw: &str, rules: &PhoneRules) -> NumberValidation {
    let cleaned = clean_phone_number(raw, rules);
    NumberValidation {
        valid: cleaned.is_some(),
        cleaned,
        original: raw.to_string(),
    }
}

/// Header keywords used to find the phone and name columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnPatterns {
    pub phone: Vec<String>,
    pub name: Vec<String>,
}

impl Default for ColumnPatterns {
    fn default() -> Self {
        Self {
            phone: ["phone", "number", "mobile", "cell", "tel"]
                .map(String::from)
                .to_vec(),
            name: ["name", "contact", "person"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub phone: PhoneRules,
    pub column_patterns: ColumnPatterns,
    pub allowed_extensions: Vec<String>,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            phone: PhoneRules::default(),
            column_patterns: ColumnPatterns::default(),
            allowed_extensions: SUPPORTED_EXTENSIONS.map(String::from).to_vec(),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ContactError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("(?i){}", p)).map_err(|source| ContactError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Entry point for turning raw input into contacts.
#[derive(Debug, Clone)]
pub struct ContactNormalizer {
    rules: PhoneRules,
    phone_columns: Vec<Regex>,
    name_columns: Vec<Regex>,
    allowed_extensions: Vec<String>,
}

impl ContactNormalizer {
    pub fn new(config: &ContactConfig) -> Result<Self, ContactError> {
        let allowed_extensions: Vec<String> = config
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        if let Some(unknown) = allowed_extensions
            .iter()
            .find(|e| !SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        {
            return Err(ContactError::UnsupportedFileType {
                extension: unknown.clone(),
                allowed: SUPPORTED_EXTENSIONS.map(String::from).to_vec(),
            });
        }

        Ok(Self {
            rules: config.phone.clone(),
            phone_columns: compile_patterns(&config.column_patterns.phone)?,
            name_columns: compile_patterns(&config.column_patterns.name)?,
            allowed_extensions,
        })
    }

    pub fn rules(&self) -> &PhoneRules {
        &self.rules
    }

    pub fn clean(&self, raw: &str) -> Option<String> {
        clean_phone_number(raw, &self.rules)
    }

    pub fn validate(&self, raw: &str) -> NumberValidation {
        validate_number(raw, &self.rules)
    }

    /// Line-based extraction for pasted text and `.txt` files.
    pub fn extract_from_text(&self, input: &str) -> Vec<Contact> {
        text::extract(input, &self.rules)
    }

    /// Column-detecting extraction shared by CSV and spreadsheets.
    pub fn extract_from_table(&self, headers: &[String], rows: &[Vec<String>]) -> Vec<Contact> {
        tabular::extract(headers, rows, &self.phone_columns, &self.name_columns, &self.rules)
    }

    pub fn extract_from_csv(&self, input: &[u8]) -> Result<Vec<Contact>, ContactError> {
        let (headers, rows) = tabular::read_csv(input)?;
        Ok(self.extract_from_table(&headers, &rows))
    }

    pub fn extract_from_spreadsheet(&self, input: Vec<u8>) -> Result<Vec<Contact>, ContactError> {
        let (headers, rows) = tabular::read_spreadsheet(input)?;
        Ok(self.extract_from_table(&headers, &rows))
    }

    pub fn parse_manual_numbers(&self, input: &str) -> ParseSummary {
        manual::parse(input, &self.rules)
    }

    fn extension_of(&self, filename: &str) -> Result<String, ContactError> {
        let extension = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if self.allowed_extensions.contains(&extension) {
            Ok(extension)
        } else {
            Err(ContactError::UnsupportedFileType {
                extension,
                allowed: self.allowed_extensions.clone(),
            })
        }
    }

    /// Extracts contacts from an in-memory upload; `filename` only selects
    /// the parser.
    pub fn extract_bytes(&self, bytes: Vec<u8>, filename: &str) -> Result<ParseSummary, ContactError> {
        let extension = self.extension_of(filename)?;
        debug!("Extracting contacts from {} as .{}", filename, extension);

        let contacts = match extension.as_str() {
            "txt" => self.extract_from_text(&String::from_utf8_lossy(&bytes)),
            "csv" => self.extract_from_csv(&bytes)?,
            "xlsx" | "xls" => self.extract_from_spreadsheet(bytes)?,
            _ => {
                return Err(ContactError::UnsupportedFileType {
                    extension: extension.clone(),
                    allowed: self.allowed_extensions.clone(),
                })
            }
        };

        info!("Extracted {} contacts from {}", contacts.len(), filename);
        Ok(ParseSummary::extracted(contacts))
    }

    pub fn extract_file(&self, path: &Path) -> Result<ParseSummary, ContactError> {
        let filename = path.to_string_lossy().to_string();
        // Check the extension before touching the disk.
        self.extension_of(&filename)?;
        let bytes = std::fs::read(path).map_err(|source| ContactError::Read {
            path: filename.clone(),
            source,
        })?;
        self.extract_bytes(bytes, &filename)
    }
}

impl Default for ContactNormalizer {
    fn default() -> Self {
        // The built-in patterns are plain words and always compile.
        Self::new(&ContactConfig::default()).expect("default column patterns are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn clean(raw: &str) -> Option<String> {
        clean_phone_number(raw, &PhoneRules::default())
    }

    #[test]
    fn strips_separators() {
        assert_eq!(clean("(555) 123-4567").as_deref(), Some("5551234567"));
        assert_eq!(clean(" 555.123.4567 ").as_deref(), Some("5551234567"));
        assert_eq!(clean("+1 234-567-8901").as_deref(), Some("+12345678901"));
    }

    #[test]
    fn drops_local_zeros() {
        assert_eq!(clean("0044 7911 123456").as_deref(), Some("+447911123456"));
        assert_eq!(clean("07911123456").as_deref(), Some("7911123456"));
    }

    #[test]
    fn prefixes_long_numbers() {
        assert_eq!(clean("12345678901").as_deref(), Some("+12345678901"));
        assert_eq!(clean("1234567890").as_deref(), Some("1234567890"));

        let rules = PhoneRules {
            prefix_plus: false,
            ..PhoneRules::default()
        };
        assert_eq!(clean_phone_number("12345678901", &rules).as_deref(), Some("12345678901"));
    }

    #[test]
    fn enforces_length_bounds() {
        assert_eq!(clean("123"), None);
        assert_eq!(clean("1234567").as_deref(), Some("1234567"));
        assert_eq!(clean("+1234567890123456"), None);
        assert_eq!(clean(""), None);
        assert_eq!(clean("   "), None);
        assert_eq!(clean("no digits here"), None);
    }

    #[test]
    fn output_is_digits_with_optional_leading_plus() {
        let inputs = [
            "12+34567890",
            "++1 555 123 4567",
            "tel: 555-123-4567 ext",
            "0000000",
            "+0012345678",
            "abc+def",
            "555\u{00a0}123\u{2013}4567",
        ];
        let rules = PhoneRules::default();
        for input in inputs {
            if let Some(cleaned) = clean(input) {
                let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
                assert!(digits.chars().all(|c| c.is_ascii_digit()), "{input:?} -> {cleaned:?}");
                assert!(digits.len() >= rules.min_length && digits.len() <= rules.max_length);
            }
        }
    }

    #[test]
    fn cleaning_is_idempotent() {
        let inputs = [
            "(555) 123-4567",
            "+1 234-567-8901",
            "0044 7911 123456",
            "07911123456",
            "12345678901",
            "0012345678901",
            "1234567",
        ];
        for input in inputs {
            let once = clean(input).unwrap();
            assert_eq!(clean(&once).as_deref(), Some(once.as_str()), "{input:?}");
        }
    }

    #[test]
    fn validation_reports_original() {
        let v = validate_number("555-123-4567", &PhoneRules::default());
        assert!(v.valid);
        assert_eq!(v.cleaned.as_deref(), Some("5551234567"));
        assert_eq!(v.original, "555-123-4567");

        assert!(!validate_number("12", &PhoneRules::default()).valid);
    }

    #[test]
    fn unknown_extension_is_a_hard_error() {
        let normalizer = ContactNormalizer::default();
        let err = normalizer
            .extract_bytes(b"Alice,5551234567".to_vec(), "contacts.json")
            .unwrap_err();
        assert!(matches!(err, ContactError::UnsupportedFileType { ref extension, .. } if extension == "json"));

        let err = normalizer.extract_bytes(Vec::new(), "noextension").unwrap_err();
        assert!(matches!(err, ContactError::UnsupportedFileType { .. }));
    }

    #[test]
    fn malformed_workbook_is_a_hard_error() {
        let normalizer = ContactNormalizer::default();
        let err = normalizer
            .extract_bytes(b"definitely not a workbook".to_vec(), "contacts.xlsx")
            .unwrap_err();
        assert!(matches!(err, ContactError::Spreadsheet(_)));
    }

    #[test]
    fn missing_file_is_a_hard_error() {
        let normalizer = ContactNormalizer::default();
        let err = normalizer
            .extract_file(Path::new("/nonexistent/contacts.csv"))
            .unwrap_err();
        assert!(matches!(err, ContactError::Read { .. }));
    }

    #[test]
    fn empty_result_is_soft() {
        let normalizer = ContactNormalizer::default();
        let summary = normalizer
            .extract_bytes(b"nothing useful\nhere either".to_vec(), "list.TXT")
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.message, "No valid contacts found");
    }

    #[test]
    fn extracts_csv_file_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Name,Mobile").unwrap();
        writeln!(file, "Alice,555-1234567").unwrap();
        writeln!(file, ",123").unwrap();
        writeln!(file, "Bob,555-1234567").unwrap();

        let summary = ContactNormalizer::default().extract_file(file.path()).unwrap();

        assert_eq!(summary.count, 2);
        assert_eq!(summary.contacts[0].number, "5551234567");
        assert_eq!(summary.contacts[0].name.as_deref(), Some("Alice"));
        // Duplicates are preserved.
        assert_eq!(summary.contacts[1].number, "5551234567");
        assert_eq!(summary.contacts[1].name.as_deref(), Some("Bob"));
        assert_eq!(summary.message, "Extracted 2 contacts");
    }

    #[test]
    fn config_cannot_enable_unparsed_extensions() {
        let config = ContactConfig {
            allowed_extensions: vec!["csv".into(), ".TSV".into()],
            ..ContactConfig::default()
        };
        assert!(matches!(
            ContactNormalizer::new(&config),
            Err(ContactError::UnsupportedFileType { ref extension, .. }) if extension == "tsv"
        ));
    }

    #[test]
    fn narrowed_extension_list_is_enforced() {
        let config = ContactConfig {
            allowed_extensions: vec!["csv".into()],
            ..ContactConfig::default()
        };
        let normalizer = ContactNormalizer::new(&config).unwrap();
        let err = normalizer
            .extract_bytes(b"5551234567".to_vec(), "list.txt")
            .unwrap_err();
        assert!(matches!(err, ContactError::UnsupportedFileType { ref extension, .. } if extension == "txt"));
    }

    #[test]
    fn bad_column_pattern_is_reported() {
        let config = ContactConfig {
            column_patterns: ColumnPatterns {
                phone: vec!["(".into()],
                name: vec![],
            },
            ..ContactConfig::default()
        };
        assert!(matches!(
            ContactNormalizer::new(&config),
            Err(ContactError::Pattern { .. })
        ));
    }
}
