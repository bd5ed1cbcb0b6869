//! Name and identifier cleanup shared by extraction and linkage.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BACKSLASH_RE: Regex = Regex::new(r"\\").unwrap();
    static ref MULTI_WS_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_WORD_RE: Regex = Regex::new(r"[^\w\s]").unwrap();
}

/// Assignee name as stored in the intermediate tables.
pub fn clean_assignee(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = BACKSLASH_RE.replace_all(&lowered, "");
    MULTI_WS_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Join key for company names: punctuation becomes whitespace.
pub fn name_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let spaced = NON_WORD_RE.replace_all(&lowered, " ");
    MULTI_WS_RE.replace_all(&spaced, " ").trim().to_string()
}

/// Join key for patent numbers. Numeric grants lose their zero padding so
/// `07123456` from the assignment feed meets `7123456` from PatentsView.
pub fn patent_key(number: &str) -> String {
    let number = number.trim();
    if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = number.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        number.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignee_cleanup() {
        assert_eq!(clean_assignee("  ACME\\  Widgets\tINC. "), "acme widgets inc.");
        assert_eq!(clean_assignee("\\\\"), "");
    }

    #[test]
    fn name_keys_ignore_punctuation() {
        assert_eq!(name_key("International Business Machines Corp."), "international business machines corp");
        assert_eq!(name_key("AT&T, Inc."), "at t inc");
        assert_eq!(name_key("at&t inc"), name_key("AT & T INC"));
        assert_eq!(name_key("Société Générale"), "société générale");
    }

    #[test]
    fn patent_keys() {
        assert_eq!(patent_key("07123456"), "7123456");
        assert_eq!(patent_key(" 7123456 "), "7123456");
        assert_eq!(patent_key("RE045678"), "RE045678");
        assert_eq!(patent_key("D0612345"), "D0612345");
        assert_eq!(patent_key("000"), "0");
        assert_eq!(patent_key(""), "");
    }
}
