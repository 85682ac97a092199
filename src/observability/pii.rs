use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap();
    static ref BEARER_REGEX: Regex = Regex::new(r"(?i)bearer\s+[a-z0-9._~+/=-]+").unwrap();
}

/// Scrubs addresses and credentials out of free-text console messages.
pub fn scrub_text(input: &str) -> String {
    let no_tokens = BEARER_REGEX.replace_all(input, "Bearer ***");
    EMAIL_REGEX.replace_all(&no_tokens, "***@***.***").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_email() {
        let masked = scrub_text("Login failed for deacon@firstchurch.org");
        assert_eq!(masked, "Login failed for ***@***.***");
    }

    #[test]
    fn test_scrub_bearer() {
        let masked = scrub_text("rejected header Bearer abc.def-123");
        assert_eq!(masked, "rejected header Bearer ***");
    }

    #[test]
    fn test_no_pii() {
        let input = "Batch flushed";
        assert_eq!(scrub_text(input), input);
    }
}
