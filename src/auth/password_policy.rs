/*!
 * # Password Policy Module
 *
 * Registration-time checks on usernames and passwords. Every rule is
 * evaluated so callers can report all problems at once.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordPolicyError {
    #[error("Password too short: minimum {min_length} characters required")]
    TooShort { min_length: usize },

    #[error("Password is too similar to the username")]
    SimilarToUsername,

    #[error("Password is too similar to the last name")]
    SimilarToLastName,

    #[error("Password is in the list of commonly used passwords")]
    CommonPassword,

    #[error("Password cannot be entirely numeric")]
    EntirelyNumeric,

    #[error("The two password fields didn't match")]
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub prevent_common_passwords: bool,
    pub prevent_numeric: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            prevent_common_passwords: true,
            prevent_numeric: true,
        }
    }
}

static COMMON_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "password1", "password123", "123456", "1234567", "12345678",
        "123456789", "1234567890", "qwerty", "qwerty123", "abc123", "111111",
        "123123", "000000", "iloveyou", "letmein", "welcome", "welcome1",
        "monkey", "dragon", "football", "baseball", "sunshine", "princess",
        "superman", "trustno1", "whatever", "shadow", "master", "admin",
        "admin123", "passw0rd", "1q2w3e4r", "q1w2e3r4", "zaq12wsx", "1qaz2wsx",
        "asdfghjkl", "zxcvbnm", "starwars", "computer", "michelle", "jessica",
        "test1234", "changeme", "secret123", "qazwsxedc",
    ]
    .into_iter()
    .collect()
});

static USERNAME_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[\w.@+-]{1,150}$").ok());

/// 1-150 characters of letters, digits and `@.+-_`.
pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE
        .as_ref()
        .map_or(false, |re| re.is_match(username))
}

impl PasswordPolicy {
    /// Returns every rule `password` breaks; empty means acceptable.
    pub fn check(&self, password: &str, username: &str, last_name: &str) -> Vec<PasswordPolicyError> {
        let mut errors = Vec::new();
        let lowered = password.to_lowercase();

        if password.chars().count() < self.min_length {
            errors.push(PasswordPolicyError::TooShort {
                min_length: self.min_length,
            });
        }

        let username = username.trim().to_lowercase();
        if !username.is_empty() && lowered.contains(&username) {
            errors.push(PasswordPolicyError::SimilarToUsername);
        }

        let last_name = last_name.trim().to_lowercase();
        if !last_name.is_empty() && lowered.contains(&last_name) {
            errors.push(PasswordPolicyError::SimilarToLastName);
        }

        if self.prevent_common_passwords && COMMON_PASSWORDS.contains(lowered.as_str()) {
            errors.push(PasswordPolicyError::CommonPassword);
        }

        if self.prevent_numeric
            && !password.is_empty()
            && password.chars().all(|c| c.is_ascii_digit())
        {
            errors.push(PasswordPolicyError::EntirelyNumeric);
        }

        errors
    }

    pub fn check_confirmation(password: &str, confirm: &str) -> Result<(), PasswordPolicyError> {
        if password == confirm {
            Ok(())
        } else {
            Err(PasswordPolicyError::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_password() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("Ink&Paper42", "alice", "Nguyen").is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let policy = PasswordPolicy::default();
        let errors = policy.check("123", "bob", "");
        assert!(errors.contains(&PasswordPolicyError::TooShort { min_length: 8 }));
        assert!(errors.contains(&PasswordPolicyError::EntirelyNumeric));
    }

    #[test]
    fn rejects_password_containing_username_case_insensitively() {
        let policy = PasswordPolicy::default();
        let errors = policy.check("xxALICExx99", "alice", "");
        assert_eq!(errors, vec![PasswordPolicyError::SimilarToUsername]);
    }

    #[test]
    fn blank_last_name_is_ignored() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("correct-horse", "zed", "  ").is_empty());
        assert_eq!(
            policy.check("tranpencil9", "zed", "Tran"),
            vec![PasswordPolicyError::SimilarToLastName]
        );
    }

    #[test]
    fn rejects_common_passwords() {
        let policy = PasswordPolicy::default();
        assert!(policy
            .check("Password123", "someone", "")
            .contains(&PasswordPolicyError::CommonPassword));
    }

    #[test]
    fn username_shape() {
        assert!(is_valid_username("first.last+shop@x-y_z"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"a".repeat(151)));
    }

    #[test]
    fn confirmation_must_match() {
        assert!(PasswordPolicy::check_confirmation("a", "a").is_ok());
        assert_eq!(
            PasswordPolicy::check_confirmation("a", "b"),
            Err(PasswordPolicyError::Mismatch)
        );
    }
}
