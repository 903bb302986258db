//! User ID strings of the form `Name (Comment) <email>`.

use std::fmt;

/// Parsed OpenPGP user ID. Absent parts are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserId {
    pub name: String,
    pub comment: String,
    pub email: String,
}

impl UserId {
    pub fn new(name: &str, comment: &str, email: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            comment: comment.trim().to_string(),
            email: email.trim().to_string(),
        }
    }

    /// Parse a user ID. Never fails; unparsable parts come back empty.
    pub fn parse(s: &str) -> Self {
        let mut rest = s.trim();
        let mut email = "";
        let mut comment = "";

        if rest.ends_with('>') {
            if let Some(open) = rest.rfind('<') {
                email = &rest[open + 1..rest.len() - 1];
                rest = rest[..open].trim_end();
            }
        }

        if rest.ends_with(')') {
            if let Some(open) = rest.rfind('(') {
                comment = &rest[open + 1..rest.len() - 1];
                rest = rest[..open].trim_end();
            }
        }

        Self::new(rest, comment, email)
    }

    pub fn has_email(&self) -> bool {
        !self.email.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if !self.name.is_empty() {
            parts.push(self.name.clone());
        }
        if !self.comment.is_empty() {
            parts.push(format!("({})", self.comment));
        }
        if !self.email.is_empty() {
            parts.push(format!("<{}>", self.email));
        }
        f.write_str(&parts.join(" "))
    }
}
