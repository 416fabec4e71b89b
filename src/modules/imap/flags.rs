// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_imap::types::Flag;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum EmailFlag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Custom(String),
}

impl EmailFlag {
    pub fn to_imap_string(&self) -> String {
        match self {
            EmailFlag::Seen => "\\Seen".into(),
            EmailFlag::Answered => "\\Answered".into(),
            EmailFlag::Flagged => "\\Flagged".into(),
            EmailFlag::Deleted => "\\Deleted".into(),
            EmailFlag::Draft => "\\Draft".into(),
            EmailFlag::Recent => "\\Recent".into(),
            EmailFlag::Custom(keyword) => keyword.clone(),
        }
    }
}

impl From<&Flag<'_>> for EmailFlag {
    fn from(flag: &Flag<'_>) -> Self {
        match flag {
            Flag::Seen => EmailFlag::Seen,
            Flag::Answered => EmailFlag::Answered,
            Flag::Flagged => EmailFlag::Flagged,
            Flag::Deleted => EmailFlag::Deleted,
            Flag::Draft => EmailFlag::Draft,
            Flag::Recent => EmailFlag::Recent,
            Flag::MayCreate => EmailFlag::Custom("\\*".into()),
            Flag::Custom(keyword) => EmailFlag::Custom(keyword.to_string()),
        }
    }
}

/// Desired state for the three user-facing flags; `None` leaves a flag untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct FlagUpdate {
    pub seen: Option<bool>,
    pub flagged: Option<bool>,
    pub answered: Option<bool>,
}

impl FlagUpdate {
    /// `(+FLAGS, -FLAGS)` STORE arguments, either of which may be absent.
    pub fn store_queries(&self) -> (Option<String>, Option<String>) {
        let mut add = Vec::new();
        let mut remove = Vec::new();
        for (state, flag) in [
            (self.seen, EmailFlag::Seen),
            (self.flagged, EmailFlag::Flagged),
            (self.answered, EmailFlag::Answered),
        ] {
            match state {
                Some(true) => add.push(flag.to_imap_string()),
                Some(false) => remove.push(flag.to_imap_string()),
                None => {}
            }
        }
        let query = |prefix: &str, flags: Vec<String>| {
            (!flags.is_empty()).then(|| format!("{}FLAGS.SILENT ({})", prefix, flags.join(" ")))
        };
        (query("+", add), query("-", remove))
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_none() && self.flagged.is_none() && self.answered.is_none()
    }
}
