// src/plan/subscription.rs

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use super::ScheduleEntry;

/// Lowercase class-name filter tokens of one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Subscription {
    tokens: BTreeSet<String>,
}

fn normalize(token: &str) -> Option<String> {
    let t = token.trim().to_lowercase();
    (!t.is_empty()).then_some(t)
}

impl Subscription {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut s = Self::default();
        s.add(tokens);
        s
    }

    pub fn add<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tokens
            .extend(tokens.into_iter().filter_map(|t| normalize(t.as_ref())));
    }

    pub fn remove<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for t in tokens.into_iter().filter_map(|t| normalize(t.as_ref())) {
            self.tokens.remove(&t);
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// True if any token occurs in `class_name`, ignoring case.
    pub fn matches(&self, class_name: &str) -> bool {
        let class_name = class_name.to_lowercase();
        self.tokens.iter().any(|t| class_name.contains(t.as_str()))
    }
}

impl<'de> Deserialize<'de> for Subscription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_tokens(tokens))
    }
}

/// Entries whose class name matches the subscription, in input order.
pub fn filter_entries<'a>(
    entries: &'a [ScheduleEntry],
    subscription: &Subscription,
) -> Vec<&'a ScheduleEntry> {
    entries
        .iter()
        .filter(|e| subscription.matches(&e.class_name))
        .collect()
}
