//! Result list rendering
//!
//! The query path prints a single JSON document listing selectable items and,
//! while a refresh is under way, a hint telling the host when to re-run.

use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::data::{KeyRecord, LinkRecord};
use crate::refresh::Lookup;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Icon {
    pub path: PathBuf,
}

/// One selectable result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub title: String,
    pub subtitle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

impl Item {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uid: None,
            title: title.into(),
            subtitle: String::new(),
            arg: None,
            autocomplete: None,
            valid: false,
            icon: None,
        }
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }

    pub fn autocomplete(mut self, autocomplete: impl Into<String>) -> Self {
        self.autocomplete = Some(autocomplete.into());
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn icon(mut self, path: PathBuf) -> Self {
        self.icon = Some(Icon { path });
        self
    }

    /// Every query term must appear in the title or the autocomplete text
    fn matches(&self, terms: &[String]) -> bool {
        let haystack = format!(
            "{} {}",
            self.title.to_lowercase(),
            self.autocomplete.as_deref().unwrap_or_default().to_lowercase()
        );
        terms.iter().all(|term| haystack.contains(term.as_str()))
    }
}

/// The full response for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerun: Option<f64>,
    pub items: Vec<Item>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops items that do not match `query`
    pub fn filter(&mut self, query: &str) {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return;
        }
        self.items.retain(|item| item.matches(&terms));
    }

    /// Feedback consisting of a single error message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            rerun: None,
            items: vec![Item::new(message).subtitle("golook failed")],
        }
    }

    pub fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        serde_json::to_writer(&mut out, self)?;
        writeln!(out)
    }
}

fn refresh_item(what: &str) -> Item {
    Item::new("Refresh")
        .subtitle(format!("Force refresh of {what}"))
        .autocomplete("refresh")
        .arg("refresh")
        .valid(true)
}

/// Shared layout: pending notice, records, refresh entry, filter, empty notice
fn assemble<T>(
    lookup: &Lookup<T>,
    query: &str,
    refreshing: bool,
    what: &str,
    to_item: impl Fn(&T) -> Item,
) -> Feedback {
    let mut feedback = Feedback {
        rerun: lookup.rerun,
        items: Vec::new(),
    };

    if lookup.pending {
        feedback.push(Item::new("Refreshing data..."));
    }
    feedback.items.extend(lookup.records.iter().map(to_item));
    feedback.push(refresh_item(what));

    if !query.trim().is_empty() && !lookup.records.is_empty() {
        feedback.filter(query);
    }

    if !refreshing && feedback.is_empty() {
        feedback.push(Item::new(format!("No {what} found")));
    }

    feedback
}

/// Renders link lookups. `icon_for` returns the icon path of a link if one exists.
pub fn render_links(
    lookup: &Lookup<LinkRecord>,
    query: &str,
    refreshing: bool,
    icon_for: impl Fn(&LinkRecord) -> Option<PathBuf>,
) -> Feedback {
    assemble(lookup, query, refreshing, "links", |link| {
        let item = Item::new(&link.short)
            .uid(&link.short)
            .subtitle(&link.long)
            .arg(&link.long)
            .autocomplete(&link.short)
            .valid(true);
        match icon_for(link) {
            Some(path) => item.icon(path),
            None => item,
        }
    })
}

/// Renders key lookups
pub fn render_keys(lookup: &Lookup<KeyRecord>, query: &str, refreshing: bool) -> Feedback {
    assemble(lookup, query, refreshing, "keys", |key| {
        Item::new(&key.comment)
            .subtitle(&key.key_line)
            .arg(&key.key_line)
            .autocomplete(&key.comment)
            .valid(true)
    })
}
