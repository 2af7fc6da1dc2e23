use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::Event;
use crate::profile::Profile;

/// e.g. "Wednesday, January 1, 2025 at 09:00"
pub fn format_event_date(at: &DateTime<Utc>) -> String {
    at.format("%A, %B %-d, %Y at %H:%M").to_string()
}

fn or_dash(v: &Option<String>) -> &str {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")
}

pub fn render_profile(p: &Profile) -> String {
    let rows = [
        ("Full Name", p.full_name.as_str()),
        ("Email", p.email.as_str()),
        ("Phone", or_dash(&p.phone)),
        ("Department", or_dash(&p.department)),
        ("Year", or_dash(&p.year)),
        ("Bio", or_dash(&p.bio)),
    ];
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (k, v) in rows {
        out.push_str(&format!("{:<width$}  {}\n", k, v, width = width));
    }
    out.push_str(&format!("{:<width$}  {}\n", "Updated", p.updated_at.format("%Y-%m-%d %H:%M"), width = width));
    out
}

/// Numbered event list; the number is what `register` takes.
pub fn render_events(events: &[Event], registered: &BTreeSet<Uuid>) -> String {
    if events.is_empty() {
        return "No upcoming events.\n".to_string();
    }
    let mut out = String::new();
    for (i, ev) in events.iter().enumerate() {
        if registered.contains(&ev.id) {
            out.push_str(&format!("{:>2}. {} [registered]\n", i + 1, ev.title));
        } else {
            out.push_str(&format!("{:>2}. {}\n", i + 1, ev.title));
        }
        if let Some(d) = ev.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("    {}\n", d));
        }
        out.push_str(&format!("    {}\n", format_event_date(&ev.event_date)));
        if let Some(loc) = ev.location.as_deref().filter(|l| !l.is_empty()) {
            out.push_str(&format!("    {}\n", loc));
        }
        if let Some(cap) = ev.capacity() {
            out.push_str(&format!("    Max {} participants\n", cap));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStatus;

    fn event(title: &str, max: u32) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            event_date: "2025-01-01T09:05:00Z".parse().unwrap(),
            location: Some("Hall".into()),
            max_participants: max,
            status: EventStatus::Active,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn date_format() {
        let at: DateTime<Utc> = "2025-01-01T09:05:00Z".parse().unwrap();
        assert_eq!(format_event_date(&at), "Wednesday, January 1, 2025 at 09:05");
    }

    #[test]
    fn events_show_marks_and_capacity() {
        let a = event("Mixer", 0);
        let b = event("Workshop", 30);
        let out = render_events(&[a.clone(), b], &BTreeSet::from([a.id]));
        assert!(out.contains(" 1. Mixer [registered]\n"));
        assert!(out.contains(" 2. Workshop\n"));
        assert!(out.contains("Max 30 participants"));
        assert_eq!(out.matches("Max ").count(), 1);
        assert_eq!(render_events(&[], &BTreeSet::new()), "No upcoming events.\n");
    }
}
