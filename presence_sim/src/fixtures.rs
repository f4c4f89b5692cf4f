//! Built-in venue scripts, compiled into the binary.

use presence_core::{PersonaPresenceScript, ScenarioError};

const FIXTURES: &[(&str, &str)] = &[
    ("campus-library", include_str!("../fixtures/campus-library.json")),
    ("coworking-downtown", include_str!("../fixtures/coworking-downtown.json")),
    ("gallery-opening", include_str!("../fixtures/gallery-opening.json")),
    ("chat-performance-test", include_str!("../fixtures/chat-performance.json")),
];

/// Venue names with a built-in script.
pub fn available_venues() -> Vec<&'static str> {
    FIXTURES.iter().map(|(venue, _)| *venue).collect()
}

pub fn has_fixture(venue: &str) -> bool {
    FIXTURES.iter().any(|(v, _)| *v == venue)
}

/// Parses and validates the script for a venue.
pub fn load_fixture(venue: &str) -> Result<PersonaPresenceScript, ScenarioError> {
    let (_, json) = FIXTURES
        .iter()
        .find(|(v, _)| *v == venue)
        .ok_or_else(|| ScenarioError::UnknownVenue {
            venue: venue.to_string(),
            available: available_venues().join(", "),
        })?;
    PersonaPresenceScript::from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_env::SessionId;

    #[test]
    fn test_every_fixture_loads() {
        assert_eq!(available_venues().len(), 4);
        for venue in available_venues() {
            let script = load_fixture(venue).unwrap();
            assert_eq!(script.venue, venue);
            assert!(!script.personas.is_empty());
        }
    }

    #[test]
    fn test_first_personas() {
        let first = |venue| load_fixture(venue).unwrap().personas[0].session_id.clone();
        assert_eq!(first("campus-library"), SessionId::new("maya-session"));
        assert_eq!(first("coworking-downtown"), SessionId::new("marcus-session"));
        assert_eq!(first("gallery-opening"), SessionId::new("casey-session"));
        assert_eq!(first("chat-performance-test"), SessionId::new("requester-session"));
    }

    #[test]
    fn test_campus_library_shares_overthinking() {
        let script = load_fixture("campus-library").unwrap();
        let hint = script
            .compatibility(&SessionId::new("maya-session"), &SessionId::new("zoe-session"))
            .unwrap();
        assert!(hint.shared_tags.contains("Overthinking Things"));
    }

    #[test]
    fn test_coworking_floors_are_distinct() {
        let script = load_fixture("coworking-downtown").unwrap();
        let floors: Vec<_> = script.personas.iter().map(|p| p.geo.unwrap().floor).collect();
        assert_eq!(floors, vec![Some(3), Some(2)]);
    }

    #[test]
    fn test_unknown_venue_lists_available() {
        assert!(!has_fixture("non-existent-venue"));
        assert!(!has_fixture(""));
        let err = load_fixture("nowhere").unwrap_err().to_string();
        assert!(err.contains("Available venues:"));
        assert!(err.contains("campus-library"));
        assert!(err.contains("coworking-downtown"));
    }
}
