use crate::models::ActionDetail;

/// Anchored prefix every qualifying action URL must start with.
pub const FLIGHTS_URL_PREFIX: &str = "https://www.karnaval.ir/domestic-flights";

/// The subset of `actions` whose `url` is a string under the domestic-flights
/// prefix. Order-preserving; returns an empty Vec when nothing matches.
pub fn filter_relevant(actions: &[ActionDetail]) -> Vec<ActionDetail> {
    actions
        .iter()
        .filter(|action| {
            action
                .url_str()
                .is_some_and(|url| url.starts_with(FLIGHTS_URL_PREFIX))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn action(url: serde_json::Value) -> ActionDetail {
        ActionDetail {
            url: Some(url),
            extra: Map::new(),
        }
    }

    fn no_url_action() -> ActionDetail {
        ActionDetail {
            url: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_keeps_only_matching_urls_in_order() {
        let actions = vec![
            action(json!("https://www.karnaval.ir/domestic-flights/thr-mhd")),
            action(json!("https://www.karnaval.ir/hotels/tehran")),
            action(json!("https://www.karnaval.ir/domestic-flights")),
            action(json!("https://other.example.com/x")),
        ];

        let result = filter_relevant(&actions);

        assert_eq!(result.len(), 2);
        assert_eq!(
            result[0].url_str(),
            Some("https://www.karnaval.ir/domestic-flights/thr-mhd")
        );
        assert_eq!(
            result[1].url_str(),
            Some("https://www.karnaval.ir/domestic-flights")
        );
    }

    #[test]
    fn test_prefix_is_anchored_at_the_start() {
        let actions = vec![action(json!(
            "https://evil.example.com/?u=https://www.karnaval.ir/domestic-flights"
        ))];

        assert!(filter_relevant(&actions).is_empty());
    }

    #[test]
    fn test_absent_and_non_string_urls_are_excluded() {
        let actions = vec![
            no_url_action(),
            action(json!(42)),
            action(json!(null)),
            action(json!(["https://www.karnaval.ir/domestic-flights"])),
        ];

        assert!(filter_relevant(&actions).is_empty());
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(filter_relevant(&[]).is_empty());
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let actions = vec![
            action(json!("https://www.karnaval.ir/domestic-flights/ika-syz")),
            action(json!("https://www.karnaval.ir/blog")),
        ];

        let once = filter_relevant(&actions);
        let twice = filter_relevant(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_does_not_mutate_input() {
        let actions = vec![action(json!("https://www.karnaval.ir/blog"))];
        let before = actions.clone();

        let _ = filter_relevant(&actions);

        assert_eq!(actions, before);
    }
}
