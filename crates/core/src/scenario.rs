use serde::{Deserialize, Serialize};

/// A fixed practice task: what to plan, its theme, and the points that must be discussed.
///
/// Field aliases accept the catalog's original German keys (`aufgabe`, `leitpunkte`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Identifies the scenario; session ids are scoped by it.
    #[serde(alias = "id")]
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "aufgabe")]
    pub task: String,
    #[serde(default)]
    pub theme: String,
    #[serde(alias = "leitpunkte", alias = "discussionPoints")]
    pub discussion_points: Vec<String>,
}

/// One required sub-topic of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionPoint<'a> {
    pub index: usize,
    pub text: &'a str,
}

impl Scenario {
    pub fn new(
        key: impl Into<String>,
        task: impl Into<String>,
        theme: impl Into<String>,
        discussion_points: Vec<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: String::new(),
            task: task.into(),
            theme: theme.into(),
            discussion_points,
        }
    }

    pub fn points(&self) -> impl Iterator<Item = DiscussionPoint<'_>> {
        self.discussion_points
            .iter()
            .enumerate()
            .map(|(index, text)| DiscussionPoint { index, text })
    }

    pub fn point_count(&self) -> usize {
        self.discussion_points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_are_indexed_in_order() {
        let scenario = Scenario::new("k", "Plane", "Freizeit", vec!["Wann?".into(), "Wo?".into()]);
        let points: Vec<_> = scenario.points().collect();
        assert_eq!(points[0], DiscussionPoint { index: 0, text: "Wann?" });
        assert_eq!(points[1], DiscussionPoint { index: 1, text: "Wo?" });
        assert_eq!(scenario.point_count(), 2);
    }

    #[test]
    fn test_deserializes_catalog_keys() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "id": "geburtstag-anna",
                "title": "Geburtstag",
                "aufgabe": "Plant eine Party für Anna.",
                "theme": "Feiern",
                "leitpunkte": ["Wann?", "Wo?", "Was?"]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.key, "geburtstag-anna");
        assert_eq!(scenario.task, "Plant eine Party für Anna.");
        assert_eq!(scenario.point_count(), 3);
    }
}
